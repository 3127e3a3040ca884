//! Interest filters
//!
//! An interest describes which subset of instance records a subscriber
//! wants. The filter set is small and fixed, so this is a closed enum with
//! exhaustive matching rather than an open trait.

use super::instance::InstanceRecord;

/// Filter predicate over instance records
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Interest {
    /// Every record
    All,
    /// No record
    None,
    /// Records of the named application
    Application(String),
    /// Records registered under the given virtual IP address
    VirtualIp(String),
    /// Records of the same application as this node
    SameApplication(String),
}

impl Interest {
    /// Whether the given record matches this interest
    pub fn matches(&self, record: &InstanceRecord) -> bool {
        match self {
            Interest::All => true,
            Interest::None => false,
            Interest::Application(app) => record.app == *app,
            Interest::VirtualIp(vip) => record.vip.as_deref() == Some(vip.as_str()),
            Interest::SameApplication(self_app) => record.app == *self_app,
        }
    }
}

impl std::fmt::Display for Interest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interest::All => f.write_str("all"),
            Interest::None => f.write_str("none"),
            Interest::Application(app) => write!(f, "app={}", app),
            Interest::VirtualIp(vip) => write!(f, "vip={}", vip),
            Interest::SameApplication(app) => write!(f, "same-app={}", app),
        }
    }
}
