//! Registry error types

/// Error type for registry operations
///
/// Invariant violations mean the local view can no longer be trusted;
/// callers must treat them as fatal rather than continue serving.
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// Internal store/index consistency check failed
    InvariantViolation(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::InvariantViolation(what) => {
                write!(f, "registry invariant violated: {}", what)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
