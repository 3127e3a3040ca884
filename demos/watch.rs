//! Watch a read node's registry from the command line
//!
//! Run with: cargo run --example watch -- [NODE_ADDR] [APP]
//!
//! Examples:
//!   cargo run --example watch                              # full registry from 127.0.0.1:12103
//!   cargo run --example watch 127.0.0.1:12103 billing      # only the "billing" application
//!
//! Connects to a read node (see `read_node.rs`), subscribes with the given
//! interest, and prints the snapshot followed by every live change until
//! interrupted.

use std::net::SocketAddr;
use std::sync::Arc;

use discovery_rs::replication::{UpstreamChannel, UpstreamConnector, UpstreamEvent};
use discovery_rs::{
    ChangeNotification, ClientConfig, Interest, ReadServerMetrics, TcpInterestClient,
};

fn describe(notification: &ChangeNotification) -> String {
    match notification {
        ChangeNotification::Add(rec) => format!(
            "+ {} app={} status={} v{}",
            rec.id, rec.app, rec.status, rec.version
        ),
        ChangeNotification::Modify { new, .. } => format!(
            "~ {} app={} status={} v{}",
            new.id, new.app, new.status, new.version
        ),
        ChangeNotification::Delete(rec) => format!("- {} app={}", rec.id, rec.app),
        ChangeNotification::BufferSentinel => "--- live ---".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let node_addr: SocketAddr = args
        .get(1)
        .map(String::as_str)
        .unwrap_or("127.0.0.1:12103")
        .parse()?;
    let interest = match args.get(2) {
        Some(app) => Interest::Application(app.clone()),
        None => Interest::All,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("discovery_rs=info".parse()?),
        )
        .init();

    let client = TcpInterestClient::new(
        ClientConfig::with_addr(node_addr),
        Arc::new(ReadServerMetrics::new()),
    );

    println!("Watching {} with interest {}", node_addr, interest);
    let mut channel = client.connect(&interest).await?;

    loop {
        tokio::select! {
            event = channel.next_event() => match event? {
                UpstreamEvent::Notification(notification) => {
                    println!("{}", describe(&notification));
                }
                UpstreamEvent::Heartbeat => {}
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nDone.");
                return Ok(());
            }
        }
    }
}
