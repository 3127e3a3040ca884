//! Full read node: replicate from a write cluster, serve subscribers
//!
//! Run with: cargo run --example read_node -- [UPSTREAM_ADDR] [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example read_node                                # upstream 127.0.0.1:12102, serve 0.0.0.0:12103
//!   cargo run --example read_node 10.0.0.5:12102                 # custom upstream
//!   cargo run --example read_node 10.0.0.5:12102 0.0.0.0:13000   # custom upstream and bind
//!
//! This example demonstrates:
//! - Wiring the fan-out engine, replication session, self-registration
//!   feed, and interest server together
//! - Graceful shutdown on Ctrl+C
//! - Periodic metrics reporting
//!
//! # Architecture
//!
//! ```text
//!   write cluster ──subscribe──> ReplicationSession
//!                                      │ apply
//!                                      ▼
//!   SelfRegistrationFeed ──apply──> FanoutEngine ──fan-out──> InterestServer
//!                                                                  │
//!                                                   subscribers (see watch.rs)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use discovery_rs::{
    ClientConfig, FanoutEngine, InstanceRecord, InterestServer, ReadServerMetrics,
    ReplicationConfig, ReplicationSession, SelfRegistrationFeed, ServerConfig, TcpInterestClient,
    TcpRegistrationClient,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let upstream_addr: SocketAddr = args
        .get(1)
        .map(String::as_str)
        .unwrap_or("127.0.0.1:12102")
        .parse()?;
    let bind_addr: SocketAddr = args
        .get(2)
        .map(String::as_str)
        .unwrap_or("0.0.0.0:12103")
        .parse()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("discovery_rs=debug".parse()?)
                .add_directive("read_node=info".parse()?),
        )
        .init();

    let metrics = Arc::new(ReadServerMetrics::new());
    let engine = Arc::new(FanoutEngine::new(metrics.clone()));

    // Upstream replication
    let connector = Arc::new(TcpInterestClient::new(
        ClientConfig::with_addr(upstream_addr),
        metrics.clone(),
    ));
    let session = ReplicationSession::new(
        connector,
        engine.clone(),
        ReplicationConfig::default(),
        metrics.clone(),
    );

    // Advertise this node in its own registry and upstream
    let identity = InstanceRecord::new(format!("read-node-{}", std::process::id()), "discovery-read")
        .vip("discovery-read.vip")
        .address(bind_addr);
    let feed = SelfRegistrationFeed::new(engine.clone(), identity, Duration::from_secs(30))
        .with_upstream(Arc::new(TcpRegistrationClient::new(ClientConfig::with_addr(
            upstream_addr,
        ))));

    // Downstream interest server
    let server = InterestServer::new(ServerConfig::with_addr(bind_addr), engine.clone());

    println!("Read node starting");
    println!("  upstream: {}", upstream_addr);
    println!("  serving:  {}", bind_addr);
    println!();
    println!("Subscribe with: cargo run --example watch -- {}", bind_addr);
    println!();

    // Periodic stats reporter
    let stats_metrics = metrics.clone();
    let stats_engine = engine.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snap = stats_metrics.snapshot();
            println!(
                "Stats: instances={} subscribers={} applied={} dropped={} evicted={}",
                stats_engine.record_count().await,
                stats_engine.subscriber_count().await,
                snap.notifications_applied,
                snap.notifications_dropped,
                snap.subscribers_evicted,
            );
        }
    });

    // One shared shutdown signal; every component gets its own receiver so
    // the feed can withdraw the registration before the process exits.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        println!("\nShutting down...");
        let _ = shutdown_tx.send(true);
    });

    let session_task = tokio::spawn({
        let rx = shutdown_rx.clone();
        async move { session.run_until(shutdown_signal(rx)).await }
    });
    let server_task = tokio::spawn({
        let rx = shutdown_rx.clone();
        async move { server.run_until(shutdown_signal(rx)).await }
    });

    // The feed runs on the main task; run_until returns only after the
    // terminal Delete has been published.
    if let Err(e) = feed.run_until(shutdown_signal(shutdown_rx)).await {
        eprintln!("Self-registration error: {}", e);
    }
    if let Err(e) = session_task.await? {
        eprintln!("Replication error: {}", e);
    }
    if let Err(e) = server_task.await? {
        eprintln!("Server error: {}", e);
    }

    Ok(())
}

async fn shutdown_signal(mut rx: tokio::sync::watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
