//! Headless runner for a `pastry-net` [`Cluster`]: CLI parsing, layered
//! config, tracing setup, and a small stdin-driven demo application. This
//! is the "host" spec.md treats as an external collaborator — everything
//! here sits outside the core DHT logic in `pastry-core`/`pastry-net`.

mod app;
mod cli;
mod settings;

use app::LoggingApp;
use clap::Parser;
use cli::{Cli, Command};
use pastry_core::NodeId;
use pastry_net::{AllowAll, Cluster, ClusterConfig, CredentialsProvider, SharedSecret};
use settings::Settings;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
}

/// Nodes in this demo derive their id by hashing their own addressing
/// triple. A production host would persist a generated id across
/// restarts instead; spec.md leaves id provenance to the host.
fn derive_self_id(settings: &Settings) -> NodeId {
    let seed = format!(
        "{}|{}|{}",
        settings.region, settings.local_addr, settings.global_addr
    );
    NodeId::from_digest(seed.as_bytes())
}

fn build_cluster(settings: &Settings) -> anyhow::Result<Cluster> {
    let bind_addr = settings.bind_addr()?;
    let config = ClusterConfig {
        self_id: derive_self_id(settings),
        region: settings.region.clone(),
        region_penalty: settings.region_penalty,
        local_addr: settings.local_addr.clone(),
        global_addr: settings.global_addr.clone(),
        bind_addr,
        heartbeat_interval_secs: settings.heartbeat_interval_secs,
        network_timeout: Duration::from_secs(settings.network_timeout_secs),
        credentials: settings.credential_bytes(),
    };

    let credentials: Arc<dyn CredentialsProvider> = match &settings.credentials {
        Some(_) => Arc::new(SharedSecret(settings.credential_bytes())),
        None => Arc::new(AllowAll),
    };

    let cluster = Cluster::new(
        config,
        Arc::new(pastry_net::TcpTransport),
        credentials,
        Arc::new(LoggingApp),
    );
    Ok(cluster)
}

async fn run_bootstrap(cluster: &Cluster, settings: &Settings) {
    for seed in &settings.bootstrap {
        match seed.parse() {
            Ok(addr) => match cluster.join(addr).await {
                Ok(()) => tracing::info!(%seed, "joined via bootstrap seed"),
                Err(e) => tracing::warn!(%seed, error = %e, "bootstrap join failed"),
            },
            Err(e) => tracing::warn!(%seed, error = %e, "invalid bootstrap address"),
        }
    }
}

async fn run_headless(cluster: Cluster, settings: &Settings) -> anyhow::Result<()> {
    cluster.listen().await?;
    run_bootstrap(&cluster, settings).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    rx.recv().await;

    tracing::info!("shutting down");
    cluster.stop().await;
    Ok(())
}

async fn run_interactive(cluster: Cluster, settings: &Settings) -> anyhow::Result<()> {
    cluster.listen().await?;
    run_bootstrap(&cluster, settings).await;

    println!("commands: join <addr> | send <hex-key> <text> | leave | quit");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("join") => {
                let Some(addr) = parts.next() else {
                    println!("usage: join <addr>");
                    continue;
                };
                match addr.parse() {
                    Ok(addr) => match cluster.join(addr).await {
                        Ok(()) => println!("joined {addr}"),
                        Err(e) => println!("join failed: {e}"),
                    },
                    Err(e) => println!("bad address: {e}"),
                }
            }
            Some("send") => {
                let (Some(key_hex), Some(rest)) = (parts.next(), parts.next()) else {
                    println!("usage: send <hex-key> <text>");
                    continue;
                };
                let message = std::iter::once(rest)
                    .chain(parts)
                    .collect::<Vec<_>>()
                    .join(" ");
                match decode_key(key_hex) {
                    Ok(key) => match cluster
                        .send(pastry_core::APPLICATION_PURPOSE_FLOOR, key, message.into_bytes())
                        .await
                    {
                        Ok(()) => println!("sent"),
                        Err(e) => println!("send failed: {e}"),
                    },
                    Err(e) => println!("bad key: {e}"),
                }
            }
            Some("leave") => {
                cluster.stop().await;
                println!("left the ring; exiting");
                return Ok(());
            }
            Some("quit") => {
                cluster.kill().await;
                return Ok(());
            }
            Some(other) => println!("unknown command: {other}"),
            None => {}
        }
        io::stdout().flush().ok();
    }
    cluster.kill().await;
    Ok(())
}

fn decode_key(hex_str: &str) -> anyhow::Result<NodeId> {
    let bytes = hex::decode(hex_str)?;
    Ok(NodeId::from_bytes(&bytes)?)
}

async fn run_send_once(cluster: Cluster, seed: &str, key: &str, message: &str) -> anyhow::Result<()> {
    cluster.listen().await?;
    let seed_addr = seed.parse()?;
    cluster.join(seed_addr).await?;
    let key = decode_key(key)?;
    cluster
        .send(pastry_core::APPLICATION_PURPOSE_FLOOR, key, message.as_bytes().to_vec())
        .await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    cluster.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(Some(&cli.config))?;
    if let Some(port) = cli.port {
        settings.listen_port = port;
    }
    if let Some(region) = cli.region {
        settings.region = region;
    }

    init_tracing(settings.log_level.as_filter());
    let cluster = build_cluster(&settings)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_headless(cluster, &settings).await,
        Command::Interactive => run_interactive(cluster, &settings).await,
        Command::Send { seed, key, message } => {
            run_send_once(cluster, &seed, &key, &message).await
        }
    }
}
