/*
 * SHM RELAY - SYSTEM ENTRY POINT
 * =================================================================
 * Component: src/main.rs
 * Responsibility: Host a named shared buffer (and its relay port) or attach to one remotely.
 * =================================================================
 */

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use shm_relay::buffer::{generate_name, LocalBuffer, SharedBuffer};
use shm_relay::cli::{Cli, Command, HostArgs, RemoteArgs, WriteArgs};
use shm_relay::console::run_console;
use shm_relay::session::{RefreshSession, SessionHandle};
use shm_relay::transport::{ConnectionManager, HostEvent, RemoteBuffer};
use shm_relay::utils::config_loader::RelayConfig;
use shm_relay::utils::logger::init_logger;
use shm_relay::utils::net::local_ip;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = RelayConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let _guard = init_logger(&config.logging);
    debug!("SHM RELAY {} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Host(args) => run_host(&config, args).await,
        Command::Connect(args) => run_connect(&config, args).await,
        Command::Read(args) => run_read(&config, args).await,
        Command::Write(args) => run_write(&config, args).await,
    }
}

async fn run_host(config: &RelayConfig, args: HostArgs) -> anyhow::Result<()> {
    let name = args
        .name
        .or_else(|| config.host.buffer_name.clone())
        .unwrap_or_else(generate_name);
    let bind: SocketAddr = match args.bind {
        Some(addr) => addr,
        None => config.host.bind_addr()?,
    };

    let region = SharedBuffer::create(&name).with_context(|| format!("creating buffer '{}'", name))?;
    let buffer = Arc::new(LocalBuffer::new(region, config.host.lock_timeout()));
    let manager = ConnectionManager::bind(bind, Arc::clone(&buffer)).await?;
    let port = manager.local_addr()?.port();

    println!("Buffer name : {}", name);
    println!("Relay at    : {}:{}", local_ip(), port);

    let events = manager.subscribe();
    let server = manager.spawn()?;
    let (handle, session) = RefreshSession::spawn(Arc::clone(&buffer), config.client.refresh_interval());
    let forwarder = tokio::spawn(forward_host_events(events, handle.clone()));

    let outcome = run_console(&handle, &name).await;

    forwarder.abort();
    handle.shutdown().await;
    if let Err(e) = session.await {
        warn!("SESSION: task ended abnormally: {}", e);
    }
    server.shutdown().await?;
    info!("HOST: buffer '{}' released", name);
    drop(buffer);

    outcome.map_err(Into::into)
}

/// Remote writes and sync markers trigger an immediate local refresh.
async fn forward_host_events(mut events: broadcast::Receiver<HostEvent>, handle: SessionHandle) {
    loop {
        match events.recv().await {
            Ok(event) => {
                debug!("HOST: {:?} from {} at {}", event.kind, event.peer, event.at);
                if event.kind.wants_refresh() && handle.refresh().await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("HOST: skipped {} events", skipped);
                if handle.refresh().await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn open_remote(config: &RelayConfig, args: &RemoteArgs) -> anyhow::Result<RemoteBuffer> {
    RemoteBuffer::open(args.addr.clone(), args.name.clone(), config.client.timeouts())
        .await
        .with_context(|| format!("connecting to '{}' at {}", args.name, args.addr))
}

async fn run_connect(config: &RelayConfig, args: RemoteArgs) -> anyhow::Result<()> {
    let remote = open_remote(config, &args).await?;
    let (handle, session) = RefreshSession::spawn(remote, config.client.refresh_interval());

    let outcome = run_console(&handle, &args.name).await;

    handle.shutdown().await;
    match session.await {
        Ok(mut remote) => remote.close().await,
        Err(e) => warn!("SESSION: task ended abnormally: {}", e),
    }
    outcome.map_err(Into::into)
}

async fn run_read(config: &RelayConfig, args: RemoteArgs) -> anyhow::Result<()> {
    let mut remote = open_remote(config, &args).await?;
    let result = remote.remote_read().await;
    remote.close().await;

    println!("{}", result?);
    Ok(())
}

async fn run_write(config: &RelayConfig, args: WriteArgs) -> anyhow::Result<()> {
    let mut remote = open_remote(config, &args.remote).await?;
    let result = remote.remote_write(&args.text).await;
    remote.close().await;

    result?;
    info!("WRITE: {} bytes sent to '{}'", args.text.trim_end().len(), args.remote.name);
    Ok(())
}
