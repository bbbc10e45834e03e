//! meshlinkd - peer link controller daemon for a mesh overlay router
//!
//! Loads a controller configuration, binds one UDP link-layer transport,
//! bootstraps any statically configured peers, and serves the admin HTTP
//! API alongside the background ping/beacon tick loop.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Mutex;
use tracing_subscriber::{fmt, EnvFilter};

use meshlinkd::clock::SystemClock;
use meshlinkd::config::MeshConfig;
use meshlinkd::controller::Controller;
use meshlinkd::error::MeshError;
use meshlinkd::eventbus::InMemoryEventBus;
use meshlinkd::link::BeaconMode;
use meshlinkd::rng::SystemRng;
use meshlinkd::switch::InMemorySwitch;
use meshlinkd::transport_link::{LinkAddr, LinkTransport, UdpTransport};

/// meshlinkd - peer link controller for a mesh overlay router
#[derive(Parser, Debug)]
#[command(name = "meshlinkd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the controller configuration file
    #[arg(short, long)]
    config: std::path::PathBuf,

    /// Address the admin HTTP API binds to
    #[arg(long, default_value = "127.0.0.1:7946")]
    http_addr: SocketAddr,

    /// Capacity of the in-memory packet switch's interface table
    #[arg(long, default_value_t = 1024)]
    switch_capacity: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    fmt().with_env_filter(filter).with_target(false).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(args: Args) -> Result<(), MeshError> {
    tracing::info!(path = %args.config.display(), "loading configuration");
    let config = MeshConfig::from_file(&args.config)?;

    let switch = Arc::new(InMemorySwitch::new(args.switch_capacity));
    let events = Arc::new(InMemoryEventBus::new());

    let event_bus: Arc<dyn meshlinkd::eventbus::EventBus> = events.clone();
    let mut controller = Controller::new(
        switch,
        event_bus,
        Arc::new(SystemClock),
        Box::new(SystemRng),
        config.interface.private_key,
        config.interface.beacon_password,
        config.interface.protocol_version,
        config.interface.tuning,
    );

    let mut transport_builder = UdpTransport::bind(config.interface.listen_addr).await?;
    if let Some(broadcast_addr) = config.interface.broadcast_addr {
        transport_builder = transport_builder.with_broadcast_addr(broadcast_addr);
    }
    let transport: Arc<dyn LinkTransport> = Arc::new(transport_builder);

    let if_num = controller.new_interface("mesh0", transport.clone());
    if config.interface.broadcast_addr.is_some() {
        controller.set_beacon_state(if_num, BeaconMode::Accept).await.ok();
    }

    for peer in &config.peers {
        let lladdr = LinkAddr::from_socket_addr(peer.endpoint);
        if let Err(e) = controller
            .bootstrap_peer(if_num, peer.public_key, lladdr, &peer.password)
            .await
        {
            tracing::warn!(endpoint = %peer.endpoint, error = %e, "failed to bootstrap peer");
        }
    }

    let controller = Arc::new(Mutex::new(controller));
    let state = meshlinkd::admin::AppState::new(controller.clone(), events);
    let router = meshlinkd::admin::routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(args.http_addr)
        .await
        .map_err(MeshError::System)?;
    tracing::info!(addr = %args.http_addr, "admin API listening");

    let recv_task = spawn_recv_loop(controller.clone(), transport, if_num);
    let tick_task = spawn_tick_loop(controller.clone(), config.interface.tuning);

    let shutdown = shutdown_signal();
    tokio::select! {
        result = axum::serve(listener, router) => {
            result.map_err(|e| MeshError::System(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        }
        _ = shutdown => {
            tracing::info!("shutting down");
        }
    }

    recv_task.abort();
    tick_task.abort();
    Ok(())
}

fn spawn_recv_loop(
    controller: Arc<Mutex<Controller>>,
    transport: Arc<dyn LinkTransport>,
    if_num: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match transport.recv().await {
                Ok(frame) => {
                    let mut controller = controller.lock().await;
                    if let Err(e) = controller.handle_inbound(if_num, frame).await {
                        tracing::warn!(error = %e, "failed to handle inbound frame");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transport receive failed");
                }
            }
        }
    })
}

fn spawn_tick_loop(
    controller: Arc<Mutex<Controller>>,
    tuning: meshlinkd::controller::TuningConstants,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ping_tick = tokio::time::interval(Duration::from_millis(tuning.ping_interval as u64));
        let mut beacon_tick =
            tokio::time::interval(Duration::from_millis(tuning.beacon_interval as u64));
        loop {
            tokio::select! {
                _ = ping_tick.tick() => {
                    controller.lock().await.ping_tick().await;
                }
                _ = beacon_tick.tick() => {
                    controller.lock().await.beacon_tick().await;
                }
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
