//! Process wiring & shutdown (component L) plus the TCP/UDP acceptors
//! (component H): binds the pub/sub, UDP, and admin listeners, starts the
//! background tasks, and drains everything on SIGINT/SIGTERM, exactly as
//! `services/server/src/main.rs` wires up its own listener + graceful
//! shutdown.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gatewayd::admin::{self, AdminState, PendingResponses};
use gatewayd::config;
use gatewayd::connection;
use gatewayd::registry::DeviceRegistry;
use gatewayd::sweeper;
use gatewayd::udp;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_UDP_PORT: u16 = 8884;
const DEFAULT_ADMIN_PORT: u16 = 8007;
const DEFAULT_PUBLIC_IP: &str = "mqtt.xiaozhi.me";
const DEFAULT_CONFIG_PATH: &str = "mqtt.json";
/// Per §5: wait this long for Session goodbyes to drain before closing the
/// listeners and exiting.
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(300);

fn env_port(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL")
        .or_else(|_| env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let mqtt_port = env_port("MQTT_PORT", DEFAULT_MQTT_PORT);
    let udp_port = env_port("UDP_PORT", DEFAULT_UDP_PORT);
    let admin_port = env_port("ADMIN_PORT", DEFAULT_ADMIN_PORT);
    let public_ip = env::var("PUBLIC_IP").unwrap_or_else(|_| DEFAULT_PUBLIC_IP.to_owned());
    let signature_key = env::var("MQTT_SIGNATURE_KEY").unwrap_or_default();
    let config_path =
        env::var("MQTT_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());

    let (config_rx, _config_watch_handle) =
        match config::load_and_watch(PathBuf::from(&config_path)).await {
            Ok(v) => v,
            Err(err) => {
                error!(%err, "failed to load configuration");
                std::process::exit(1);
            }
        };

    let registry = DeviceRegistry::new();
    let pending = PendingResponses::new();

    let udp_socket = match UdpSocket::bind(("0.0.0.0", udp_port)).await {
        Ok(socket) => Arc::new(socket),
        Err(err) => {
            error!(%err, port = udp_port, "failed to bind udp listener");
            std::process::exit(1);
        }
    };

    let tcp_listener = match TcpListener::bind(("0.0.0.0", mqtt_port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, port = mqtt_port, "failed to bind tcp listener");
            std::process::exit(1);
        }
    };

    let admin_addr = SocketAddr::from(([0, 0, 0, 0], admin_port));
    let admin_listener = match TcpListener::bind(admin_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, port = admin_port, "failed to bind admin listener");
            std::process::exit(1);
        }
    };

    info!(mqtt_port, udp_port, admin_port, "gatewayd listening");

    tokio::spawn(sweeper::run(registry.clone()));
    tokio::spawn(udp::run_mux(
        udp_socket.clone(),
        registry.clone(),
        config_rx.clone(),
    ));

    let admin_state = AdminState::new(registry.clone(), signature_key, pending.clone());
    tokio::spawn(async move {
        if let Err(err) = axum::serve(admin_listener, admin::router(admin_state)).await {
            error!(%err, "admin http server exited");
        }
    });

    let accept_task = tokio::spawn(accept_loop(
        tcp_listener,
        registry.clone(),
        config_rx,
        udp_socket,
        public_ip,
        udp_port,
        pending,
    ));

    shutdown_signal().await;
    info!("shutdown signal received, draining connections");

    accept_task.abort();
    for conn in registry.iterate().await {
        conn.close().await;
    }
    tokio::time::sleep(SHUTDOWN_DRAIN).await;
    info!("gatewayd shut down gracefully");
}

async fn accept_loop(
    tcp_listener: TcpListener,
    registry: DeviceRegistry,
    config_rx: tokio::sync::watch::Receiver<Arc<config::Config>>,
    udp_socket: Arc<UdpSocket>,
    public_ip: String,
    udp_port: u16,
    pending: Arc<PendingResponses>,
) {
    loop {
        match tcp_listener.accept().await {
            Ok((socket, peer_addr)) => {
                let registry = registry.clone();
                let config_rx = config_rx.clone();
                let udp_socket = udp_socket.clone();
                let public_ip = public_ip.clone();
                let pending = pending.clone();
                tokio::spawn(async move {
                    connection::run(
                        socket, peer_addr, registry, config_rx, udp_socket, public_ip, udp_port,
                        pending,
                    )
                    .await;
                });
            }
            Err(err) => {
                warn!(%err, "tcp accept failed");
            }
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C"); }
        _ = terminate => { info!("received SIGTERM"); }
    }
}
