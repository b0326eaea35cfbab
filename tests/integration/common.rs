//! Shared harness for the gateway's end-to-end integration tests: spins up
//! a real `Connection`/`Session`/registry stack against ephemeral TCP/UDP
//! listeners, the way `rt-test-utils`'s mock server gives the forwarder/
//! receiver suite something real to dial into.

use std::net::SocketAddr;
use std::sync::Arc;

use gatewayd::admin::PendingResponses;
use gatewayd::config::{Config, DevelopmentBucket, ProductionBucket};
use gatewayd::connection;
use gatewayd::registry::DeviceRegistry;
use gatewayd::udp;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::watch;

pub const HELLO_VERSION: u32 = 3;

pub fn config_with_upstream(upstream_url: &str) -> Config {
    Config {
        debug: false,
        log_invalid_cookie: true,
        upstream_bearer_token: "test-token".to_owned(),
        development: DevelopmentBucket::default(),
        production: ProductionBucket {
            chat_servers: vec![upstream_url.to_owned()],
        },
    }
}

/// One running gateway instance: its own TCP/UDP listeners, registry, and
/// accept loop, wired to a fixed `Config` snapshot.
pub struct Gateway {
    pub tcp_addr: SocketAddr,
    pub udp_addr: SocketAddr,
    pub registry: DeviceRegistry,
    pub pending: Arc<PendingResponses>,
    _accept_task: tokio::task::JoinHandle<()>,
    _mux_task: tokio::task::JoinHandle<()>,
}

impl Gateway {
    pub async fn start(config: Config) -> Self {
        let tcp_listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test tcp listener");
        let tcp_addr = tcp_listener.local_addr().expect("tcp local_addr");
        let udp_socket = Arc::new(
            UdpSocket::bind("127.0.0.1:0")
                .await
                .expect("bind test udp socket"),
        );
        let udp_addr = udp_socket.local_addr().expect("udp local_addr");

        let (config_tx, config_rx) = watch::channel(Arc::new(config));
        // Held for the Gateway's lifetime so the receiver stays valid; no
        // test reconfigures a running instance mid-flight.
        std::mem::forget(config_tx);

        let registry = DeviceRegistry::new();
        let pending = PendingResponses::new();

        let mux_task = tokio::spawn(udp::run_mux(
            udp_socket.clone(),
            registry.clone(),
            config_rx.clone(),
        ));

        let accept_registry = registry.clone();
        let accept_pending = pending.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let (socket, peer_addr) = match tcp_listener.accept().await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                let registry = accept_registry.clone();
                let config_rx = config_rx.clone();
                let udp_socket = udp_socket.clone();
                let pending = accept_pending.clone();
                tokio::spawn(async move {
                    connection::run(
                        socket,
                        peer_addr,
                        registry,
                        config_rx,
                        udp_socket,
                        "127.0.0.1".to_owned(),
                        udp_addr.port(),
                        pending,
                    )
                    .await;
                });
            }
        });

        Self {
            tcp_addr,
            udp_addr,
            registry,
            pending,
            _accept_task: accept_task,
            _mux_task: mux_task,
        }
    }

    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.tcp_addr)
            .await
            .expect("connect to gateway")
    }
}

pub fn client_id(board: &str, mac_underscored: &str, uuid: &str) -> String {
    format!("{board}@@@{mac_underscored}@@@{uuid}")
}
