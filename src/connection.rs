//! Connection FSM (component B): the per-TCP-socket protocol state machine.
//! Reads framed pub/sub packets, tracks keep-alive, and dispatches PUBLISH
//! payloads either into a device's hello handshake or its live Session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gw_protocol::{parse_client_id, ClientIdError, DeviceEnvelope, DeviceHello, Goodbye, Mac};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, warn};

use crate::admin::PendingResponses;
use crate::codec::{self, FrameDecoder, Packet};
use crate::config::Config;
use crate::registry::DeviceRegistry;
use crate::session::{self, Session};

/// The only hello version this gateway accepts from a device.
const HELLO_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    AwaitConnect,
    Registered,
    Closed,
}

pub struct Connection {
    peer_addr: SocketAddr,
    write_half: AsyncMutex<Option<OwnedWriteHalf>>,
    state: std::sync::Mutex<ConnState>,
    mac: std::sync::Mutex<Option<Mac>>,
    keep_alive_secs: AtomicU64,
    last_activity: std::sync::Mutex<Instant>,
    session: AsyncMutex<Option<Arc<Session>>>,
    closing: AtomicBool,
    close_tx: watch::Sender<bool>,
    close_rx: watch::Receiver<bool>,
}

impl Connection {
    fn new(peer_addr: SocketAddr, write_half: OwnedWriteHalf) -> Arc<Self> {
        let (close_tx, close_rx) = watch::channel(false);
        Arc::new(Self {
            peer_addr,
            write_half: AsyncMutex::new(Some(write_half)),
            state: std::sync::Mutex::new(ConnState::AwaitConnect),
            mac: std::sync::Mutex::new(None),
            keep_alive_secs: AtomicU64::new(0),
            last_activity: std::sync::Mutex::new(Instant::now()),
            session: AsyncMutex::new(None),
            closing: AtomicBool::new(false),
            close_tx,
            close_rx,
        })
    }

    /// Build a Connection with no backing socket, for registry unit tests.
    pub fn new_for_test(peer_addr: SocketAddr) -> Self {
        let (close_tx, close_rx) = watch::channel(false);
        Self {
            peer_addr,
            write_half: AsyncMutex::new(None),
            state: std::sync::Mutex::new(ConnState::AwaitConnect),
            mac: std::sync::Mutex::new(None),
            keep_alive_secs: AtomicU64::new(0),
            last_activity: std::sync::Mutex::new(Instant::now()),
            session: AsyncMutex::new(None),
            closing: AtomicBool::new(false),
            close_tx,
            close_rx,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn mac(&self) -> Option<Mac> {
        *self.mac.lock().unwrap()
    }

    pub fn reply_topic(&self) -> Option<String> {
        self.mac().map(|mac| mac.reply_topic())
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub async fn is_alive(&self) -> bool {
        match &*self.session.lock().await {
            Some(session) => session.is_open(),
            None => false,
        }
    }

    pub async fn current_session(&self) -> Option<Arc<Session>> {
        self.session.lock().await.clone()
    }

    pub(crate) async fn set_session(&self, session: Arc<Session>) {
        *self.session.lock().await = Some(session);
    }

    /// Clear the Session only if it is still the current one -- a Session
    /// that already lost a duplicate-hello race must not clobber the
    /// replacement that took its place.
    pub(crate) async fn clear_session_if_current(&self, session: &Arc<Session>) {
        let mut guard = self.session.lock().await;
        if guard
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            *guard = None;
        }
    }

    fn touch_activity(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// Per the source, the keep-alive comparison is literal: no 1.5x slack
    /// is applied, so a device pinging at exactly the interval can be
    /// closed.
    pub fn check_keep_alive(&self) -> bool {
        let keep_alive = self.keep_alive_secs.load(Ordering::Acquire);
        if keep_alive == 0 {
            return false;
        }
        let last = *self.last_activity.lock().unwrap();
        last.elapsed() > Duration::from_secs(keep_alive)
    }

    async fn send_bytes(&self, bytes: Vec<u8>) {
        let mut guard = self.write_half.lock().await;
        if let Some(write_half) = guard.as_mut() {
            if let Err(err) = write_half.write_all(&bytes).await {
                warn!(peer_addr = %self.peer_addr, %err, "failed to write to device socket");
            }
        }
    }

    /// Publish `payload` on this device's reply topic as a QoS0 PUBLISH.
    /// A no-op if the Connection hasn't registered a MAC yet.
    pub(crate) async fn publish_reply(&self, payload: &[u8]) {
        let Some(topic) = self.reply_topic() else {
            return;
        };
        self.send_bytes(codec::encode_publish(&topic, payload)).await;
    }

    pub(crate) async fn finish_closing_transport(&self) {
        let mut guard = self.write_half.lock().await;
        if let Some(mut write_half) = guard.take() {
            let _ = write_half.shutdown().await;
        }
    }

    /// Tear down the Connection: close any live Session, unblock the read
    /// loop, and shut down the TCP socket.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.lock().unwrap() = ConnState::Closed;
        let _ = self.close_tx.send(true);
        let session = self.session.lock().await.clone();
        if let Some(session) = session {
            session.close().await;
        } else {
            self.finish_closing_transport().await;
        }
    }
}

/// Drive one accepted TCP connection end to end: read framed packets, run
/// the FSM, and clean up the registry entry on exit.
pub async fn run(
    socket: TcpStream,
    peer_addr: SocketAddr,
    registry: DeviceRegistry,
    config_rx: watch::Receiver<Arc<Config>>,
    udp_socket: Arc<UdpSocket>,
    public_ip: String,
    udp_port: u16,
    pending: Arc<PendingResponses>,
) {
    let (mut read_half, write_half) = socket.into_split();
    let conn = Connection::new(peer_addr, write_half);
    let mut close_rx = conn.close_rx.clone();
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 4096];

    'read_loop: loop {
        tokio::select! {
            _ = close_rx.changed() => break 'read_loop,
            result = read_half.read(&mut buf) => {
                match result {
                    Ok(0) => break 'read_loop,
                    Ok(n) => {
                        conn.touch_activity();
                        decoder.feed(&buf[..n]);
                    }
                    Err(err) => {
                        debug!(%peer_addr, %err, "tcp read error");
                        break 'read_loop;
                    }
                }
            }
        }

        loop {
            match decoder.try_decode() {
                Ok(Some(packet)) => {
                    let keep_going = dispatch(
                        &conn,
                        packet,
                        &registry,
                        &config_rx,
                        &udp_socket,
                        &public_ip,
                        udp_port,
                        &pending,
                    )
                    .await;
                    if !keep_going {
                        break 'read_loop;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(%peer_addr, %err, "protocol error, closing connection");
                    break 'read_loop;
                }
            }
        }
    }

    conn.close().await;
    if let Some(mac) = conn.mac() {
        registry.remove(&mac, &conn).await;
    }
}

/// Handle one decoded packet. Returns `false` if the connection must close.
async fn dispatch(
    conn: &Arc<Connection>,
    packet: Packet,
    registry: &DeviceRegistry,
    config_rx: &watch::Receiver<Arc<Config>>,
    udp_socket: &Arc<UdpSocket>,
    public_ip: &str,
    udp_port: u16,
    pending: &Arc<PendingResponses>,
) -> bool {
    let state = *conn.state.lock().unwrap();
    match (state, packet) {
        (ConnState::AwaitConnect, Packet::Connect(connect)) => {
            handle_connect(conn, connect, registry).await
        }
        (ConnState::AwaitConnect, _) => false,
        (ConnState::Registered, Packet::Publish(publish)) => {
            handle_publish(conn, publish, config_rx, udp_socket, public_ip, udp_port, pending).await
        }
        (ConnState::Registered, Packet::Subscribe(subscribe)) => {
            conn.send_bytes(codec::encode_suback(subscribe.packet_id)).await;
            true
        }
        (ConnState::Registered, Packet::PingReq) => {
            conn.send_bytes(codec::encode_pingresp()).await;
            true
        }
        (ConnState::Registered, Packet::Disconnect) => false,
        (ConnState::Registered, Packet::Connect(_)) => false,
        (ConnState::Closed, _) => false,
    }
}

async fn handle_connect(
    conn: &Arc<Connection>,
    connect: codec::ConnectPacket,
    registry: &DeviceRegistry,
) -> bool {
    let mac = match parse_client_id(&connect.client_id) {
        Ok(mac) => mac,
        Err(ClientIdError::MalformedShape | ClientIdError::InvalidMac) => return false,
    };

    *conn.mac.lock().unwrap() = Some(mac);
    conn.keep_alive_secs
        .store(u64::from(connect.keep_alive_secs), Ordering::Release);
    conn.send_bytes(codec::encode_connack(0x00)).await;
    registry.insert(mac, conn.clone()).await;
    *conn.state.lock().unwrap() = ConnState::Registered;
    true
}

async fn handle_publish(
    conn: &Arc<Connection>,
    publish: codec::PublishPacket,
    config_rx: &watch::Receiver<Arc<Config>>,
    udp_socket: &Arc<UdpSocket>,
    public_ip: &str,
    udp_port: u16,
    pending: &Arc<PendingResponses>,
) -> bool {
    if publish.qos != 0 {
        return false;
    }

    let Ok(envelope) = serde_json::from_slice::<DeviceEnvelope>(&publish.payload) else {
        // Not JSON we understand; nothing sensible to do but ignore it.
        return true;
    };

    match envelope.kind.as_str() {
        "hello" => {
            let Ok(hello) = serde_json::from_slice::<DeviceHello>(&publish.payload) else {
                return false;
            };
            if hello.version != HELLO_VERSION {
                return false;
            }
            let Some(mac) = conn.mac() else { return false };
            handle_hello(
                conn,
                mac,
                hello.audio_params,
                config_rx.borrow().clone(),
                udp_socket.clone(),
                public_ip.to_owned(),
                udp_port,
            )
            .await;
            true
        }
        "goodbye" => {
            if let Some(session) = conn.current_session().await {
                session.close().await;
                session.wait_closed().await;
            }
            true
        }
        _ => {
            // A reply to an admin-pushed command is just an ordinary publish
            // from the device's point of view; resolve any admin waiter for
            // this MAC before the normal forwarding logic runs.
            if let Some(mac) = conn.mac() {
                if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&publish.payload) {
                    pending.resolve(&mac, value).await;
                }
            }
            if let Some(session) = conn.current_session().await {
                if let Ok(text) = std::str::from_utf8(&publish.payload) {
                    session.forward_device_text(text).await;
                }
            } else {
                conn.publish_reply(
                    &serde_json::to_vec(&Goodbye::new(envelope.session_id))
                        .expect("Goodbye always serializes"),
                )
                .await;
            }
            true
        }
    }
}

async fn handle_hello(
    conn: &Arc<Connection>,
    mac: Mac,
    audio_params: serde_json::Value,
    config: Arc<Config>,
    udp_socket: Arc<UdpSocket>,
    public_ip: String,
    udp_port: u16,
) {
    if let Some(prior) = conn.current_session().await {
        prior.close().await;
        prior.wait_closed().await;
    }

    match Session::open(conn.clone(), mac, audio_params, config, udp_socket, public_ip, udp_port).await
    {
        Ok(new_session) => conn.set_session(new_session).await,
        Err(err) => {
            warn!(%mac, %err, "session handshake failed");
            session::publish_hello_failed(conn).await;
        }
    }
}
