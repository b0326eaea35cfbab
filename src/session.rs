//! Session bridge (component D): owns one upstream WebSocket for the
//! duration of a device's voice/command dialogue and shuttles messages
//! between it, the device's pub/sub connection, and its UDP audio flow.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use gw_protocol::{
    DeviceError, Goodbye, HelloReply, Mac, UdpTransportDescriptor, UpstreamHello,
    UpstreamHelloReply, HELLO_FAILED_MESSAGE,
};
use tokio::net::UdpSocket;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use crate::config::Config;
use crate::connection::Connection;
use crate::crypto;
use crate::error::SessionError;
use crate::selector::select_chat_server;
use crate::udp::{self, UdpHeader};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Result of offering an inbound UDP datagram to a Session, broken out by
/// rejection category so callers can apply `log_invalid_cookie` only to
/// the category it's specified for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpIngressOutcome {
    Accepted,
    CookieMismatch,
    SequenceRegression,
}

pub struct Session {
    mac: Mac,
    session_id: String,
    cookie: u16,
    key: crypto::Key,
    nonce: crypto::HeaderBytes,
    local_sequence: AtomicU32,
    remote_sequence: AtomicU32,
    udp_peer_addr: AsyncMutex<Option<SocketAddr>>,
    started_at: Instant,
    ws_sink: AsyncMutex<WsSink>,
    udp_socket: Arc<UdpSocket>,
    open: AtomicBool,
    closing: AtomicBool,
    closed: Notify,
}

impl Session {
    /// Run the hello handshake: open the upstream WebSocket, send the
    /// client hello, await the server's hello reply, and publish the
    /// transport descriptor back to the device. Spawns the background
    /// reader that forwards the rest of the dialogue.
    pub async fn open(
        conn: Arc<Connection>,
        mac: Mac,
        audio_params: serde_json::Value,
        config: Arc<Config>,
        udp_socket: Arc<UdpSocket>,
        public_ip: String,
        udp_port: u16,
    ) -> Result<Arc<Self>, SessionError> {
        let cookie = crypto::generate_cookie();
        let key = crypto::generate_key();
        let nonce = UdpHeader::new(0, mac.octets(), cookie, 0).to_bytes();

        let url = select_chat_server(&config, &mac)?;
        let mut request = url.into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("device-id", HeaderValue::from_str(&mac.to_string()).unwrap_or_else(|_| HeaderValue::from_static("unknown")));
        headers.insert("protocol-version", HeaderValue::from_static("1"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.upstream_bearer_token))
                .unwrap_or_else(|_| HeaderValue::from_static("Bearer test-token")),
        );

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (mut sink, mut stream) = ws_stream.split();

        let hello = UpstreamHello::new(audio_params);
        let hello_text = serde_json::to_string(&hello).expect("UpstreamHello always serializes");
        sink.send(Message::Text(hello_text)).await?;

        let reply: UpstreamHelloReply = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => break serde_json::from_str(&text)?,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(_)) => return Err(SessionError::UnexpectedFirstMessage),
                Some(Err(err)) => return Err(SessionError::Upstream(err)),
                None => return Err(SessionError::HandshakeClosed),
            }
        };

        let session = Arc::new(Self {
            mac,
            session_id: reply.session_id.clone(),
            cookie,
            key,
            nonce,
            local_sequence: AtomicU32::new(0),
            remote_sequence: AtomicU32::new(0),
            udp_peer_addr: AsyncMutex::new(None),
            started_at: Instant::now(),
            ws_sink: AsyncMutex::new(sink),
            udp_socket,
            open: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            closed: Notify::new(),
        });

        conn.publish_reply(
            &serde_json::to_vec(&HelloReply {
                kind: "hello".to_owned(),
                session_id: reply.session_id,
                transport: "udp".to_owned(),
                udp: UdpTransportDescriptor {
                    server: public_ip,
                    port: udp_port,
                    encryption: "aes-128-ctr".to_owned(),
                    key: hex::encode(session.key),
                    nonce: hex::encode(session.nonce),
                },
                audio_params: reply.audio_params,
            })
            .expect("HelloReply always serializes"),
        )
        .await;

        tokio::spawn(run_reader(session.clone(), conn, stream));
        Ok(session)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Forward a non-hello, non-goodbye device publish verbatim as a
    /// WebSocket text frame.
    pub async fn forward_device_text(&self, json: &str) {
        let mut sink = self.ws_sink.lock().await;
        if let Err(err) = sink.send(Message::Text(json.to_owned())).await {
            warn!(mac = %self.mac, %err, "failed to forward to upstream");
        }
    }

    /// Decrypt and accept (or reject) an inbound UDP datagram.
    pub async fn handle_udp_ingress(
        &self,
        header: UdpHeader,
        ciphertext: &[u8],
        peer_addr: SocketAddr,
    ) -> UdpIngressOutcome {
        if header.cookie != self.cookie {
            return UdpIngressOutcome::CookieMismatch;
        }
        if header.sequence < self.remote_sequence.load(Ordering::Acquire) {
            return UdpIngressOutcome::SequenceRegression;
        }
        self.remote_sequence.store(header.sequence, Ordering::Release);
        *self.udp_peer_addr.lock().await = Some(peer_addr);

        let mut plaintext = ciphertext.to_vec();
        crypto::apply_keystream(&self.key, &header.to_bytes(), &mut plaintext);

        let mut sink = self.ws_sink.lock().await;
        if let Err(err) = sink.send(Message::Binary(plaintext)).await {
            warn!(mac = %self.mac, %err, "failed to forward audio to upstream");
        }
        UdpIngressOutcome::Accepted
    }

    /// Encrypt `payload` and send it to the device's last-known UDP
    /// address. No-op if no UDP contact has been made yet.
    async fn emit_udp(&self, payload: &[u8]) {
        let Some(peer_addr) = *self.udp_peer_addr.lock().await else {
            return;
        };
        let sequence = self.local_sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let header = UdpHeader::new(payload.len() as u16, self.mac.octets(), self.cookie, sequence);
        let mut ciphertext = payload.to_vec();
        crypto::apply_keystream(&self.key, &header.to_bytes(), &mut ciphertext);
        let datagram = udp::build_datagram(header, &ciphertext);
        if let Err(err) = self.udp_socket.send_to(&datagram, peer_addr).await {
            warn!(mac = %self.mac, %err, "failed to send udp datagram");
        }
    }

    /// Start tearing down the Session: close the WebSocket so the reader
    /// task observes the close and runs `teardown()`. `open` stays true
    /// until `teardown()` actually runs, so `wait_closed()` keeps working
    /// for callers racing this call.
    pub async fn close(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            let mut sink = self.ws_sink.lock().await;
            let _ = sink.close().await;
        }
    }

    /// Await this Session's teardown completing (goodbye published,
    /// removed from its Connection). Used instead of a fixed sleep when
    /// replacing a Session on duplicate hello.
    pub async fn wait_closed(&self) {
        let notified = self.closed.notified();
        if !self.is_open() {
            return;
        }
        notified.await;
    }
}

async fn run_reader(
    session: Arc<Session>,
    conn: Arc<Connection>,
    mut stream: futures_util::stream::SplitStream<WsStream>,
) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                conn.publish_reply(text.as_bytes()).await;
            }
            Some(Ok(Message::Binary(data))) => {
                session.emit_udp(&data).await;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(err)) => {
                warn!(mac = %session.mac, %err, "upstream websocket error");
                break;
            }
        }
    }

    teardown(&session, &conn).await;
}

async fn teardown(session: &Arc<Session>, conn: &Arc<Connection>) {
    session.open.store(false, Ordering::Release);
    conn.publish_reply(
        &serde_json::to_vec(&Goodbye::new(Some(session.session_id.clone())))
            .expect("Goodbye always serializes"),
    )
    .await;
    info!(
        mac = %session.mac,
        session_id = %session.session_id,
        elapsed_secs = session.started_at.elapsed().as_secs_f64(),
        "session ended"
    );
    conn.clear_session_if_current(session).await;
    session.closed.notify_waiters();
    if conn.is_closing() {
        conn.finish_closing_transport().await;
    }
}

/// Publish the fixed handshake-failure error to the device's reply topic.
pub async fn publish_hello_failed(conn: &Connection) {
    conn.publish_reply(
        &serde_json::to_vec(&DeviceError::new(HELLO_FAILED_MESSAGE))
            .expect("DeviceError always serializes"),
    )
    .await;
}
