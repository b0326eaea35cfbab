//! A mock upstream chat service for exercising the gateway's session bridge
//! (component D) end to end without a real chat backend, modeled on
//! `rt-test-utils`'s `MockWsServer`: bind port 0, accept in a background
//! task, hand each connection to the test once it clears the hello
//! handshake.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use gw_protocol::Mac;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type WsStream = WebSocketStream<TcpStream>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

static SESSION_COUNTER: AtomicU32 = AtomicU32::new(1);

/// One accepted upstream connection, past the hello handshake: the
/// gateway's `UpstreamHello` has already been answered with a generated
/// `session_id`, and the split halves are handed to the test to drive the
/// rest of the dialogue.
pub struct AcceptedSession {
    pub device_id: String,
    pub device_mac: Option<Mac>,
    pub session_id: String,
    pub audio_params: serde_json::Value,
    sink: WsSink,
    stream: WsSource,
}

impl AcceptedSession {
    pub async fn send_text(&mut self, text: &str) {
        self.sink
            .send(Message::Text(text.to_owned()))
            .await
            .expect("mock upstream send_text");
    }

    pub async fn send_binary(&mut self, data: Vec<u8>) {
        self.sink
            .send(Message::Binary(data))
            .await
            .expect("mock upstream send_binary");
    }

    /// Wait for the next text frame, skipping pings/pongs. `None` on close.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(t)) => return Some(t),
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Wait for the next binary frame (an audio packet decrypted and
    /// forwarded by the gateway), skipping pings/pongs. `None` on close.
    pub async fn recv_binary(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Binary(b)) => return Some(b),
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.sink.close().await;
    }
}

/// A mock upstream chat service. Binds to a random port; each test gets its
/// own isolated instance.
pub struct MockUpstream {
    addr: SocketAddr,
    sessions: mpsc::UnboundedReceiver<AcceptedSession>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock upstream listener");
        let addr = listener.local_addr().expect("mock upstream local_addr");
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _peer)) => {
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            let _ = handle_connection(stream, tx).await;
                        });
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            addr,
            sessions: rx,
            _task: task,
        }
    }

    /// The `ws://` URL devices-under-test should be configured to reach.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the gateway to open and complete a hello handshake.
    pub async fn next_session(&mut self) -> Option<AcceptedSession> {
        self.sessions.recv().await
    }
}

async fn handle_connection(
    stream: TcpStream,
    tx: mpsc::UnboundedSender<AcceptedSession>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let captured_device_id = Arc::new(StdMutex::new(None));
    let capture = captured_device_id.clone();
    let callback = move |req: &Request, resp: Response| {
        if let Some(value) = req.headers().get("device-id") {
            if let Ok(s) = value.to_str() {
                *capture.lock().unwrap() = Some(s.to_owned());
            }
        }
        Ok(resp)
    };

    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let (mut sink, mut stream) = ws_stream.split();

    let hello_text = loop {
        match stream.next().await {
            Some(Ok(Message::Text(t))) => break t,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(_)) | None => return Ok(()),
            Some(Err(err)) => return Err(err.into()),
        }
    };
    let hello: serde_json::Value = serde_json::from_str(&hello_text)?;
    let audio_params = hello
        .get("audio_params")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    let session_id = format!("mock-sess-{}", SESSION_COUNTER.fetch_add(1, Ordering::Relaxed));
    let reply = serde_json::json!({
        "type": "hello",
        "session_id": session_id,
        "audio_params": audio_params,
    });
    sink.send(Message::Text(serde_json::to_string(&reply)?))
        .await?;

    let device_id = captured_device_id.lock().unwrap().clone().unwrap_or_default();
    let device_mac = Mac::from_colon_hex(&device_id).ok();

    let _ = tx.send(AcceptedSession {
        device_id,
        device_mac,
        session_id,
        audio_params,
        sink,
        stream,
    });
    Ok(())
}
