//! gw-protocol: wire types shared between the device-facing pub/sub JSON
//! payloads and the upstream chat-service WebSocket JSON payloads.
//!
//! Device identifiers, hello/goodbye/error envelopes, and the UDP transport
//! descriptor handed to devices at hello time all live here so that both the
//! gateway binary and its test support crate can speak the same shapes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed six-octet MAC address, always rendered lowercase with `:` separators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mac([u8; 6]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientIdError {
    #[error("client-id does not contain the expected \"@@@\"-delimited segments")]
    MalformedShape,
    #[error("MAC segment does not match the expected hex-octet grammar")]
    InvalidMac,
}

impl Mac {
    /// Parse a MAC from the underscore-separated form embedded in a client-id
    /// (e.g. `a0_85_e3_f4_49_34`), after lowercasing.
    pub fn from_underscored(segment: &str) -> Result<Self, ClientIdError> {
        let colonized = segment.to_ascii_lowercase().replace('_', ":");
        Self::from_colon_hex(&colonized)
    }

    /// Parse a MAC from its canonical colon-hex form (`aa:bb:cc:dd:ee:ff`).
    pub fn from_colon_hex(s: &str) -> Result<Self, ClientIdError> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(ClientIdError::InvalidMac);
        }
        let mut octets = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ClientIdError::InvalidMac);
            }
            octets[i] = u8::from_str_radix(part, 16).map_err(|_| ClientIdError::InvalidMac)?;
        }
        Ok(Self(octets))
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// The pub/sub reply topic for this device: `devices/p2p/<mac>`.
    pub fn reply_topic(&self) -> String {
        format!("devices/p2p/{self}")
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// The device-id grammar is `<board>@@@<mac-underscored>@@@<uuid>`: three
/// `@@@`-delimited segments, with the MAC in the middle. See DESIGN.md for
/// the reasoning behind this reading.
pub fn parse_client_id(client_id: &str) -> Result<Mac, ClientIdError> {
    let parts: Vec<&str> = client_id.split("@@@").collect();
    if parts.len() != 3 {
        return Err(ClientIdError::MalformedShape);
    }
    Mac::from_underscored(parts[1])
}

// ---------------------------------------------------------------------------
// Device <-> gateway pub/sub JSON payloads (carried as PUBLISH payload bytes)
// ---------------------------------------------------------------------------

/// The device's hello payload, parsed from a QoS0 PUBLISH whose JSON body has
/// `"type": "hello"`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceHello {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u32,
    #[serde(default)]
    pub audio_params: serde_json::Value,
}

/// Generic envelope used to sniff the `type` field of an inbound device
/// publish before deciding how to deserialize the rest of it.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Present on replies to an admin-issued command (§6, HTTP admin).
    #[serde(default)]
    pub command_id: Option<String>,
}

/// Transport descriptor handed to the device in the hello reply once a
/// Session's UDP channel is ready.
#[derive(Debug, Clone, Serialize)]
pub struct UdpTransportDescriptor {
    pub server: String,
    pub port: u16,
    pub encryption: String,
    pub key: String,
    pub nonce: String,
}

/// The gateway's hello-reply publish on the device's reply topic.
#[derive(Debug, Clone, Serialize)]
pub struct HelloReply {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: String,
    pub transport: String,
    pub udp: UdpTransportDescriptor,
    pub audio_params: serde_json::Value,
}

/// The gateway's goodbye publish on the device's reply topic (also used as
/// the device's own goodbye payload on ingest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goodbye {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: Option<String>,
}

impl Goodbye {
    pub fn new(session_id: impl Into<Option<String>>) -> Self {
        Self {
            kind: "goodbye".to_owned(),
            session_id: session_id.into(),
        }
    }
}

/// An error payload published back to the device on its reply topic.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl DeviceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: "error".to_owned(),
            message: message.into(),
        }
    }
}

/// The fixed-Chinese error text the spec requires for a failed hello
/// handshake (kept verbatim for wire compatibility with existing devices).
pub const HELLO_FAILED_MESSAGE: &str = "处理 hello 消息失败";

// ---------------------------------------------------------------------------
// Gateway <-> upstream chat-service WebSocket JSON payloads
// ---------------------------------------------------------------------------

/// The hello the gateway sends to the upstream chat service once the
/// WebSocket connects.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamHello {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u32,
    pub transport: String,
    pub audio_params: serde_json::Value,
}

impl UpstreamHello {
    pub fn new(audio_params: serde_json::Value) -> Self {
        Self {
            kind: "hello".to_owned(),
            version: 1,
            transport: "websocket".to_owned(),
            audio_params,
        }
    }
}

/// The upstream's hello reply, the first text frame the gateway expects
/// after sending `UpstreamHello`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamHelloReply {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: String,
    #[serde(default)]
    pub audio_params: serde_json::Value,
}
