//! Error taxonomy for the gateway. One `thiserror`-derived enum per
//! subsystem -- leaf variants wrap the underlying library error with
//! `#[from]`, plus named protocol-violation variants -- rather than a
//! single catch-all.

use thiserror::Error;

/// Errors raised while decoding or encoding pub/sub control packets.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("variable-length integer is malformed or exceeds 4 bytes")]
    MalformedLength,
    #[error("packet exceeds the {0} byte limit")]
    PacketTooLarge(usize),
    #[error("unexpected or unsupported packet type byte 0x{0:02x}")]
    UnknownPacketType(u8),
    #[error("packet is truncated")]
    Truncated,
    #[error("CONNECT packet is malformed")]
    MalformedConnect,
    #[error("PUBLISH packet is malformed")]
    MalformedPublish,
    #[error("SUBSCRIBE packet is malformed")]
    MalformedSubscribe,
    #[error("payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Errors raised while establishing or running a device Session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no chat server configured for this device class")]
    NoUpstreamConfigured,
    #[error("upstream WebSocket error: {0}")]
    Upstream(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("upstream closed before completing the hello handshake")]
    HandshakeClosed,
    #[error("upstream hello reply was not valid JSON: {0}")]
    MalformedHelloReply(#[from] serde_json::Error),
    #[error("upstream sent a non-hello message before completing the handshake")]
    UnexpectedFirstMessage,
}

/// Errors raised while loading or validating `mqtt.json`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by the HTTP admin surface.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("missing or malformed Authorization header")]
    MissingBearer,
    #[error("bearer token does not match the expected daily signature")]
    BadBearer,
    #[error("no device registered for that MAC")]
    UnknownDevice,
    #[error("timed out waiting for a paired device response")]
    Timeout,
}
