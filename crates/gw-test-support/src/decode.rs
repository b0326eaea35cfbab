//! Minimal frame reader for the reply side of the wire subset, so tests can
//! read whatever the gateway writes back without depending on `gatewayd`.

use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPacket {
    ConnAck(u8),
    SubAck(u16, u8),
    PingResp,
    Publish { topic: String, payload: Vec<u8> },
    Unknown(u8),
}

fn decode_varint(buf: &[u8]) -> Option<(usize, usize)> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, &byte) in buf.iter().enumerate() {
        value += usize::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        multiplier *= 128;
        if i == 3 {
            return None;
        }
    }
    None
}

/// Read exactly one complete frame off `stream`, blocking until enough
/// bytes arrive. Panics on EOF or a malformed length -- tests should fail
/// loudly rather than hang.
pub async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> ReplyPacket {
    let mut header_byte = [0u8; 1];
    stream
        .read_exact(&mut header_byte)
        .await
        .expect("read header byte");
    let header_byte = header_byte[0];

    let mut len_bytes = Vec::new();
    let remaining_len = loop {
        let mut b = [0u8; 1];
        stream.read_exact(&mut b).await.expect("read length byte");
        len_bytes.push(b[0]);
        if let Some((value, used)) = decode_varint(&len_bytes) {
            debug_assert_eq!(used, len_bytes.len());
            break value;
        }
        assert!(len_bytes.len() <= 4, "remaining-length varint too long");
    };

    let mut body = vec![0u8; remaining_len];
    stream.read_exact(&mut body).await.expect("read body");

    match header_byte {
        0x20 => ReplyPacket::ConnAck(body[1]),
        0x90 => ReplyPacket::SubAck(u16::from_be_bytes([body[0], body[1]]), body[2]),
        0xD0 => ReplyPacket::PingResp,
        b if b & 0xF0 == 0x30 => {
            let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
            let topic = String::from_utf8(body[2..2 + topic_len].to_vec()).expect("topic utf8");
            let payload = body[2 + topic_len..].to_vec();
            ReplyPacket::Publish { topic, payload }
        }
        other => ReplyPacket::Unknown(other),
    }
}

/// Parse a PUBLISH payload as JSON, for asserting on gateway-issued
/// hello/goodbye/error replies.
pub fn decode_publish_json(packet: &ReplyPacket) -> serde_json::Value {
    match packet {
        ReplyPacket::Publish { payload, .. } => {
            serde_json::from_slice(payload).expect("publish payload is json")
        }
        other => panic!("expected Publish, got {other:?}"),
    }
}
