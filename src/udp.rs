//! UDP codec and mux (component C): parses the 16-byte framed datagrams the
//! audio channel uses, and routes inbound ones to the right device Session
//! by the MAC embedded in the header.

use std::net::SocketAddr;
use std::sync::Arc;

use gw_protocol::Mac;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::registry::DeviceRegistry;
use crate::session::UdpIngressOutcome;

pub const HEADER_LEN: usize = 16;
const DATAGRAM_TYPE_AUDIO: u8 = 1;

/// The 16-byte UDP header. Also doubles as the AES-CTR IV (§4.C) -- callers
/// that need the IV just use `to_bytes()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub packet_type: u8,
    pub flags: u8,
    pub payload_len: u16,
    pub mac: [u8; 6],
    pub cookie: u16,
    pub sequence: u32,
}

impl UdpHeader {
    pub fn new(payload_len: u16, mac: [u8; 6], cookie: u16, sequence: u32) -> Self {
        Self {
            packet_type: DATAGRAM_TYPE_AUDIO,
            flags: 0,
            payload_len,
            mac,
            cookie,
            sequence,
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.packet_type;
        out[1] = self.flags;
        out[2..4].copy_from_slice(&self.payload_len.to_be_bytes());
        out[4..10].copy_from_slice(&self.mac);
        out[10..12].copy_from_slice(&self.cookie.to_be_bytes());
        out[12..16].copy_from_slice(&self.sequence.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Self {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes[4..10]);
        Self {
            packet_type: bytes[0],
            flags: bytes[1],
            payload_len: u16::from_be_bytes([bytes[2], bytes[3]]),
            mac,
            cookie: u16::from_be_bytes([bytes[10], bytes[11]]),
            sequence: u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }
}

/// Parse a raw inbound datagram into its header and ciphertext, or `None`
/// if it fails the `type == 1` / length sanity checks (dropped silently
/// per §7).
pub fn parse_datagram(datagram: &[u8]) -> Option<(UdpHeader, &[u8])> {
    if datagram.len() < HEADER_LEN {
        return None;
    }
    let mut header_bytes = [0u8; HEADER_LEN];
    header_bytes.copy_from_slice(&datagram[..HEADER_LEN]);
    let header = UdpHeader::from_bytes(&header_bytes);
    if header.packet_type != DATAGRAM_TYPE_AUDIO {
        return None;
    }
    let payload_len = header.payload_len as usize;
    if datagram.len() < HEADER_LEN + payload_len {
        return None;
    }
    Some((header, &datagram[HEADER_LEN..HEADER_LEN + payload_len]))
}

/// Build an outbound datagram: header (fresh copy each call, never a shared
/// buffer -- see Design Notes) followed by the already-encrypted payload.
pub fn build_datagram(header: UdpHeader, ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(ciphertext);
    out
}

/// Receive loop: read datagrams off `socket`, look up the owning Connection
/// by embedded MAC, and hand the frame to its Session for decryption and
/// sequence acceptance. Unroutable or malformed datagrams are dropped.
pub async fn run_mux(
    socket: Arc<UdpSocket>,
    registry: DeviceRegistry,
    config_rx: tokio::sync::watch::Receiver<Arc<Config>>,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        let (len, peer_addr) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(err) => {
                warn!(%err, "udp recv_from failed");
                continue;
            }
        };
        handle_datagram(&buf[..len], peer_addr, &registry, &config_rx).await;
    }
}

async fn handle_datagram(
    datagram: &[u8],
    peer_addr: SocketAddr,
    registry: &DeviceRegistry,
    config_rx: &tokio::sync::watch::Receiver<Arc<Config>>,
) {
    let Some((header, ciphertext)) = parse_datagram(datagram) else {
        trace!("dropping malformed udp datagram");
        return;
    };
    let mac = Mac::from_colon_hex(&format_mac(header.mac)).expect("six raw octets always parse");
    let Some(conn) = registry.get(&mac).await else {
        trace!(%mac, "udp datagram for unknown device");
        return;
    };
    let Some(session) = conn.current_session().await else {
        return;
    };
    let log_invalid_cookie = config_rx.borrow().log_invalid_cookie;
    match session
        .handle_udp_ingress(header, ciphertext, peer_addr)
        .await
    {
        UdpIngressOutcome::Accepted | UdpIngressOutcome::SequenceRegression => {}
        UdpIngressOutcome::CookieMismatch if log_invalid_cookie => {
            debug!(%mac, cookie = header.cookie, "dropped udp datagram: cookie mismatch");
        }
        UdpIngressOutcome::CookieMismatch => {}
    }
}

fn format_mac(octets: [u8; 6]) -> String {
    let [a, b, c, d, e, f] = octets;
    format!("{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{f:02x}")
}
