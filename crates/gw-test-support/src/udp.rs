//! Test-side AES-128-CTR + UDP datagram helpers, mirroring `crypto.rs` and
//! `udp.rs` so integration tests can build/parse datagrams without
//! depending on `gatewayd`.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

pub const HEADER_LEN: usize = 16;

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
            packet_type: 1,
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

    pub fn from_bytes(bytes: &[u8]) -> Self {
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

pub fn apply_keystream(key: &[u8; 16], header: &[u8; 16], data: &mut [u8]) {
    let mut cipher = Aes128Ctr::new(key.into(), header.into());
    cipher.apply_keystream(data);
}

/// Encrypt `plaintext` under `key` with `header` as IV, returning a
/// ready-to-send datagram (header || ciphertext).
pub fn build_encrypted_datagram(key: &[u8; 16], header: UdpHeader, plaintext: &[u8]) -> Vec<u8> {
    let mut ciphertext = plaintext.to_vec();
    apply_keystream(key, &header.to_bytes(), &mut ciphertext);
    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&ciphertext);
    out
}

/// Parse and decrypt an inbound datagram from the gateway, given the
/// session key negotiated at hello time.
pub fn decrypt_datagram(key: &[u8; 16], datagram: &[u8]) -> Option<(UdpHeader, Vec<u8>)> {
    if datagram.len() < HEADER_LEN {
        return None;
    }
    let header = UdpHeader::from_bytes(&datagram[..HEADER_LEN]);
    let mut plaintext = datagram[HEADER_LEN..].to_vec();
    apply_keystream(key, &header.to_bytes(), &mut plaintext);
    Some((header, plaintext))
}

fn hex_decode(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).expect("valid hex"))
        .collect()
}

pub fn key_from_hex(hex_str: &str) -> [u8; 16] {
    let bytes = hex_decode(hex_str);
    let mut key = [0u8; 16];
    key.copy_from_slice(&bytes);
    key
}

pub fn header_from_hex(hex_str: &str) -> [u8; 16] {
    let bytes = hex_decode(hex_str);
    let mut header = [0u8; 16];
    header.copy_from_slice(&bytes);
    header
}
