//! AES-128-CTR helpers for the UDP audio channel (component C/D).
//!
//! The 16-byte datagram header doubles as the CTR IV: no IV is ever sent
//! separately. This is safe because a Session's key is freshly generated
//! and never reused, and within a Session the `(cookie, sequence)` pair
//! embedded in the header is unique -- `cookie` is fixed for the Session's
//! lifetime and `sequence` only ever increases, so no two frames encrypted
//! under the same key ever share an IV.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

pub const KEY_LEN: usize = 16;
pub const HEADER_LEN: usize = 16;

pub type Key = [u8; KEY_LEN];
pub type HeaderBytes = [u8; HEADER_LEN];

/// Generate a fresh random 16-byte session key.
pub fn generate_key() -> Key {
    let mut key = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Generate a random 16-bit cookie.
pub fn generate_cookie() -> u16 {
    rand::thread_rng().next_u32() as u16
}

/// Encrypt (or decrypt -- CTR mode is its own inverse) `data` in place,
/// deriving the keystream from `key` and using `header` verbatim as the IV.
pub fn apply_keystream(key: &Key, header: &HeaderBytes, data: &mut [u8]) {
    let mut cipher = Aes128Ctr::new(key.into(), header.into());
    cipher.apply_keystream(data);
}
