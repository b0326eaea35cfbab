//! gatewayd: a protocol gateway terminating constrained-device pub/sub (an
//! MQTT 3.1.1 subset) and encrypted UDP audio connections, bridging each
//! device's session to an upstream chat service over WebSocket.
//!
//! Module layout mirrors the component breakdown: `codec` (A), `connection`
//! (B), `udp` (C), `session` (D), `registry` (E), `sweeper` (F), `selector`
//! (G), plus the ambient `config`, `admin`, and `error` modules that a
//! deployable binary needs around the core.

pub mod admin;
pub mod codec;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod registry;
pub mod selector;
pub mod session;
pub mod sweeper;
pub mod udp;
