//! gw-test-support: mock upstream WebSocket server plus raw frame
//! builders/readers for the gateway's integration tests, modeled on
//! `rt-test-utils`'s mock WebSocket server and client helpers.

pub mod decode;
pub mod mock_upstream;
pub mod packets;
pub mod udp;

pub use mock_upstream::{AcceptedSession, MockUpstream};
