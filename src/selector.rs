//! Chat-server selector (component G): picks an upstream WebSocket URL for
//! a device based on which configuration bucket its MAC falls into.

use gw_protocol::Mac;
use rand::seq::SliceRandom;

use crate::config::Config;
use crate::error::SessionError;

/// Choose an upstream URL for `mac`: uniformly at random from
/// `development.chat_servers` if the MAC is listed in
/// `development.mac_addresss`, otherwise from `production.chat_servers`.
pub fn select_chat_server(config: &Config, mac: &Mac) -> Result<String, SessionError> {
    let mac_str = mac.to_string();
    let candidates = if config.development.mac_addresss.iter().any(|m| m == &mac_str) {
        &config.development.chat_servers
    } else {
        &config.production.chat_servers
    };

    candidates
        .choose(&mut rand::thread_rng())
        .cloned()
        .ok_or(SessionError::NoUpstreamConfigured)
}
