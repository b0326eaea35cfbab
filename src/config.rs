//! Configuration loader (component I): reads `mqtt.json`, validates it into
//! a concrete `Config`, and watches the file for changes, publishing each
//! new snapshot to subscribers. Raw/validated structs are split the way a
//! config layer commonly is: the `Raw*` family mirrors the JSON shape with
//! every field optional, and `from_raw` fills in defaults and produces the
//! struct the rest of the gateway actually reads.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::ConfigError;

const DEFAULT_UPSTREAM_BEARER_TOKEN: &str = "test-token";

#[derive(Debug, Clone)]
pub struct Config {
    pub debug: bool,
    pub log_invalid_cookie: bool,
    pub development: DevelopmentBucket,
    pub production: ProductionBucket,
    /// Value sent as `authorization: Bearer <token>` to the upstream chat
    /// service. Hardcoded upstream; exposed here as configurable, defaulting
    /// to that same placeholder value.
    pub upstream_bearer_token: String,
}

#[derive(Debug, Clone, Default)]
pub struct DevelopmentBucket {
    /// Spelling kept as-is for config-file compatibility.
    pub mac_addresss: Vec<String>,
    pub chat_servers: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProductionBucket {
    pub chat_servers: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    debug: Option<bool>,
    log_invalid_cookie: Option<bool>,
    development: Option<RawDevelopmentBucket>,
    production: Option<RawProductionBucket>,
    upstream_bearer_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawDevelopmentBucket {
    mac_addresss: Option<Vec<String>>,
    chat_servers: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct RawProductionBucket {
    chat_servers: Option<Vec<String>>,
}

fn from_raw(raw: RawConfig) -> Config {
    let development = raw.development.unwrap_or_default();
    let production = raw.production.unwrap_or_default();
    Config {
        debug: raw.debug.unwrap_or(false),
        log_invalid_cookie: raw.log_invalid_cookie.unwrap_or(false),
        development: DevelopmentBucket {
            mac_addresss: development.mac_addresss.unwrap_or_default(),
            chat_servers: development.chat_servers.unwrap_or_default(),
        },
        production: ProductionBucket {
            chat_servers: production.chat_servers.unwrap_or_default(),
        },
        upstream_bearer_token: raw
            .upstream_bearer_token
            .unwrap_or_else(|| DEFAULT_UPSTREAM_BEARER_TOKEN.to_owned()),
    }
}

/// Read and validate `mqtt.json` at `path`.
pub async fn load(path: &Path) -> Result<Config, ConfigError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
    let raw: RawConfig = serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    Ok(from_raw(raw))
}

async fn modified_at(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

/// Poll `path` for changes and publish each newly-validated snapshot on
/// `tx`. Runs until the process exits; parse errors are logged and leave
/// the previous snapshot in place.
pub async fn watch_for_changes(path: PathBuf, tx: watch::Sender<Arc<Config>>) {
    let mut last_modified = modified_at(&path).await;
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(2));
    loop {
        interval.tick().await;
        let current_modified = modified_at(&path).await;
        if current_modified == last_modified {
            continue;
        }
        last_modified = current_modified;
        match load(&path).await {
            Ok(config) => {
                debug!(debug = config.debug, "config reloaded");
                let _ = tx.send(Arc::new(config));
            }
            Err(err) => {
                warn!(%err, "config reload failed, keeping previous snapshot");
            }
        }
    }
}

/// Load the initial config and set up a `watch` channel plus the
/// file-watching background task. Callers keep the `watch::Receiver` as
/// their "current snapshot" handle and the returned `JoinHandle` for
/// shutdown bookkeeping.
pub async fn load_and_watch(
    path: PathBuf,
) -> Result<(watch::Receiver<Arc<Config>>, tokio::task::JoinHandle<()>), ConfigError> {
    let initial = load(&path).await?;
    info!(path = %path.display(), "loaded configuration");
    let (tx, rx) = watch::channel(Arc::new(initial));
    let handle = tokio::spawn(async move {
        watch_for_changes(path, tx).await;
    });
    Ok((rx, handle))
}
