//! Keep-alive sweeper (component F): a single periodic task that checks
//! every registered Connection's keep-alive deadline and logs connection
//! counts when they change.

use std::time::Duration;

use tracing::info;

use crate::registry::DeviceRegistry;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Run the sweeper until cancelled. Each tick: check keep-alive on every
/// registered Connection (closing and evicting any that have expired), then
/// log the active/total connection counts if either changed since the last
/// tick.
pub async fn run(registry: DeviceRegistry) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    let mut last_active: Option<usize> = None;
    let mut last_total: Option<usize> = None;

    loop {
        interval.tick().await;
        sweep_once(&registry, &mut last_active, &mut last_total).await;
    }
}

async fn sweep_once(
    registry: &DeviceRegistry,
    last_active: &mut Option<usize>,
    last_total: &mut Option<usize>,
) {
    for conn in registry.iterate().await {
        if conn.check_keep_alive() {
            conn.close().await;
            if let Some(mac) = conn.mac() {
                registry.remove(&mac, &conn).await;
            }
        }
    }

    let remaining = registry.iterate().await;
    let mut active_count = 0;
    for conn in &remaining {
        if conn.is_alive().await {
            active_count += 1;
        }
    }
    let total = remaining.len();

    if *last_active != Some(active_count) || *last_total != Some(total) {
        info!(active_count, total, "keep-alive sweep");
        *last_active = Some(active_count);
        *last_total = Some(total);
    }
}
