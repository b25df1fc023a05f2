//! Background triggers: connectivity watching and scheduled maintenance.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use sidecache_core::Agent;

/// Seconds between connectivity probes.
const PROBE_INTERVAL_SECS: u64 = 30;

/// Probe timeout; a slower origin counts as offline for that pass.
const PROBE_TIMEOUT_SECS: u64 = 5;

/// Seconds between maintenance passes.
const MAINTENANCE_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Probe the app origin and drain the retry queue on every offline-to-online
/// edge.
///
/// Starts out assuming offline, so the first successful probe counts as a
/// reconnect and mutations parked while the daemon was down replay promptly.
pub async fn watch_connectivity(agent: Arc<Agent>) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
        .build()?;
    let origin = agent.config().app_origin.clone();

    let mut ticks = interval(Duration::from_secs(PROBE_INTERVAL_SECS));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut online = false;
    loop {
        ticks.tick().await;
        let now_online = client.head(&origin).send().await.is_ok();
        if now_online && !online {
            info!("Connectivity restored, replaying parked mutations");
            let outcome = agent.on_reconnect().await;
            if !outcome.skipped {
                info!(
                    replayed = outcome.replayed.len(),
                    failed = outcome.failed.len(),
                    "Replay pass finished"
                );
            }
        } else if !now_online && online {
            info!("Connectivity lost");
        } else {
            debug!(online = now_online, "Connectivity probe");
        }
        online = now_online;
    }
}

/// Run the daily maintenance pass on a fixed schedule.
pub async fn run_maintenance_schedule(agent: Arc<Agent>) {
    let mut ticks = interval(Duration::from_secs(MAINTENANCE_INTERVAL_SECS));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it, install just ran.
    ticks.tick().await;
    loop {
        ticks.tick().await;
        agent.lifecycle().run_maintenance().await;
    }
}
