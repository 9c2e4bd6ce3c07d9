//! Worker liveness monitor (spec §4.5): periodic check for workers whose
//! last heartbeat has exceeded the timeout. Logs only — task reassignment
//! on dead workers is out of scope for the core; stragglers subsume that
//! function for the common slow-but-alive case (spec §4.5, §7).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use crate::mr::config::{LIVENESS_PERIOD_SECS, LIVENESS_TIMEOUT_SECS};
use crate::mr::coordinator::CoordinatorState;

/// Scans `state` once for dead workers, logging a warning for each.
pub fn scan_once(state: &CoordinatorState) {
    let now = Utc::now();
    for (worker_id, record) in &state.workers {
        let idle_secs = (now - record.last_heartbeat).num_seconds();
        if idle_secs > LIVENESS_TIMEOUT_SECS {
            warn!(worker_id, idle_secs, "worker appears to be dead (heartbeat timeout)");
        }
    }
}

/// Spawns the periodic background scan (spec §4.5 period = 10s).
pub fn spawn(state: Arc<Mutex<CoordinatorState>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(LIVENESS_PERIOD_SECS)).await;
            let state = state.lock().unwrap();
            scan_once(&state);
        }
    })
}
