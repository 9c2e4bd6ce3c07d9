//! Environment-driven configuration for the coordinator and worker binaries
//! (spec §6).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use uuid::Uuid;

pub const DEFAULT_PORT: u16 = 50051;
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Straggler monitor period (spec §4.4).
pub const STRAGGLER_PERIOD_SECS: u64 = 5;
/// Straggler speculative-execution threshold, relative to the phase median.
pub const STRAGGLER_THRESHOLD: f64 = 1.5;
/// Fraction of a phase's tasks that must have completed before a median is trusted.
pub const STRAGGLER_BASELINE_FRACTION: f64 = 0.25;

/// Worker liveness monitor period (spec §4.5).
pub const LIVENESS_PERIOD_SECS: u64 = 10;
/// Worker liveness timeout (spec §4.5).
pub const LIVENESS_TIMEOUT_SECS: i64 = 30;

/// Worker heartbeat emission period (spec §4.7).
pub const HEARTBEAT_PERIOD_SECS: u64 = 5;
/// Worker poll backoff when `GetTask` returns `NONE` (spec §5).
pub const POLL_BACKOFF_SECS: u64 = 2;
/// Worker backoff after an RPC transport error (spec §5).
pub const RPC_ERROR_BACKOFF_SECS: u64 = 5;
/// Simulated-straggler delay, applied only when `SIMULATE_STRAGGLER=true` (spec §4.7).
pub const SIMULATED_STRAGGLER_DELAY_SECS: u64 = 10;

fn env_port() -> u16 {
    std::env::var("COORDINATOR_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub bind_addr: SocketAddr,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), env_port()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub coordinator_addr: SocketAddr,
    pub simulate_straggler: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let host = std::env::var("COORDINATOR_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = env_port();
        let coordinator_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port));

        Self {
            worker_id: std::env::var("WORKER_ID").unwrap_or_else(|_| format!("worker-{}", Uuid::new_v4())),
            coordinator_addr,
            simulate_straggler: std::env::var("SIMULATE_STRAGGLER")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

/// Initializes the `tracing` subscriber from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
