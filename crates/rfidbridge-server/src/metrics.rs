//! Process metrics for the status endpoint.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Counters tracked for the lifetime of the process.
#[derive(Debug)]
pub struct Metrics {
    start: Instant,
    pid: u32,
    clients_connected: AtomicI64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            start: Instant::now(),
            pid: std::process::id(),
            clients_connected: AtomicI64::new(0),
        }
    }

    pub fn client_connected(&self) {
        self.clients_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        self.clients_connected.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn clients_connected(&self) -> i64 {
        self.clients_connected.load(Ordering::Relaxed)
    }

    /// Snapshot for the status endpoint.
    pub fn export(&self, sip_pool_capacity: usize) -> StatusReport {
        StatusReport {
            up_time: format_uptime(self.start.elapsed()),
            pid: self.pid,
            clients_connected: self.clients_connected(),
            sip_pool_current_capacity: sip_pool_capacity,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// The JSON body served by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(rename = "UpTime")]
    pub up_time: String,

    #[serde(rename = "PID")]
    pub pid: u32,

    #[serde(rename = "ClientsConnected")]
    pub clients_connected: i64,

    #[serde(rename = "SIPPoolCurrentCapacity")]
    pub sip_pool_current_capacity: usize,
}

fn format_uptime(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, rest) = (total / 3600, total % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}
