//! Read-only liveness and status reports.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
}

impl HealthReport {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: String,
    pub uptime_secs: u64,
    pub connections: usize,
    pub camera_url: String,
}

impl StatusReport {
    pub fn collect(started: Instant, connections: usize, camera_url: &str) -> Self {
        Self {
            status: "ok".to_string(),
            uptime_secs: started.elapsed().as_secs(),
            connections,
            camera_url: camera_url.to_string(),
        }
    }
}
