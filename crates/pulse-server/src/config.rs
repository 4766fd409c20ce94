//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the pulse server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `8080`; `0` auto-assigns).
    pub port: u16,
    /// Bound per-connection outbound queue length.
    pub max_send_queue: usize,
    /// Seconds of silence after which a connection is presumed dead.
    pub liveness_timeout_secs: u64,
    /// Seconds between outbound liveness probes.
    pub probe_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            max_send_queue: 256,
            liveness_timeout_secs: 30,
            probe_interval_secs: 15,
        }
    }
}

impl ServerConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply `PULSE_*` environment overrides. Invalid or out-of-range values
    /// are ignored, falling back to the current value.
    pub fn apply_env(&mut self) {
        if let Some(v) = read_env_string("PULSE_HOST") {
            self.host = v;
        }
        if let Some(v) = read_env_u64("PULSE_PORT", 0, 65535) {
            self.port = v as u16;
        }
        if let Some(v) = read_env_u64("PULSE_MAX_SEND_QUEUE", 1, 65536) {
            self.max_send_queue = v as usize;
        }
        if let Some(v) = read_env_u64("PULSE_LIVENESS_TIMEOUT_SECS", 1, 3600) {
            self.liveness_timeout_secs = v;
        }
        if let Some(v) = read_env_u64("PULSE_PROBE_INTERVAL_SECS", 1, 3600) {
            self.probe_interval_secs = v;
        }
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    std::env::var(name)
        .ok()?
        .parse::<u64>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}
