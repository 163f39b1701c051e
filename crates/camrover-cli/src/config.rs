//! Configuration – reads `~/.camrover/config.toml` (or `$CAMROVER_CONFIG`).

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camrover_relay::RelayLimits;
use camrover_server::ServerConfig;
use serde::{Deserialize, Serialize};

/// Persisted relay configuration. Every field has a default, so a partial
/// file (or none at all) is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Interface to listen on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// HTTP + WebSocket port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// MJPEG stream endpoint of the rover camera.
    #[serde(default = "default_camera_url")]
    pub camera_url: String,

    #[serde(default = "default_video_connect_timeout_ms")]
    pub video_connect_timeout_ms: u64,

    #[serde(default = "default_video_read_timeout_ms")]
    pub video_read_timeout_ms: u64,

    /// Largest telemetry frame the relay forwards.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Minimum spacing between forwarded telemetry frames of one peer.
    #[serde(default = "default_min_frame_interval_ms")]
    pub min_frame_interval_ms: u64,

    /// Outbound queue depth per peer.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    #[serde(default = "default_bandwidth_report_secs")]
    pub bandwidth_report_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    camrover_server::DEFAULT_PORT
}
fn default_camera_url() -> String {
    camrover_server::DEFAULT_CAMERA_URL.to_string()
}
fn default_video_connect_timeout_ms() -> u64 {
    5_000
}
fn default_video_read_timeout_ms() -> u64 {
    10_000
}
fn default_max_frame_bytes() -> usize {
    1024 * 1024
}
fn default_min_frame_interval_ms() -> u64 {
    50
}
fn default_outbound_queue() -> usize {
    256
}
fn default_send_timeout_ms() -> u64 {
    2_000
}
fn default_bandwidth_report_secs() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            camera_url: default_camera_url(),
            video_connect_timeout_ms: default_video_connect_timeout_ms(),
            video_read_timeout_ms: default_video_read_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            min_frame_interval_ms: default_min_frame_interval_ms(),
            outbound_queue: default_outbound_queue(),
            send_timeout_ms: default_send_timeout_ms(),
            bandwidth_report_secs: default_bandwidth_report_secs(),
        }
    }
}

impl Config {
    /// Convert into the server's runtime settings.
    pub fn to_server_config(&self) -> Result<ServerConfig, String> {
        let bind_addr: IpAddr = self
            .bind_addr
            .parse()
            .map_err(|e| format!("Invalid bind_addr '{}': {}", self.bind_addr, e))?;
        let limits = RelayLimits::default()
            .with_max_frame_bytes(self.max_frame_bytes)
            .with_min_frame_interval(Duration::from_millis(self.min_frame_interval_ms))
            .with_outbound_queue(self.outbound_queue);

        let mut server = ServerConfig::default()
            .with_bind_addr(bind_addr)
            .with_port(self.port)
            .with_camera_url(self.camera_url.clone())
            .with_video_timeouts(
                Duration::from_millis(self.video_connect_timeout_ms),
                Duration::from_millis(self.video_read_timeout_ms),
            )
            .with_limits(limits)
            .with_send_timeout(Duration::from_millis(self.send_timeout_ms));
        server.bandwidth_period = Duration::from_secs(self.bandwidth_report_secs.max(1));
        Ok(server)
    }
}

/// Return the config path: `$CAMROVER_CONFIG` or `~/.camrover/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("CAMROVER_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".camrover").join("config.toml")
}

/// Outcome of [`load`]: the effective config plus the file error, if the
/// file could not be used.
#[derive(Debug)]
pub struct Loaded {
    pub config: Config,
    pub file_error: Option<String>,
}

/// Load the config and apply environment overrides. A missing or broken
/// file yields the defaults; overrides apply either way.
pub fn load() -> Loaded {
    load_with(&config_path(), |key| std::env::var(key).ok())
}

pub(crate) fn load_with<F>(path: &Path, var: F) -> Loaded
where
    F: Fn(&str) -> Option<String>,
{
    let (mut config, file_error) = match load_from(path) {
        Ok(cfg) => (cfg.unwrap_or_default(), None),
        Err(e) => (Config::default(), Some(e)),
    };
    apply_overrides(&mut config, var);
    Loaded { config, file_error }
}

/// Load the config from a specific path. Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply overrides looked up through `var`.
///
/// | Variable | Config field |
/// |---|---|
/// | `PORT`, `CAMROVER_PORT` | `port` (the latter wins) |
/// | `CAMROVER_BIND` | `bind_addr` |
/// | `CAMROVER_CAMERA_URL` | `camera_url` |
/// | `CAMROVER_MAX_FRAME_BYTES` | `max_frame_bytes` |
/// | `CAMROVER_MIN_FRAME_INTERVAL_MS` | `min_frame_interval_ms` |
///
/// Numeric values that do not parse are ignored.
pub fn apply_overrides<F>(cfg: &mut Config, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    for key in ["PORT", "CAMROVER_PORT"] {
        if let Some(v) = var(key)
            && let Ok(port) = v.parse::<u16>()
        {
            cfg.port = port;
        }
    }
    if let Some(v) = var("CAMROVER_BIND") {
        cfg.bind_addr = v;
    }
    if let Some(v) = var("CAMROVER_CAMERA_URL") {
        cfg.camera_url = v;
    }
    if let Some(v) = var("CAMROVER_MAX_FRAME_BYTES")
        && let Ok(bytes) = v.parse::<usize>()
    {
        cfg.max_frame_bytes = bytes;
    }
    if let Some(v) = var("CAMROVER_MIN_FRAME_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.min_frame_interval_ms = ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_path_points_to_camrover_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".camrover"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "port = 8088\ncamera_url = \"http://10.0.0.9:81/stream\"\n")
            .expect("write");

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.port, 8088);
        assert_eq!(cfg.camera_url, "http://10.0.0.9:81/stream");
        assert_eq!(cfg.max_frame_bytes, 1024 * 1024);
        assert_eq!(cfg.min_frame_interval_ms, 50);
    }

    #[test]
    fn broken_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "port = \"not a number\"").expect("write");
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn overrides_apply_and_camrover_port_wins() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            env(&[
                ("PORT", "4000"),
                ("CAMROVER_PORT", "4100"),
                ("CAMROVER_CAMERA_URL", "http://cam/stream"),
                ("CAMROVER_MIN_FRAME_INTERVAL_MS", "20"),
            ]),
        );
        assert_eq!(cfg.port, 4100);
        assert_eq!(cfg.camera_url, "http://cam/stream");
        assert_eq!(cfg.min_frame_interval_ms, 20);
    }

    #[test]
    fn broken_file_still_honours_overrides() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "port = \"oops\"").expect("write");

        let loaded = load_with(
            &path,
            env(&[
                ("CAMROVER_PORT", "4555"),
                ("CAMROVER_CAMERA_URL", "http://cam/stream"),
            ]),
        );
        assert!(loaded.file_error.is_some());
        assert_eq!(loaded.config.port, 4555);
        assert_eq!(loaded.config.camera_url, "http://cam/stream");
    }

    #[test]
    fn missing_file_loads_defaults_plus_overrides() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let loaded = load_with(&dir.path().join("config.toml"), env(&[("PORT", "8081")]));
        assert!(loaded.file_error.is_none());
        assert_eq!(loaded.config.port, 8081);
        assert_eq!(loaded.config.max_frame_bytes, 1024 * 1024);
    }

    #[test]
    fn overrides_ignore_invalid_numbers() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            env(&[("PORT", "not-a-port"), ("CAMROVER_MAX_FRAME_BYTES", "lots")]),
        );
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn converts_to_server_config() {
        let cfg = Config {
            bind_addr: "127.0.0.1".into(),
            min_frame_interval_ms: 25,
            ..Config::default()
        };
        let server = cfg.to_server_config().expect("valid");
        assert_eq!(server.socket_addr().to_string(), "127.0.0.1:3000");
        assert_eq!(server.limits.min_frame_interval, Duration::from_millis(25));
        assert_eq!(server.video_connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn invalid_bind_addr_is_rejected() {
        let cfg = Config {
            bind_addr: "rover.local".into(),
            ..Config::default()
        };
        assert!(cfg.to_server_config().is_err());
    }
}
