//! Per-component configuration, loaded from JSON files.
//!
//! Configuration problems are the only fatal errors in the system: a bad
//! file or an unbindable url aborts the component before its loop starts.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::msg::scan_envelope;
use crate::pubsub::{CacheLogic, CachePolicy};
use crate::{Error, Result};

/// Read and deserialize one component's config section from a JSON file.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| Error::Config(format!("cannot read {}: {err}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|err| Error::Config(format!("cannot parse {}: {err}", path.display())))
}

fn default_cache_depth() -> usize {
    1
}

fn default_scan_depth() -> usize {
    1
}

/// Cache depth override for one scan stream.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanCacheDepth {
    pub channel: String,
    /// Physical ROI width; rounded the same way envelopes round.
    pub size: f64,
    pub depth: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubSubConfig {
    /// Url this component's publisher binds.
    pub pub_url: String,
    /// Publisher urls this component subscribes to.
    #[serde(default)]
    pub sub_urls: Vec<String>,
    #[serde(default = "default_cache_depth")]
    pub cache_depth_default: usize,
    /// Depth for scan envelopes with no per-channel override.
    #[serde(default = "default_scan_depth")]
    pub scan_depth_default: usize,
    #[serde(default)]
    pub scan_cache_depths: Vec<ScanCacheDepth>,
}

impl PubSubConfig {
    pub fn cache_policy(&self) -> CachePolicy {
        let mut policy = CachePolicy::new(self.cache_depth_default);
        policy.set_depth(crate::msg::ENV_SCAN2D, self.scan_depth_default);
        for entry in &self.scan_cache_depths {
            policy.set_depth(scan_envelope(&entry.channel, entry.size), entry.depth);
        }
        policy
    }

    pub fn cache_logic(&self) -> CacheLogic {
        let mut logic = CacheLogic::new();
        for entry in &self.scan_cache_depths {
            logic.register(scan_envelope(&entry.channel, entry.size));
        }
        logic
    }

    pub fn validate(&self) -> Result<()> {
        if self.pub_url.is_empty() {
            return Err(Error::Config("pub_url must not be empty".into()));
        }
        Ok(())
    }
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_request_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Client-facing url the router binds.
    pub router_url: String,
    /// Url of the device controller's reply socket.
    pub device_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_request_retries")]
    pub request_retries: u32,
    /// Identities allowed to change the control mode or end the experiment.
    #[serde(default)]
    pub admin_identities: Vec<String>,
}

impl ControlConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.router_url.is_empty() || self.device_url.is_empty() {
            return Err(Error::Config("router_url and device_url must be set".into()));
        }
        if self.request_retries == 0 {
            return Err(Error::Config("request_retries must be at least 1".into()));
        }
        Ok(())
    }
}

fn default_poll_timeout_ms() -> u64 {
    25
}

fn default_loop_sleep_s() -> f64 {
    0.05
}

fn default_hb_period_s() -> f64 {
    5.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_loop_sleep_s")]
    pub loop_sleep_s: f64,
    #[serde(default = "default_hb_period_s")]
    pub hb_period_s: f64,
    /// Driver-specific sub-config; present when the process runs the
    /// image-backed simulator.
    #[serde(default)]
    pub image: Option<ImageConfig>,
}

impl DeviceConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn loop_sleep(&self) -> Duration {
        Duration::from_secs_f64(self.loop_sleep_s)
    }

    pub fn hb_period(&self) -> Duration {
        Duration::from_secs_f64(self.hb_period_s)
    }

    pub fn validate(&self) -> Result<()> {
        if self.loop_sleep_s <= 0.0 || self.hb_period_s <= 0.0 {
            return Err(Error::Config("loop_sleep_s and hb_period_s must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    pub physical_origin: (f64, f64),
    pub physical_size: (f64, f64),
    pub physical_units: String,
    pub data_units: String,
    pub scan_time_s: f64,
    pub move_time_s: f64,
    /// Source grid resolution (columns, rows).
    pub shape: (u32, u32),
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_channel() -> String {
    String::from("topo")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn pubsub_config_parses_with_defaults() {
        let file = write_tmp(r#"{"pub_url": "tcp://127.0.0.1:5555"}"#);
        let cfg: PubSubConfig = load(file.path()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.cache_depth_default, 1);
        assert!(cfg.sub_urls.is_empty());
    }

    #[test]
    fn scan_depths_feed_policy_and_logic() {
        let file = write_tmp(
            r#"{
                "pub_url": "tcp://127.0.0.1:5555",
                "scan_depth_default": 2,
                "scan_cache_depths": [{"channel": "topo", "size": 5.0, "depth": 6}]
            }"#,
        );
        let cfg: PubSubConfig = load(file.path()).unwrap();
        let policy = cfg.cache_policy();
        assert_eq!(policy.depth_for("Scan2d_topo_5"), 6);
        assert_eq!(policy.depth_for("Scan2d_phase_5"), 2);
        assert_eq!(cfg.cache_logic().resolve("Scan2d_topo_5").unwrap(), "Scan2d_topo_5");
    }

    #[test]
    fn garbage_config_is_a_config_error() {
        let file = write_tmp("{ not json");
        let err = load::<PubSubConfig>(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_retries_rejected() {
        let file = write_tmp(
            r#"{"router_url": "tcp://127.0.0.1:1", "device_url": "tcp://127.0.0.1:2",
                "request_retries": 0}"#,
        );
        let cfg: ControlConfig = load(file.path()).unwrap();
        assert!(cfg.validate().is_err());
    }
}
