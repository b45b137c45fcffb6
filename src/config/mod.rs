use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::fmt::Display;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub const ENV_PREFIX: &str = "NETWATCH_";

const DEFAULT_THRESHOLD_MBPS: f64 = 100.0;
const DEFAULT_INTERVAL_SECONDS: i64 = 60;
const DEFAULT_TOP_N: i64 = 5;
const DEFAULT_METRICS_PORT: u16 = 9090;
const DEFAULT_SNAPLEN: i32 = 1024;

/// One configuration layer. Unset keys fall through to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub interface: Option<String>,
    pub threshold_mbps: Option<f64>,
    pub webhook_url: Option<String>,
    pub interval_seconds: Option<i64>,
    pub top_n: Option<i64>,
    pub metrics_enabled: Option<bool>,
    pub metrics_port: Option<u16>,
    pub snaplen: Option<i32>,
    pub pcap_file: Option<PathBuf>,
}

impl ConfigLayer {
    /// Read the layer from `NETWATCH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read the layer through `lookup`, which maps a full variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, key.to_ascii_uppercase()))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Self {
            interface: get("interface"),
            threshold_mbps: parse_var(&get, "threshold_mbps")?,
            webhook_url: get("webhook_url"),
            interval_seconds: parse_var(&get, "interval_seconds")?,
            top_n: parse_var(&get, "top_n")?,
            metrics_enabled: parse_var(&get, "metrics_enabled")?,
            metrics_port: parse_var(&get, "metrics_port")?,
            snaplen: parse_var(&get, "snaplen")?,
            pcap_file: get("pcap_file").map(PathBuf::from),
        })
    }

    /// Overlay `upper` on top of `self`; keys set in `upper` win.
    pub fn merge(self, upper: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            interface: upper.interface.or(self.interface),
            threshold_mbps: upper.threshold_mbps.or(self.threshold_mbps),
            webhook_url: upper.webhook_url.or(self.webhook_url),
            interval_seconds: upper.interval_seconds.or(self.interval_seconds),
            top_n: upper.top_n.or(self.top_n),
            metrics_enabled: upper.metrics_enabled.or(self.metrics_enabled),
            metrics_port: upper.metrics_port.or(self.metrics_port),
            snaplen: upper.snaplen.or(self.snaplen),
            pcap_file: upper.pcap_file.or(self.pcap_file),
        }
    }
}

fn parse_var<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
            anyhow::anyhow!(
                "invalid value '{}' for {}{}: {}",
                raw,
                ENV_PREFIX,
                key.to_ascii_uppercase(),
                e
            )
        }),
        None => Ok(None),
    }
}

/// Validated settings, fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub interface: Option<String>,
    pub threshold_mbps: f64,
    pub webhook_url: Option<String>,
    pub interval: Duration,
    pub top_n: usize,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
    pub snaplen: i32,
    pub pcap_file: Option<PathBuf>,
    /// File the settings were read from, if any.
    pub config_file: Option<PathBuf>,
}

impl MonitorConfig {
    /// Load defaults, then the config file, then the environment, then `flags`.
    pub fn load(explicit_file: Option<&Path>, flags: ConfigLayer) -> Result<Self> {
        let (file_layer, config_file) = match explicit_file {
            Some(path) => {
                if !path.exists() {
                    bail!("config file specified but not found: {}", path.display());
                }
                (read_config_file(path)?, Some(path.to_path_buf()))
            }
            None => match default_config_paths().into_iter().find(|p| p.is_file()) {
                Some(path) => (read_config_file(&path)?, Some(path)),
                None => (ConfigLayer::default(), None),
            },
        };
        if let Some(path) = &config_file {
            info!("Using config file: {}", path.display());
        }

        let env_layer = ConfigLayer::from_env()?;
        let mut config = Self::from_layers(file_layer, env_layer, flags)?;
        config.config_file = config_file;
        Ok(config)
    }

    /// Resolve `file < env < flags` over the built-in defaults and validate.
    pub fn from_layers(file: ConfigLayer, env: ConfigLayer, flags: ConfigLayer) -> Result<Self> {
        let merged = file.merge(env).merge(flags);

        let interval_seconds = merged.interval_seconds.unwrap_or(DEFAULT_INTERVAL_SECONDS);
        if interval_seconds <= 0 {
            bail!("interval_seconds must be positive");
        }
        let top_n = merged.top_n.unwrap_or(DEFAULT_TOP_N);
        if top_n <= 0 {
            bail!("top_n must be positive");
        }
        let threshold_mbps = merged.threshold_mbps.unwrap_or(DEFAULT_THRESHOLD_MBPS);
        if !(threshold_mbps.is_finite() && threshold_mbps > 0.0) {
            bail!("threshold_mbps must be positive");
        }
        let snaplen = merged.snaplen.unwrap_or(DEFAULT_SNAPLEN);
        if snaplen <= 0 {
            bail!("snaplen must be positive");
        }

        let webhook_url = merged.webhook_url.filter(|url| !url.trim().is_empty());
        if webhook_url.is_none() {
            warn!("Discord webhook URL is not set. Notifications will not be sent.");
        }

        Ok(Self {
            interface: merged.interface.filter(|name| !name.trim().is_empty()),
            threshold_mbps,
            webhook_url,
            interval: Duration::from_secs(interval_seconds as u64),
            top_n: top_n as usize,
            metrics_enabled: merged.metrics_enabled.unwrap_or(false),
            metrics_port: merged.metrics_port.unwrap_or(DEFAULT_METRICS_PORT),
            snaplen,
            pcap_file: merged.pcap_file,
            config_file: None,
        })
    }

    pub fn interval_seconds(&self) -> u64 {
        self.interval.as_secs()
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.metrics_port))
    }
}

fn read_config_file(path: &Path) -> Result<ConfigLayer> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(ConfigLayer::default());
    }
    serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to read config file {}", path.display()))
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/netwatchd/config.yaml")];
    if let Some(home) = env::var_os("HOME") {
        paths.push(PathBuf::from(home).join(".config/netwatchd/config.yaml"));
    }
    paths.push(PathBuf::from("config.yaml"));
    paths
}
