use anyhow::{Context, Result};
use lazy_static::lazy_static;
use prometheus::{GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::monitor::TalkerRate;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref NETWORK_SPEED: GaugeVec = GaugeVec::new(
        Opts::new("network_speed_mbps", "Current network speed in Mbps"),
        &["interface", "direction"]
    ).expect("valid network_speed_mbps definition");

    pub static ref NETWORK_TRAFFIC: IntCounterVec = IntCounterVec::new(
        Opts::new("network_traffic_bytes_total", "Total network traffic in bytes"),
        &["interface", "direction"]
    ).expect("valid network_traffic_bytes_total definition");

    pub static ref TOP_TALKERS: GaugeVec = GaugeVec::new(
        Opts::new("network_top_talkers_mbps", "Top network talkers by speed in Mbps"),
        &["interface", "ip_address"]
    ).expect("valid network_top_talkers_mbps definition");

    pub static ref THRESHOLD_EXCEEDED: IntGauge = IntGauge::new(
        "network_threshold_exceeded",
        "Whether the network speed threshold is exceeded (1 for yes, 0 for no)"
    ).expect("valid network_threshold_exceeded definition");

    pub static ref WINDOWS_TOTAL: IntCounter = IntCounter::new(
        "network_windows_total",
        "Number of aggregation windows processed"
    ).expect("valid network_windows_total definition");
}

pub fn register_metrics() -> Result<()> {
    REGISTRY
        .register(Box::new(NETWORK_SPEED.clone()))
        .context("Failed to register network_speed_mbps")?;
    REGISTRY
        .register(Box::new(NETWORK_TRAFFIC.clone()))
        .context("Failed to register network_traffic_bytes_total")?;
    REGISTRY
        .register(Box::new(TOP_TALKERS.clone()))
        .context("Failed to register network_top_talkers_mbps")?;
    REGISTRY
        .register(Box::new(THRESHOLD_EXCEEDED.clone()))
        .context("Failed to register network_threshold_exceeded")?;
    REGISTRY
        .register(Box::new(WINDOWS_TOTAL.clone()))
        .context("Failed to register network_windows_total")?;
    Ok(())
}

/// Publish the outcome of one window.
pub fn record_window(
    interface: &str,
    speed_mbps: f64,
    total_bytes: u64,
    top_talkers: &[TalkerRate],
    threshold_exceeded: bool,
) {
    NETWORK_SPEED
        .with_label_values(&[interface, "total"])
        .set(speed_mbps);
    NETWORK_TRAFFIC
        .with_label_values(&[interface, "total"])
        .inc_by(total_bytes);

    // Addresses that dropped out of the ranking must not linger.
    TOP_TALKERS.reset();
    for talker in top_talkers {
        let address = talker.address.to_string();
        TOP_TALKERS
            .with_label_values(&[interface, address.as_str()])
            .set(talker.mbps);
    }

    THRESHOLD_EXCEEDED.set(i64::from(threshold_exceeded));
    WINDOWS_TOTAL.inc();
}

pub fn metrics_text() -> Result<String> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}
