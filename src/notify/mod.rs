//! Outbound alert delivery.

use anyhow::Result;
use async_trait::async_trait;

use crate::monitor::TalkerRate;

pub mod discord;

pub use discord::DiscordNotifier;

/// Sent once when monitoring begins.
#[derive(Debug, Clone)]
pub struct StartupNotice {
    /// `None` when the interface was picked automatically.
    pub interface: Option<String>,
    pub threshold_mbps: f64,
    pub interval_seconds: u64,
}

/// Sent for every window whose overall rate is above the threshold.
#[derive(Debug, Clone)]
pub struct ThresholdAlert {
    pub interface: String,
    pub threshold_mbps: f64,
    pub interval_seconds: u64,
    pub overall_mbps: f64,
    /// Highest rates first.
    pub talkers: Vec<TalkerRate>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_startup(&self, notice: &StartupNotice) -> Result<()>;

    async fn notify_threshold(&self, alert: &ThresholdAlert) -> Result<()>;
}
