use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use super::{Notifier, StartupNotice, ThresholdAlert};

const USERNAME: &str = "Network Monitor";
const COLOR_RED: u32 = 15158332;
const COLOR_BLUE: u32 = 3447003;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct EmbedField {
    name: String,
    value: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    inline: bool,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    description: String,
    color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<EmbedField>,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct WebhookPayload {
    username: &'static str,
    embeds: Vec<Embed>,
}

/// Posts alerts to a Discord channel webhook.
pub struct DiscordNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            webhook_url: webhook_url.into(),
            client,
        })
    }

    async fn post(&self, payload: &WebhookPayload) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(payload)
            .send()
            .await
            .context("Failed to send Discord notification")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Discord returned non-2xx status {}: {}", status, body);
        }
        Ok(())
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn startup_payload(notice: &StartupNotice) -> WebhookPayload {
    let interface = match &notice.interface {
        Some(name) => name.as_str(),
        None => "Auto-Selected",
    };
    let description = format!(
        "Network Monitor started.\nMonitoring Interface: **{}**\nThreshold: **{:.2} Mbps**\nCheck Interval: **{}s**",
        interface, notice.threshold_mbps, notice.interval_seconds
    );

    WebhookPayload {
        username: USERNAME,
        embeds: vec![Embed {
            title: "🚀 Monitor Initialized".to_string(),
            description,
            color: COLOR_BLUE,
            fields: Vec::new(),
            timestamp: timestamp(),
        }],
    }
}

fn threshold_payload(alert: &ThresholdAlert) -> WebhookPayload {
    let fields = alert
        .talkers
        .iter()
        .map(|t| EmbedField {
            name: t.address.to_string(),
            value: format!("{:.2} Mbps", t.mbps),
            inline: true,
        })
        .collect();

    let description = format!(
        "Overall speed on **{}** exceeded {:.2} Mbps threshold (Total: {:.2} Mbps) in the last {} seconds.\nTop {} talkers:",
        alert.interface,
        alert.threshold_mbps,
        alert.overall_mbps,
        alert.interval_seconds,
        alert.talkers.len()
    );

    WebhookPayload {
        username: USERNAME,
        embeds: vec![Embed {
            title: "🚨 Network Threshold Exceeded!".to_string(),
            description,
            color: COLOR_RED,
            fields,
            timestamp: timestamp(),
        }],
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify_startup(&self, notice: &StartupNotice) -> Result<()> {
        self.post(&startup_payload(notice))
            .await
            .context("Startup notification failed")?;
        info!("Sent initialization notification to Discord");
        Ok(())
    }

    async fn notify_threshold(&self, alert: &ThresholdAlert) -> Result<()> {
        self.post(&threshold_payload(alert))
            .await
            .context("Threshold notification failed")?;
        info!("Sent threshold notification to Discord");
        Ok(())
    }
}
