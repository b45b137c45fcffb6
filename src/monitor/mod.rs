//! Consumes window results: rates, threshold checks, metrics and alerts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::aggregation::{rate_mbps, WindowResult};
use crate::api::ApiState;
use crate::config::MonitorConfig;
use crate::metrics;
use crate::notify::{Notifier, StartupNotice, ThresholdAlert};

/// A ranked source address with its throughput over the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TalkerRate {
    pub address: IpAddr,
    pub bytes: u64,
    pub mbps: f64,
}

/// Outcome of processing one window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowReport {
    pub interface: String,
    pub closed_at: DateTime<Utc>,
    pub interval_seconds: u64,
    pub total_bytes: u64,
    pub sources: usize,
    pub overall_mbps: f64,
    pub threshold_mbps: f64,
    pub threshold_exceeded: bool,
    pub top_talkers: Vec<TalkerRate>,
    pub is_final: bool,
}

pub struct Monitor {
    config: MonitorConfig,
    interface: String,
    notifier: Option<Arc<dyn Notifier>>,
    api: Option<ApiState>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, interface: impl Into<String>) -> Self {
        Self {
            config,
            interface: interface.into(),
            notifier: None,
            api: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_api(mut self, api: ApiState) -> Self {
        self.api = Some(api);
        self
    }

    /// Announce startup in the background. Failures are only logged.
    pub fn send_startup_notice(&self) {
        let Some(notifier) = self.notifier.clone() else {
            debug!("No webhook configured, skipping initialization notification");
            return;
        };
        let notice = StartupNotice {
            interface: self.config.interface.clone(),
            threshold_mbps: self.config.threshold_mbps,
            interval_seconds: self.config.interval_seconds(),
        };
        tokio::spawn(async move {
            if let Err(e) = notifier.notify_startup(&notice).await {
                warn!("Error sending initialization notification: {:?}", e);
            }
        });
    }

    /// Process results until the aggregator closes the channel.
    pub async fn run(&self, mut results: mpsc::Receiver<WindowResult>) -> u64 {
        info!("Starting monitoring loop");
        let mut processed = 0u64;
        while let Some(result) = results.recv().await {
            self.process_window(&result);
            processed += 1;
        }
        info!("Aggregator results channel closed, monitor stopping");
        processed
    }

    pub fn process_window(&self, result: &WindowResult) -> WindowReport {
        let interval = result.window;
        let top_talkers: Vec<TalkerRate> = result
            .top_talkers(self.config.top_n)
            .into_iter()
            .map(|t| TalkerRate {
                address: t.address,
                bytes: t.bytes,
                mbps: rate_mbps(t.bytes, interval),
            })
            .collect();

        let overall_mbps = result.rate_mbps;
        let threshold_exceeded = overall_mbps > self.config.threshold_mbps;

        info!(
            "Interval check on {}: duration={:.2}s, total bytes={}, overall speed={:.2} Mbps",
            self.interface,
            result.elapsed.as_secs_f64(),
            result.total_bytes,
            overall_mbps
        );

        if result.snapshot.is_empty() {
            debug!("No IP traffic seen on {} during the window", self.interface);
        }

        if self.config.metrics_enabled {
            metrics::record_window(
                &self.interface,
                overall_mbps,
                result.total_bytes,
                &top_talkers,
                threshold_exceeded,
            );
        }

        let report = WindowReport {
            interface: self.interface.clone(),
            closed_at: result.closed_at,
            interval_seconds: interval.as_secs(),
            total_bytes: result.total_bytes,
            sources: result.snapshot.len(),
            overall_mbps,
            threshold_mbps: self.config.threshold_mbps,
            threshold_exceeded,
            top_talkers,
            is_final: result.is_final,
        };

        if threshold_exceeded {
            self.alert(&report);
        }

        if let Some(api) = &self.api {
            api.publish(report.clone());
        }

        report
    }

    fn alert(&self, report: &WindowReport) {
        warn!(
            "ALERT: network speed threshold exceeded on {}: {:.2} Mbps > {:.2} Mbps",
            report.interface, report.overall_mbps, report.threshold_mbps
        );

        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let alert = ThresholdAlert {
            interface: report.interface.clone(),
            threshold_mbps: report.threshold_mbps,
            interval_seconds: report.interval_seconds,
            overall_mbps: report.overall_mbps,
            talkers: report.top_talkers.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = notifier.notify_threshold(&alert).await {
                warn!("Error sending threshold notification: {:?}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::accumulator::WindowSnapshot;
    use crate::aggregation::WindowAccumulator;
    use crate::aggregation::window::window_cycle;
    use crate::config::ConfigLayer;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::time::Duration;

    enum Sent {
        Startup(StartupNotice),
        Threshold(ThresholdAlert),
    }

    struct RecordingNotifier {
        sent: mpsc::UnboundedSender<Sent>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_startup(&self, notice: &StartupNotice) -> Result<()> {
            let _ = self.sent.send(Sent::Startup(notice.clone()));
            Ok(())
        }

        async fn notify_threshold(&self, alert: &ThresholdAlert) -> Result<()> {
            let _ = self.sent.send(Sent::Threshold(alert.clone()));
            Ok(())
        }
    }

    fn config(threshold_mbps: f64, top_n: i64) -> MonitorConfig {
        MonitorConfig::from_layers(
            ConfigLayer::default(),
            ConfigLayer::default(),
            ConfigLayer {
                threshold_mbps: Some(threshold_mbps),
                interval_seconds: Some(1),
                top_n: Some(top_n),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn recording(config: MonitorConfig) -> (Monitor, mpsc::UnboundedReceiver<Sent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = Monitor::new(config, "test0").with_notifier(Arc::new(RecordingNotifier { sent: tx }));
        (monitor, rx)
    }

    fn result_from(entries: &[(&str, u64)]) -> WindowResult {
        let acc = WindowAccumulator::new();
        for (addr, bytes) in entries {
            acc.add(addr.parse().unwrap(), *bytes);
        }
        window_cycle(&acc, Duration::from_secs(1), Duration::from_secs(1), false)
    }

    #[tokio::test]
    async fn test_threshold_exceeded_sends_ranked_alert() {
        let (monitor, mut sent) = recording(config(1.0, 2));

        // 250 kB/s = 2 Mbps overall
        let report = monitor.process_window(&result_from(&[
            ("10.0.0.3", 25_000),
            ("10.0.0.1", 150_000),
            ("10.0.0.2", 75_000),
        ]));

        assert!(report.threshold_exceeded);
        assert_eq!(report.overall_mbps, 2.0);
        assert_eq!(report.sources, 3);
        assert_eq!(report.top_talkers.len(), 2);
        assert_eq!(report.top_talkers[0].address.to_string(), "10.0.0.1");
        assert_eq!(report.top_talkers[0].mbps, 1.2);

        match sent.recv().await.unwrap() {
            Sent::Threshold(alert) => {
                assert_eq!(alert.interface, "test0");
                assert_eq!(alert.talkers, report.top_talkers);
                assert_eq!(alert.interval_seconds, 1);
            }
            Sent::Startup(_) => panic!("Expected threshold alert"),
        }
    }

    #[tokio::test]
    async fn test_below_threshold_is_quiet() {
        let (monitor, mut sent) = recording(config(100.0, 5));

        let report = monitor.process_window(&result_from(&[("10.0.0.1", 1_000)]));

        assert!(!report.threshold_exceeded);
        tokio::task::yield_now().await;
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rate_equal_to_threshold_does_not_alert() {
        let (monitor, mut sent) = recording(config(8.0, 5));

        let report = monitor.process_window(&result_from(&[("10.0.0.1", 1_000_000)]));

        assert_eq!(report.overall_mbps, 8.0);
        assert!(!report.threshold_exceeded);
        tokio::task::yield_now().await;
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_startup_notice_carries_settings() {
        let (monitor, mut sent) = recording(config(42.0, 5));

        monitor.send_startup_notice();

        match sent.recv().await.unwrap() {
            Sent::Startup(notice) => {
                assert_eq!(notice.interface, None);
                assert_eq!(notice.threshold_mbps, 42.0);
                assert_eq!(notice.interval_seconds, 1);
            }
            Sent::Threshold(_) => panic!("Expected startup notice"),
        }
    }

    #[tokio::test]
    async fn test_run_until_channel_closes() {
        let monitor = Monitor::new(config(100.0, 5), "test0");
        let (tx, rx) = mpsc::channel(4);

        for _ in 0..3 {
            tx.send(result_from(&[("10.0.0.1", 10)])).await.unwrap();
        }
        drop(tx);

        assert_eq!(monitor.run(rx).await, 3);
    }

    #[tokio::test]
    async fn test_report_published_to_api_state() {
        let api = ApiState::new();
        let monitor = Monitor::new(config(100.0, 5), "test0").with_api(api.clone());
        assert!(api.latest().is_none());

        let empty = WindowResult {
            snapshot: WindowSnapshot::default(),
            total_bytes: 0,
            window: Duration::from_secs(1),
            elapsed: Duration::from_millis(300),
            rate_mbps: 0.0,
            closed_at: Utc::now(),
            is_final: true,
        };
        monitor.process_window(&empty);

        let latest = api.latest().unwrap();
        assert!(latest.is_final);
        assert_eq!(latest.total_bytes, 0);
        assert!(latest.top_talkers.is_empty());
    }
}
