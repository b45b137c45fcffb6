use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ConfigLayer;

#[derive(Parser, Debug)]
#[command(name = "netwatchd")]
#[command(about = "Watches interface throughput and alerts on top talkers", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available network interfaces
    ListInterfaces,

    /// Monitor traffic and report per-window throughput
    Monitor(MonitorArgs),
}

/// Flags override the environment, which overrides the config file.
#[derive(Args, Debug, Default)]
pub struct MonitorArgs {
    /// YAML config file (default: first of /etc/netwatchd, ~/.config/netwatchd, ./config.yaml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Network interface to capture from (auto-selected when omitted)
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Alert when overall speed exceeds this many Mbps
    #[arg(short, long)]
    pub threshold_mbps: Option<f64>,

    /// Discord webhook URL for alerts
    #[arg(short, long)]
    pub webhook_url: Option<String>,

    /// Length of each aggregation window in seconds
    #[arg(short = 'n', long)]
    pub interval_seconds: Option<i64>,

    /// Number of top talkers reported per window
    #[arg(long)]
    pub top_n: Option<i64>,

    /// Serve Prometheus metrics and the HTTP API
    #[arg(short, long)]
    pub metrics: bool,

    /// Port for the metrics server
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// Snapshot length (max bytes captured per packet)
    #[arg(short, long)]
    pub snaplen: Option<i32>,

    /// Read packets from a pcap file instead of a live interface
    #[arg(short = 'r', long)]
    pub pcap_file: Option<PathBuf>,
}

impl MonitorArgs {
    /// Settings given on the command line, as the topmost config layer.
    pub fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            interface: self.interface.clone(),
            threshold_mbps: self.threshold_mbps,
            webhook_url: self.webhook_url.clone(),
            interval_seconds: self.interval_seconds,
            top_n: self.top_n,
            metrics_enabled: self.metrics.then_some(true),
            metrics_port: self.metrics_port,
            snaplen: self.snaplen,
            pcap_file: self.pcap_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_monitor_args() {
        let args = Cli::parse_from([
            "netwatchd",
            "monitor",
            "--interface", "eth0",
            "--threshold-mbps", "250.5",
            "--interval-seconds", "10",
            "--metrics",
        ]);

        match args.command {
            Commands::Monitor(monitor_args) => {
                let layer = monitor_args.layer();
                assert_eq!(layer.interface.as_deref(), Some("eth0"));
                assert_eq!(layer.threshold_mbps, Some(250.5));
                assert_eq!(layer.interval_seconds, Some(10));
                assert_eq!(layer.metrics_enabled, Some(true));
                assert_eq!(layer.top_n, None);
            }
            _ => panic!("Expected Monitor command"),
        }
    }

    #[test]
    fn test_absent_flags_leave_layer_unset() {
        let args = Cli::parse_from(["netwatchd", "-v", "monitor"]);
        assert!(args.verbose);

        match args.command {
            Commands::Monitor(monitor_args) => {
                assert_eq!(monitor_args.layer(), ConfigLayer::default());
            }
            _ => panic!("Expected Monitor command"),
        }
    }

    #[test]
    fn test_negative_interval_reaches_validation() {
        let args = Cli::parse_from(["netwatchd", "monitor", "--interval-seconds=-5"]);
        match args.command {
            Commands::Monitor(monitor_args) => {
                assert_eq!(monitor_args.interval_seconds, Some(-5));
            }
            _ => panic!("Expected Monitor command"),
        }
    }
}
