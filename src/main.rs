mod aggregation;
mod api;
mod capture;
mod cli;
mod config;
mod metrics;
mod monitor;
mod notify;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use aggregation::{Aggregator, AggregatorConfig};
use api::ApiState;
use capture::{CaptureConfig, CaptureSession, CaptureSource};
use cli::{Cli, Commands};
use config::MonitorConfig;
use monitor::Monitor;
use notify::DiscordNotifier;

/// Frames buffered between the capture thread and the ingestion loop.
const FRAME_QUEUE: usize = 4096;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    if let Err(e) = run_command(cli.command).await {
        error!("Error: {:?}", e);
        std::process::exit(1);
    }
}

async fn run_command(command: Commands) -> Result<()> {
    match command {
        Commands::ListInterfaces => cmd_list_interfaces(),
        Commands::Monitor(args) => cmd_monitor(args).await,
    }
}

fn cmd_list_interfaces() -> Result<()> {
    let interfaces = capture::list_interfaces()
        .context("Failed to list network interfaces")?;

    if interfaces.is_empty() {
        println!("No network interfaces found");
        return Ok(());
    }

    let default = capture::pick_default_interface(&interfaces).map(|iface| iface.name.clone());

    println!("Available network interfaces:\n");
    for iface in &interfaces {
        if default.as_deref() == Some(iface.name.as_str()) {
            println!("  {} (default)", iface.name);
        } else {
            println!("  {}", iface.name);
        }
        if let Some(desc) = &iface.description {
            println!("    Description: {}", desc);
        }
        if !iface.addresses.is_empty() {
            println!("    Addresses: {}", iface.addresses.join(", "));
        }
        println!();
    }

    Ok(())
}

async fn cmd_monitor(args: cli::MonitorArgs) -> Result<()> {
    let config = MonitorConfig::load(args.config.as_deref(), args.layer())
        .context("Failed to load configuration")?;

    let capture_config = CaptureConfig {
        source: match &config.pcap_file {
            Some(path) => CaptureSource::File(path.clone()),
            None => CaptureSource::Interface(config.interface.clone()),
        },
        snaplen: config.snaplen,
        ..Default::default()
    };
    let session = CaptureSession::new(&capture_config)
        .context("Failed to create capture session")?;
    let interface = session.name().to_string();

    info!(
        "Monitor initialized. Interface: {}, Threshold: {:.2} Mbps, Interval: {}s, TopN: {}",
        interface,
        config.threshold_mbps,
        config.interval_seconds(),
        config.top_n
    );

    let api_state = ApiState::new();
    let server_shutdown = CancellationToken::new();
    let server = if config.metrics_enabled {
        metrics::register_metrics()?;
        Some(tokio::spawn(api::serve(
            config.metrics_addr(),
            api_state.clone(),
            server_shutdown.clone(),
        )))
    } else {
        None
    };

    let mut monitor = Monitor::new(config.clone(), interface);
    if let Some(url) = &config.webhook_url {
        let notifier = DiscordNotifier::new(url.clone())
            .context("Failed to create Discord notifier")?;
        monitor = monitor.with_notifier(Arc::new(notifier));
    }
    if config.metrics_enabled {
        monitor = monitor.with_api(api_state);
    }
    monitor.send_startup_notice();

    let stop = CancellationToken::new();
    let (frames, capture_task) = session.spawn(FRAME_QUEUE, stop.clone());
    let (aggregator, results) =
        Aggregator::start(AggregatorConfig::new(config.interval), frames, stop);
    tokio::spawn(wait_for_shutdown(aggregator.stop_token()));

    info!("Monitoring started. Press Ctrl+C to stop.");
    let windows = monitor.run(results).await;

    let stats = aggregator.join().await;
    match capture_task.await {
        Ok(captured) => info!("Capture thread finished after {} frames", captured),
        Err(e) => warn!("Capture thread failed: {:?}", e),
    }

    server_shutdown.cancel();
    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Metrics server error: {:?}", e),
            Err(e) => warn!("Metrics server task failed: {:?}", e),
        }
    }

    info!(
        "Monitor stopped: {} windows, {} frames counted, {} bytes",
        windows, stats.counted, stats.bytes
    );
    Ok(())
}

/// Cancel `stop` on Ctrl+C or SIGTERM. Returns early if something else stops first.
async fn wait_for_shutdown(stop: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = signal::ctrl_c() => info!("Received Ctrl+C, stopping monitor..."),
        _ = terminate => info!("Received SIGTERM, stopping monitor..."),
        _ = stop.cancelled() => return,
    }
    stop.cancel();
}
