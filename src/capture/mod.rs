use anyhow::{anyhow, bail, Context, Result};
use pcap::{Activated, Capture, Device};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Only IP traffic is interesting to the aggregation engine.
pub const BPF_FILTER: &str = "ip or ip6";

/// Represents a network interface available for capture
#[derive(Debug, Clone)]
pub struct NetworkInterface {
    pub name: String,
    pub description: Option<String>,
    pub addresses: Vec<String>,
    pub loopback: bool,
}

/// Lists all available network interfaces
pub fn list_interfaces() -> Result<Vec<NetworkInterface>> {
    let devices = Device::list().context("Failed to list network devices")?;

    let interfaces = devices
        .into_iter()
        .map(|device| {
            let addresses = device
                .addresses
                .iter()
                .map(|addr| addr.addr.to_string())
                .collect();

            NetworkInterface {
                loopback: device.flags.is_loopback(),
                name: device.name,
                description: device.desc,
                addresses,
            }
        })
        .collect();

    Ok(interfaces)
}

/// First interface that is not loopback and has at least one address.
pub fn pick_default_interface(interfaces: &[NetworkInterface]) -> Option<&NetworkInterface> {
    interfaces
        .iter()
        .find(|iface| !iface.loopback && !iface.name.starts_with("lo") && !iface.addresses.is_empty())
}

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// Live interface; `None` selects one automatically.
    Interface(Option<String>),
    /// Previously recorded pcap file, read once to the end.
    File(PathBuf),
}

/// Configuration for packet capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub source: CaptureSource,
    pub snaplen: i32,
    pub promisc: bool,
    pub timeout: i32,
    pub buffer_size: i32,
    pub filter: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: CaptureSource::Interface(None),
            snaplen: 1024,                 // headers are all we need
            promisc: true,
            timeout: 1000,                 // 1 second, lets the thread observe stop requests
            buffer_size: 10 * 1024 * 1024, // 10MB buffer
            filter: BPF_FILTER.to_string(),
        }
    }
}

/// Link-layer framing of captured data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Ethernet,
    RawIp,
    LinuxSll,
}

impl LinkKind {
    pub fn from_dlt(dlt: i32) -> Option<Self> {
        match dlt {
            1 => Some(LinkKind::Ethernet),
            12 | 101 | 228 | 229 => Some(LinkKind::RawIp),
            113 => Some(LinkKind::LinuxSll),
            _ => None,
        }
    }
}

/// One frame as handed to the aggregation engine.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub data: Vec<u8>,
    /// Original length on the wire, as reported by the capture header.
    pub wire_len: u32,
    pub link: LinkKind,
}

/// Packet capture session
pub struct CaptureSession {
    capture: Capture<dyn Activated>,
    link: LinkKind,
    name: String,
}

impl CaptureSession {
    /// Open a live interface or a pcap file
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        let (mut capture, name): (Capture<dyn Activated>, String) = match &config.source {
            CaptureSource::Interface(requested) => {
                let name = match requested {
                    Some(name) => name.clone(),
                    None => {
                        let interfaces = list_interfaces()?;
                        let chosen = pick_default_interface(&interfaces).ok_or_else(|| {
                            anyhow!("no suitable network interface found (non-loopback with addresses)")
                        })?;
                        info!("No interface specified, using first valid device found: {}", chosen.name);
                        chosen.name.clone()
                    }
                };
                (open_live(&name, config)?.into(), name)
            }
            CaptureSource::File(path) => {
                info!("Reading packets from file: {}", path.display());
                let capture = Capture::from_file(path)
                    .with_context(|| format!("Failed to open capture file {}", path.display()))?;
                (capture.into(), path.display().to_string())
            }
        };

        let dlt = capture.get_datalink().0;
        let link = LinkKind::from_dlt(dlt)
            .ok_or_else(|| anyhow!("unsupported link type {} on {}", dlt, name))?;

        info!("Applying BPF filter: {}", config.filter);
        capture
            .filter(&config.filter, true)
            .with_context(|| format!("Failed to apply BPF filter '{}'", config.filter))?;

        info!("Successfully opened {} for capture ({:?})", name, link);
        Ok(Self { capture, link, name })
    }

    /// Name of the interface or file being read
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the blocking read loop on a dedicated thread.
    ///
    /// The returned receiver closes when the source is exhausted, when a hard
    /// capture error occurs, when `stop` is cancelled or when the receiver is
    /// dropped.
    pub fn spawn(
        self,
        capacity: usize,
        stop: CancellationToken,
    ) -> (mpsc::Receiver<CapturedFrame>, JoinHandle<u64>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let join = tokio::task::spawn_blocking(move || self.run(tx, stop));
        (rx, join)
    }

    fn run(mut self, tx: mpsc::Sender<CapturedFrame>, stop: CancellationToken) -> u64 {
        let mut frames = 0u64;

        while !stop.is_cancelled() {
            let frame = match self.capture.next_packet() {
                Ok(packet) => CapturedFrame {
                    data: packet.data.to_vec(),
                    wire_len: packet.header.len,
                    link: self.link,
                },
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(pcap::Error::NoMorePackets) => {
                    info!("Reached end of capture on {}", self.name);
                    break;
                }
                Err(e) => {
                    error!("Error capturing packet on {}: {:?}", self.name, e);
                    break;
                }
            };

            if tx.blocking_send(frame).is_err() {
                debug!("Frame receiver dropped, stopping capture");
                break;
            }

            frames += 1;
            if frames % 100_000 == 0 {
                debug!("Captured {} frames", frames);
            }
        }

        match self.capture.stats() {
            Ok(stats) => info!(
                "Capture on {} finished: {} frames, {} dropped by kernel, {} dropped by interface",
                self.name, frames, stats.dropped, stats.if_dropped
            ),
            Err(_) => info!("Capture on {} finished: {} frames", self.name, frames),
        }
        frames
    }
}

fn open_live(name: &str, config: &CaptureConfig) -> Result<Capture<pcap::Active>> {
    info!("Opening capture on interface: {}", name);

    let inactive = Capture::from_device(name).context("Failed to open capture device")?;
    let opened = inactive
        .snaplen(config.snaplen)
        .promisc(config.promisc)
        .timeout(config.timeout)
        .buffer_size(config.buffer_size)
        .open();

    match opened {
        Ok(capture) => Ok(capture),
        Err(e) if e.to_string().to_lowercase().contains("permission denied") => {
            warn!("Insufficient privileges to capture on {}", name);
            bail!(
                "permission denied opening interface {}. Run as root or grant capabilities \
                 (e.g., sudo setcap cap_net_raw,cap_net_admin=eip <binary>)",
                name
            )
        }
        Err(e) => Err(e).with_context(|| format!("Failed to activate capture on {}", name)),
    }
}
