use crate::error::CaptureError;
#[cfg(feature = "packetcapture")]
use crate::error::SetupError;
use crate::frame::DecodedFrame;
#[cfg(feature = "packetcapture")]
use crate::frame::{decode_frame, LinkLayer};
#[cfg(feature = "packetcapture")]
use pcap::{Activated, Capture};
use std::time::Duration;
#[cfg(feature = "packetcapture")]
use tracing::{debug, info};

/// Large enough for a full frame including payload.
pub const DEFAULT_SNAPLEN: i32 = 65536;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_DEVICE: &str = "lo";

/// Capture parameters for a monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub device: String,
    pub snaplen: i32,
    pub promiscuous: bool,
    /// Deliver packets as soon as they arrive instead of batching them.
    pub immediate: bool,
    /// Upper bound of a single frame read, and so of cancellation latency.
    pub timeout: Duration,
    /// Kernel buffer size in bytes, libpcap default when unset.
    pub buffer_size: Option<i32>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            snaplen: DEFAULT_SNAPLEN,
            promiscuous: true,
            immediate: true,
            timeout: DEFAULT_READ_TIMEOUT,
            buffer_size: None,
        }
    }
}

impl MonitorConfig {
    pub fn new(device: impl Into<String>, timeout: Duration) -> Self {
        Self {
            device: device.into(),
            timeout,
            ..Default::default()
        }
    }
}

/// Capture filter restricting traffic to UDP destined to `port`.
pub fn capture_filter(port: u16) -> String {
    format!("udp and dst port {}", port)
}

/// The libpcap read timeout in milliseconds. Never 0, which libpcap takes as
/// "wait forever" and which would hide the stop flag on an idle device.
pub fn read_timeout_millis(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX).max(1)
}

/// Lazy, sequential, non-restartable source of decoded frames.
#[cfg_attr(test, mockall::automock)]
pub trait FrameSource: Send {
    /// Blocks up to the source's read timeout. `Ok(None)` means no frame
    /// arrived in time; `Err(CaptureError::Exhausted)` means none ever will.
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, CaptureError>;
}

/// A libpcap capture with the probe filter installed.
///
/// The handle is closed when the source is dropped.
#[cfg(feature = "packetcapture")]
pub struct PcapSource {
    capture: Capture<dyn Activated>,
    link: LinkLayer,
}

#[cfg(feature = "packetcapture")]
impl PcapSource {
    /// Opens `config.device` for live capture of UDP traffic to `port`.
    pub fn open_live(config: &MonitorConfig, port: u16) -> Result<Self, SetupError> {
        let open_error = |source: pcap::Error| SetupError::OpenDevice {
            device: config.device.clone(),
            source,
        };

        let timeout_ms = read_timeout_millis(config.timeout);
        let mut inactive = Capture::from_device(config.device.as_str())
            .map_err(open_error)?
            .snaplen(config.snaplen)
            .promisc(config.promiscuous)
            .immediate_mode(config.immediate)
            .timeout(timeout_ms);
        if let Some(size) = config.buffer_size {
            inactive = inactive.buffer_size(size);
        }
        let capture = inactive.open().map_err(open_error)?;

        let source = Self::with_filter(capture.into(), port)?;
        info!(
            "Capturing on {} ({:?}, snaplen {}, timeout {:?})",
            config.device, source.link, config.snaplen, config.timeout
        );
        Ok(source)
    }

    /// Replays a savefile through the same filter.
    pub fn open_offline(path: impl AsRef<std::path::Path>, port: u16) -> Result<Self, SetupError> {
        let path = path.as_ref();
        let capture = Capture::from_file(path).map_err(|source| SetupError::OpenFile {
            path: path.display().to_string(),
            source,
        })?;

        let source = Self::with_filter(capture.into(), port)?;
        info!("Replaying {} ({:?})", path.display(), source.link);
        Ok(source)
    }

    fn with_filter(mut capture: Capture<dyn Activated>, port: u16) -> Result<Self, SetupError> {
        let filter = capture_filter(port);
        capture
            .filter(&filter, true)
            .map_err(|source| SetupError::InstallFilter {
                filter: filter.clone(),
                source,
            })?;
        debug!("Installed capture filter `{}`", filter);

        let link = LinkLayer::from(capture.get_datalink().0);
        Ok(Self { capture, link })
    }
}

#[cfg(feature = "packetcapture")]
impl FrameSource for PcapSource {
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, CaptureError> {
        match self.capture.next_packet() {
            Ok(packet) => Ok(Some(decode_frame(self.link, packet.data))),
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(pcap::Error::NoMorePackets) => Err(CaptureError::Exhausted),
            Err(e) => Err(CaptureError::Read(e.to_string())),
        }
    }
}
