//! Network path probe: sends keyed UDP datagrams and confirms, from raw
//! link-layer capture, that they actually cross a given interface.

pub mod capture;
pub mod error;
pub mod frame;
pub mod monitor;
pub mod packet;
#[cfg(feature = "packetcapture")]
pub mod probe;
pub mod sender;
pub mod task;

#[cfg(feature = "packetcapture")]
pub use capture::PcapSource;
pub use capture::{capture_filter, FrameSource, MonitorConfig};
pub use error::{CaptureError, DecodeError, SendError, SetupError};
pub use monitor::{MonitorHandle, PacketMonitor, ProbeOutcome};
pub use packet::KeyedPacket;
#[cfg(feature = "packetcapture")]
pub use probe::run_probe;
pub use sender::{loop_send_key, spawn_sender, SenderConfig, SEND_INTERVAL};
