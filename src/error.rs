//! Error types for the probe.

use std::net::SocketAddr;
use thiserror::Error;

/// Capture setup failures. Fatal: no worker is started.
#[derive(Debug, Error)]
pub enum SetupError {
    #[cfg(feature = "packetcapture")]
    #[error("failed to open capture device {device}: {source}")]
    OpenDevice {
        device: String,
        #[source]
        source: pcap::Error,
    },

    #[cfg(feature = "packetcapture")]
    #[error("failed to open capture file {path}: {source}")]
    OpenFile {
        path: String,
        #[source]
        source: pcap::Error,
    },

    #[cfg(feature = "packetcapture")]
    #[error("failed to install capture filter `{filter}`: {source}")]
    InstallFilter {
        filter: String,
        #[source]
        source: pcap::Error,
    },

    #[error("no tokio runtime available to run the scanning worker")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

/// Sender failures. The sending loop stops on the first one.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to create UDP socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error("failed to bind UDP socket to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode keyed packet: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write datagram to {addr}: {source}")]
    Write {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Payload decoding failures. Recoverable: the scan logs them and moves on.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,

    #[error("keyed packet is not a JSON object")]
    NotObject,

    #[error("invalid keyed packet: {0}")]
    Json(#[from] serde_json::Error),
}

/// Frame source failures seen by the scanning worker.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("frame source exhausted")]
    Exhausted,

    #[error("frame read failed: {0}")]
    Read(String),
}
