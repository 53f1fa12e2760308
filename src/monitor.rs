//! # PacketMonitor
//!
//! Watches a capture device for a keyed UDP datagram and reports a single
//! [`ProbeOutcome`].
//!
//! Setup (device open, filter install) runs synchronously in
//! [`PacketMonitor::monitor`] and fails the call with a [`SetupError`]. After
//! that, one blocking worker owns the capture and scans frames in arrival
//! order:
//!
//! - frames without a UDP layer, or sent to another port, are skipped
//! - payloads that do not decode as a keyed packet are logged and skipped
//! - the first payload whose key equals the expected key yields `Matched`
//! - a raised stop flag yields `Cancelled`, observed between frame reads, so
//!   the read timeout bounds how long a stop takes
//! - an exhausted or failing source also yields `Cancelled`
//!
//! The outcome travels over a oneshot channel. It is written exactly once:
//! if the worker unwinds without reporting, `Cancelled` is sent on its way
//! out.

#[cfg(feature = "packetcapture")]
use crate::capture::{MonitorConfig, PcapSource};
use crate::capture::FrameSource;
use crate::error::{CaptureError, SetupError};
use crate::packet::KeyedPacket;
use crate::task::{StopOnDrop, TaskHandle};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, dispatcher, error, field, info, info_span, trace, warn, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A datagram carrying the expected key was captured.
    Matched,
    /// The scan ended without seeing the key.
    Cancelled,
}

impl ProbeOutcome {
    pub fn is_matched(self) -> bool {
        self == ProbeOutcome::Matched
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProbeOutcome::Matched => "matched",
            ProbeOutcome::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Write side of the result channel. Sends `Cancelled` if dropped unfired.
struct OutcomeSignal {
    sender: Option<oneshot::Sender<ProbeOutcome>>,
}

impl OutcomeSignal {
    fn new(sender: oneshot::Sender<ProbeOutcome>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    fn fire(mut self, outcome: ProbeOutcome) {
        if let Some(sender) = self.sender.take() {
            // The receiver may already be gone
            let _ = sender.send(outcome);
        }
    }
}

impl Drop for OutcomeSignal {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            warn!("Scanning worker ended without an outcome, reporting cancelled");
            let _ = sender.send(ProbeOutcome::Cancelled);
        }
    }
}

/// Caller side of a running monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    result: oneshot::Receiver<ProbeOutcome>,
    /// Set once `try_outcome` has taken the value off the channel.
    received: Option<ProbeOutcome>,
    worker: TaskHandle<()>,
    _stop_on_drop: StopOnDrop,
}

impl MonitorHandle {
    /// Raises the shared stop flag.
    pub fn stop(&self) {
        self.worker.stop();
    }

    /// Non-blocking check for the outcome.
    pub fn try_outcome(&mut self) -> Option<ProbeOutcome> {
        if self.received.is_none() {
            self.received = self.result.try_recv().ok();
        }
        self.received
    }

    /// Waits for the outcome, then for the worker to release the capture.
    pub async fn outcome(mut self) -> ProbeOutcome {
        let outcome = match self.received {
            Some(outcome) => outcome,
            None => (&mut self.result).await.unwrap_or(ProbeOutcome::Cancelled),
        };
        self.finish(outcome).await
    }

    /// Like [`outcome`](Self::outcome), but raises the stop flag once
    /// `deadline` has elapsed. A match seen before the worker notices the
    /// stop still counts.
    pub async fn outcome_within(mut self, deadline: Duration) -> ProbeOutcome {
        if let Some(outcome) = self.received {
            return self.finish(outcome).await;
        }
        let outcome = match tokio::time::timeout(deadline, &mut self.result).await {
            Ok(received) => received.unwrap_or(ProbeOutcome::Cancelled),
            Err(_) => {
                debug!("Probe deadline of {:?} reached, stopping monitor", deadline);
                self.worker.stop();
                (&mut self.result).await.unwrap_or(ProbeOutcome::Cancelled)
            }
        };
        self.finish(outcome).await
    }

    async fn finish(self, outcome: ProbeOutcome) -> ProbeOutcome {
        if let Err(e) = self.worker.join().await {
            error!("Scanning worker failed: {}", e);
        }
        outcome
    }
}

/// Raw-capture monitor for keyed datagrams.
pub struct PacketMonitor {
    #[cfg(feature = "packetcapture")]
    config: MonitorConfig,
    span: Span,
}

impl PacketMonitor {
    #[cfg(feature = "packetcapture")]
    pub fn new(config: MonitorConfig) -> Self {
        let span = info_span!(
            "packet_monitor",
            device = %config.device,
            port = field::Empty
        );
        Self { config, span }
    }

    /// A monitor with no capture device, for [`monitor_source`](Self::monitor_source).
    pub fn detached() -> Self {
        Self {
            #[cfg(feature = "packetcapture")]
            config: MonitorConfig::default(),
            span: info_span!("packet_monitor", device = "detached", port = field::Empty),
        }
    }

    /// Replaces the span the worker logs in. A `port` field on it is filled
    /// in when scanning starts.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Opens the configured device, installs `udp and dst port <target port>`
    /// and starts scanning for `key`.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(feature = "packetcapture")]
    pub fn monitor(
        &self,
        stop_flag: Arc<AtomicBool>,
        target: SocketAddr,
        key: impl Into<String>,
    ) -> Result<MonitorHandle, SetupError> {
        let runtime = Handle::try_current()?;
        let source = self
            .span
            .in_scope(|| PcapSource::open_live(&self.config, target.port()))?;
        Ok(self.spawn(runtime, source, stop_flag, target.port(), key.into()))
    }

    /// Scans an already opened frame source for `key`.
    pub fn monitor_source<S>(
        &self,
        source: S,
        stop_flag: Arc<AtomicBool>,
        target: SocketAddr,
        key: impl Into<String>,
    ) -> Result<MonitorHandle, SetupError>
    where
        S: FrameSource + 'static,
    {
        let runtime = Handle::try_current()?;
        Ok(self.spawn(runtime, source, stop_flag, target.port(), key.into()))
    }

    fn spawn<S>(
        &self,
        runtime: Handle,
        mut source: S,
        stop_flag: Arc<AtomicBool>,
        port: u16,
        key: String,
    ) -> MonitorHandle
    where
        S: FrameSource + 'static,
    {
        let (sender, result) = oneshot::channel();
        self.span.record("port", port);
        let span = self.span.clone();
        let dispatch = dispatcher::get_default(|current| current.clone());
        let flag = stop_flag.clone();

        let handle = runtime.spawn_blocking(move || {
            dispatcher::with_default(&dispatch, || {
                span.in_scope(|| {
                    let signal = OutcomeSignal::new(sender);
                    let outcome = scan(&mut source, &flag, port, &key);
                    // Release the capture before the caller hears back
                    drop(source);
                    info!("Probe for port {} finished: {}", port, outcome);
                    signal.fire(outcome);
                })
            })
        });

        MonitorHandle {
            result,
            received: None,
            worker: TaskHandle {
                handle,
                stop_flag: stop_flag.clone(),
            },
            _stop_on_drop: StopOnDrop(stop_flag),
        }
    }
}

/// The scanning loop. Returns on the first matching frame, on stop, or when
/// the source gives out.
fn scan<S>(source: &mut S, stop_flag: &AtomicBool, port: u16, key: &str) -> ProbeOutcome
where
    S: FrameSource + ?Sized,
{
    let mut frames: u64 = 0;

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            debug!("Stop observed after {} frames", frames);
            return ProbeOutcome::Cancelled;
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(CaptureError::Exhausted) => {
                info!("Frame source exhausted after {} frames", frames);
                return ProbeOutcome::Cancelled;
            }
            Err(e) => {
                error!("Capture read failed after {} frames: {}", frames, e);
                return ProbeOutcome::Cancelled;
            }
        };
        frames += 1;

        let Some(udp) = frame.udp else {
            trace!("Skipping frame #{} without UDP layer", frames);
            continue;
        };
        // The capture filter should already guarantee this
        if udp.destination_port != port {
            trace!(
                "Skipping frame #{} to port {} (watching {})",
                frames,
                udp.destination_port,
                port
            );
            continue;
        }

        match KeyedPacket::decode(&udp.payload) {
            Ok(packet) if packet.matches(key) => {
                debug!(
                    "Key matched in frame #{} from {:?}:{}",
                    frames,
                    frame.ipv4.map(|ip| ip.source),
                    udp.source_port
                );
                return ProbeOutcome::Matched;
            }
            Ok(packet) => {
                trace!("Frame #{} carries key {:?}, not ours", frames, packet.key);
            }
            Err(e) => {
                warn!(
                    payload = %String::from_utf8_lossy(&udp.payload),
                    "Failed to decode keyed packet: {}", e
                );
            }
        }
    }
}
