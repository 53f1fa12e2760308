use crate::capture::MonitorConfig;
use crate::monitor::{PacketMonitor, ProbeOutcome};
use crate::sender::{spawn_sender, SenderConfig};
use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Runs one complete probe: captures on `monitor_config.device` for the
/// datagrams the sender emits to `sender_config.remote`, and gives up after
/// `deadline`.
///
/// The monitor is started before the first datagram goes out. A sender
/// failure is returned as an error unless the key was already captured.
pub async fn run_probe(
    monitor_config: MonitorConfig,
    sender_config: SenderConfig,
    deadline: Duration,
) -> Result<ProbeOutcome> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let remote = sender_config.remote;
    let device = monitor_config.device.clone();

    let monitor = PacketMonitor::new(monitor_config)
        .monitor(stop_flag.clone(), remote, sender_config.key.clone())
        .with_context(|| format!("Failed to start packet monitor on {}", device))?;
    info!(
        "Probing {} through {} with key {:?}",
        remote, device, sender_config.key
    );

    let mut sender = spawn_sender(sender_config, stop_flag.clone());
    let outcome_fut = monitor.outcome_within(deadline);
    tokio::pin!(outcome_fut);

    let (outcome, send_result) = tokio::select! {
        outcome = &mut outcome_fut => {
            sender.stop();
            (outcome, sender.join().await)
        }
        send_result = &mut sender.handle => {
            // The sender only ends on its own when it fails
            stop_flag.store(true, Ordering::Relaxed);
            (outcome_fut.await, send_result)
        }
    };

    match send_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) if !outcome.is_matched() => {
            return Err(e).with_context(|| format!("Key sender to {} failed", remote));
        }
        Ok(Err(e)) => warn!("Key sender failed after the key was captured: {}", e),
        Err(e) => return Err(anyhow!("Key sender task failed: {}", e)),
    }

    info!("Probe of {} through {}: {}", remote, device, outcome);
    Ok(outcome)
}
