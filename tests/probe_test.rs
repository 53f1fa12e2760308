//! End-to-end probes over the loopback device.
//!
//! Live capture needs root or CAP_NET_RAW; those tests skip themselves when
//! the loopback device cannot be opened.
#![cfg(all(
    feature = "packetcapture",
    any(target_os = "macos", target_os = "linux")
))]

use podnetprobe::{
    run_probe, spawn_sender, MonitorConfig, PacketMonitor, PcapSource, ProbeOutcome, SenderConfig,
    SetupError,
};
use serial_test::serial;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn loopback() -> &'static str {
    if cfg!(target_os = "linux") {
        "lo"
    } else {
        "lo0"
    }
}

fn loopback_config() -> MonitorConfig {
    MonitorConfig::new(loopback(), Duration::from_millis(100))
}

fn can_capture() -> bool {
    match PcapSource::open_live(&loopback_config(), 1) {
        Ok(_) => true,
        Err(e) => {
            println!("Skipping live capture test: {}", e);
            false
        }
    }
}

fn target(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_probe_matches_within_one_second() {
    if !can_capture() {
        return;
    }

    let started = Instant::now();
    let outcome = run_probe(
        loopback_config(),
        SenderConfig::new(target(12345), "A"),
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    assert_eq!(outcome, ProbeOutcome::Matched);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_monitor_then_sender_matches() {
    if !can_capture() {
        return;
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let monitor = PacketMonitor::new(loopback_config())
        .monitor(stop_flag.clone(), target(12346), "test-key")
        .unwrap();
    let sender = spawn_sender(SenderConfig::new(target(12346), "test-key"), stop_flag);

    let outcome = monitor.outcome_within(Duration::from_secs(3)).await;
    sender.stop_and_join().await.unwrap().unwrap();
    assert_eq!(outcome, ProbeOutcome::Matched);
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_wrong_key_is_cancelled_at_deadline() {
    if !can_capture() {
        return;
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let monitor = PacketMonitor::new(loopback_config())
        .monitor(stop_flag.clone(), target(12345), "B")
        .unwrap();
    let sender = spawn_sender(SenderConfig::new(target(12345), "A"), stop_flag);

    let outcome = monitor.outcome_within(Duration::from_millis(300)).await;
    sender.stop_and_join().await.unwrap().unwrap();
    assert_eq!(outcome, ProbeOutcome::Cancelled);
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_sender_to_other_port_is_not_seen() {
    if !can_capture() {
        return;
    }

    let outcome = {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let monitor = PacketMonitor::new(loopback_config())
            .monitor(stop_flag.clone(), target(12347), "A")
            .unwrap();
        let sender = spawn_sender(SenderConfig::new(target(12348), "A"), stop_flag);
        let outcome = monitor.outcome_within(Duration::from_millis(400)).await;
        sender.stop_and_join().await.unwrap().unwrap();
        outcome
    };
    assert_eq!(outcome, ProbeOutcome::Cancelled);
}

#[tokio::test]
async fn test_unknown_device_fails_setup() {
    let config = MonitorConfig::new("podnetprobe-missing0", Duration::from_millis(100));
    let result = PacketMonitor::new(config).monitor(
        Arc::new(AtomicBool::new(false)),
        target(12345),
        "A",
    );
    assert!(matches!(result, Err(SetupError::OpenDevice { .. })));
}

#[tokio::test]
async fn test_run_probe_reports_setup_failure() {
    let config = MonitorConfig::new("podnetprobe-missing0", Duration::from_millis(100));
    let result = run_probe(
        config,
        SenderConfig::new(target(12345), "A"),
        Duration::from_millis(300),
    )
    .await;

    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("podnetprobe-missing0"));
}
