//! Key sender behaviour against real sockets.

use podnetprobe::{loop_send_key, spawn_sender, KeyedPacket, SendError, SenderConfig};
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;

#[tokio::test]
async fn test_failed_write_ends_the_loop_immediately() {
    // Limited broadcast without SO_BROADCAST is refused by the stack
    let remote: SocketAddr = "255.255.255.255:9".parse().unwrap();
    let config = SenderConfig::new(remote, "A");
    let stop_flag = AtomicBool::new(false);

    let started = Instant::now();
    let result = timeout(Duration::from_secs(2), loop_send_key(&stop_flag, &config))
        .await
        .expect("sender must not keep ticking after a failed write");

    match result {
        Err(SendError::Write { addr, .. }) => assert_eq!(addr, remote),
        other => panic!("expected a write error, got {:?}", other),
    }
    // First tick only
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_zero_port_write_fails() {
    let remote: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let stop_flag = AtomicBool::new(false);
    let result = loop_send_key(&stop_flag, &SenderConfig::new(remote, "A")).await;
    assert!(matches!(result, Err(SendError::Write { .. })));
}

#[tokio::test]
async fn test_cadence_is_one_datagram_per_interval() {
    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let remote = receiver.local_addr().unwrap();
    let key = KeyedPacket::random();

    let task = spawn_sender(
        SenderConfig::new(remote, key.key.clone()),
        Arc::new(AtomicBool::new(false)),
    );

    let mut buf = [0u8; 256];
    let started = Instant::now();
    for _ in 0..3 {
        let len = timeout(Duration::from_secs(1), receiver.recv(&mut buf))
            .await
            .expect("datagram within a second")
            .unwrap();
        let packet = KeyedPacket::decode(&buf[..len]).unwrap();
        assert_eq!(packet, key);
    }
    // Three ticks at 100 ms, the first one a full interval after start
    assert!(started.elapsed() >= Duration::from_millis(250));

    task.stop_and_join().await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stop_is_clean_and_quick() {
    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let task = spawn_sender(
        SenderConfig::new(receiver.local_addr().unwrap(), "A"),
        Arc::new(AtomicBool::new(false)),
    );
    tokio::time::sleep(Duration::from_millis(150)).await;

    let result = timeout(Duration::from_millis(500), task.stop_and_join())
        .await
        .expect("stop honored at the next tick")
        .unwrap();
    assert!(result.is_ok());
}
