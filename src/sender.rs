use crate::error::SendError;
use crate::packet::KeyedPacket;
use crate::task::TaskHandle;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Fixed cadence of keyed datagrams.
pub const SEND_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Source address; the OS picks an ephemeral one when unset.
    pub local: Option<SocketAddr>,
    pub remote: SocketAddr,
    pub key: String,
    pub interval: Duration,
}

impl SenderConfig {
    pub fn new(remote: SocketAddr, key: impl Into<String>) -> Self {
        Self {
            local: None,
            remote,
            key: key.into(),
            interval: SEND_INTERVAL,
        }
    }

    pub fn with_local(mut self, local: SocketAddr) -> Self {
        self.local = Some(local);
        self
    }
}

/// Creates the session's UDP socket, bound to `local` or to an ephemeral
/// port of the remote's address family.
///
/// The socket stays unconnected: ICMP errors caused by a remote with no
/// listener must not fail later writes, since nothing is expected to
/// receive the probe.
fn open_socket(local: Option<SocketAddr>, remote: SocketAddr) -> Result<UdpSocket, SendError> {
    let socket = Socket::new(Domain::for_address(remote), Type::DGRAM, Some(Protocol::UDP))
        .map_err(SendError::Socket)?;

    let local = local.unwrap_or_else(|| match remote {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    });
    socket
        .bind(&local.into())
        .map_err(|source| SendError::Bind { addr: local, source })?;
    socket.set_nonblocking(true).map_err(SendError::Socket)?;

    UdpSocket::from_std(socket.into()).map_err(SendError::Socket)
}

/// Sends `{"key": ...}` to `config.remote` every `config.interval` until
/// `stop_flag` is raised.
///
/// One socket serves the whole session and is closed on return. The stop
/// flag is checked at each tick, so a stop takes effect after the current
/// tick. The first transport error ends the loop and is returned as is.
pub async fn loop_send_key(stop_flag: &AtomicBool, config: &SenderConfig) -> Result<(), SendError> {
    let payload = KeyedPacket::new(config.key.as_str()).encode()?;
    let socket = open_socket(config.local, config.remote)?;
    debug!(
        "Sending key {:?} from {:?} to {} every {:?}",
        config.key,
        socket.local_addr().ok(),
        config.remote,
        config.interval
    );

    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent: u64 = 0;

    loop {
        ticker.tick().await;
        if stop_flag.load(Ordering::Relaxed) {
            debug!("Key sender stopped after {} datagrams", sent);
            return Ok(());
        }

        if let Err(source) = socket.send_to(&payload, config.remote).await {
            warn!(
                "Key sender write to {} failed after {} datagrams: {}",
                config.remote, sent, source
            );
            return Err(SendError::Write {
                addr: config.remote,
                source,
            });
        }
        sent += 1;
        trace!("Sent keyed datagram #{} to {}", sent, config.remote);
    }
}

/// Runs [`loop_send_key`] on the current tokio runtime.
pub fn spawn_sender(
    config: SenderConfig,
    stop_flag: Arc<AtomicBool>,
) -> TaskHandle<Result<(), SendError>> {
    let flag = stop_flag.clone();
    let handle = tokio::spawn(async move { loop_send_key(&flag, &config).await });
    TaskHandle { handle, stop_flag }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn fast_config(remote: SocketAddr, key: &str) -> SenderConfig {
        let mut config = SenderConfig::new(remote, key);
        config.interval = Duration::from_millis(10);
        config
    }

    #[test]
    fn test_default_interval() {
        let config = SenderConfig::new("127.0.0.1:9".parse().unwrap(), "k");
        assert_eq!(config.interval, Duration::from_millis(100));
        assert!(config.local.is_none());
    }

    #[tokio::test]
    async fn test_sends_keyed_datagrams_until_stopped() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote = receiver.local_addr().unwrap();

        let task = spawn_sender(fast_config(remote, "A"), Arc::new(AtomicBool::new(false)));

        let mut buf = [0u8; 256];
        for _ in 0..3 {
            let len = timeout(Duration::from_secs(2), receiver.recv(&mut buf))
                .await
                .expect("datagram within deadline")
                .unwrap();
            assert_eq!(&buf[..len], br#"{"key":"A"}"#);
        }

        let result = timeout(Duration::from_secs(2), task.stop_and_join())
            .await
            .expect("sender stops")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_binds_requested_local_address() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote = receiver.local_addr().unwrap();

        let local = {
            let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap()
        };
        let config = fast_config(remote, "local").with_local(local);
        let task = spawn_sender(config, Arc::new(AtomicBool::new(false)));

        let mut buf = [0u8; 256];
        let (_, from) = timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .expect("datagram within deadline")
            .unwrap();
        assert_eq!(from, local);

        task.stop_and_join().await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_first_tick_sends_nothing() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote = receiver.local_addr().unwrap();

        let stop_flag = AtomicBool::new(true);
        let result = loop_send_key(&stop_flag, &fast_config(remote, "A")).await;
        assert!(result.is_ok());

        let mut buf = [0u8; 64];
        let received = timeout(Duration::from_millis(100), receiver.recv(&mut buf)).await;
        assert!(received.is_err(), "no datagram expected");
    }

    #[tokio::test]
    async fn test_remote_without_listener_keeps_sending() {
        let remote = {
            let closed = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            closed.local_addr().unwrap()
        };

        let task = spawn_sender(fast_config(remote, "A"), Arc::new(AtomicBool::new(false)));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!task.is_finished(), "port unreachable must not end the sender");

        task.stop_and_join().await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unassignable_local_address_fails_fast() {
        // TEST-NET-1, never configured on a host
        let local: SocketAddr = "192.0.2.1:0".parse().unwrap();
        let config = fast_config("127.0.0.1:9".parse().unwrap(), "A").with_local(local);

        let stop_flag = AtomicBool::new(false);
        let result = loop_send_key(&stop_flag, &config).await;
        assert!(matches!(result, Err(SendError::Bind { .. })));
    }
}
