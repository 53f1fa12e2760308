//! Example: Keyed UDP probe
//!
//! Sends `{"key": ...}` datagrams to a target and checks, by capturing on a
//! device, that they actually cross it. Live capture needs root or
//! CAP_NET_RAW.
//!
//!     cargo run --example probe --features examples -- -i lo -t 127.0.0.1:12345

use anyhow::{Context, Result};
use clap::{arg, Command};
use podnetprobe::{run_probe, KeyedPacket, MonitorConfig, SenderConfig};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;
use tracing::Level;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let matches = Command::new("probe")
        .about("Verify that keyed UDP datagrams cross a network device")
        .arg(arg!(-i --interface <INTERFACE> "Device to capture on").default_value("lo"))
        .arg(
            arg!(-t --target <ADDR> "Destination of the keyed datagrams")
                .default_value("127.0.0.1:12345"),
        )
        .arg(arg!(-l --local <ADDR> "Source address of the keyed datagrams"))
        .arg(arg!(-k --key <KEY> "Correlation key, random when omitted"))
        .arg(
            arg!(-d --deadline <MILLIS> "Give up after this many milliseconds")
                .default_value("1000"),
        )
        .arg(arg!(--timeout <MILLIS> "Capture read timeout in milliseconds").default_value("100"))
        .arg(arg!(-v --verbose "Debug logging"))
        .get_matches();

    let level = if matches.get_flag("verbose") {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(level)
        .init();

    let interface = matches
        .get_one::<String>("interface")
        .context("missing interface")?;
    let target: SocketAddr = matches
        .get_one::<String>("target")
        .context("missing target")?
        .parse()
        .context("invalid target address")?;
    let local = matches
        .get_one::<String>("local")
        .map(|s| s.parse::<SocketAddr>())
        .transpose()
        .context("invalid local address")?;
    let key = match matches.get_one::<String>("key") {
        Some(key) => key.clone(),
        None => KeyedPacket::random().key,
    };
    let deadline = parse_millis(matches.get_one::<String>("deadline"), "deadline")?;
    let timeout = parse_millis(matches.get_one::<String>("timeout"), "timeout")?;

    let mut sender_config = SenderConfig::new(target, key.as_str());
    if let Some(local) = local {
        sender_config = sender_config.with_local(local);
    }

    println!("Probing {} via {} with key {}", target, interface, key);
    let monitor_config = MonitorConfig::new(interface.as_str(), timeout);
    let outcome = run_probe(monitor_config, sender_config, deadline).await?;
    println!("Result: {}", outcome);

    Ok(if outcome.is_matched() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn parse_millis(value: Option<&String>, name: &str) -> Result<Duration> {
    let millis = value
        .with_context(|| format!("missing {}", name))?
        .parse::<u64>()
        .with_context(|| format!("invalid {}", name))?;
    Ok(Duration::from_millis(millis))
}
