//! ICMP echo probe.
//!
//! Uses a raw ICMP socket through `surge-ping` when the process is allowed to
//! open one, and falls back to the system `ping` binary otherwise. Either way
//! exactly one echo request is sent and exactly one reply is required.

use rand::random;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::{Duration, Instant};
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};
use tokio::process::Command;
use tracing::debug;

use super::{CheckResult, elapsed_ms};

const PAYLOAD: [u8; 32] = [0; 32];

fn timeout_message(timeout: Duration) -> String {
    format!("Ping timeout after {}ms", timeout.as_millis())
}

pub async fn check(host: &str, timeout: Duration) -> CheckResult {
    let started = Instant::now();
    if host.starts_with('-') {
        return CheckResult::failure(format!("Invalid host `{host}`"));
    }

    let addr = match tokio::time::timeout(timeout, resolve(host)).await {
        Ok(Ok(addr)) => addr,
        Ok(Err(e)) => return CheckResult::failure(e),
        Err(_) => {
            return CheckResult::failure(timeout_message(timeout))
                .with_response_time(elapsed_ms(started));
        }
    };

    let remaining = timeout.saturating_sub(started.elapsed());
    let config = match addr {
        IpAddr::V4(_) => Config::default(),
        IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
    };
    match Client::new(&config) {
        Ok(client) => icmp_echo(&client, addr, remaining, timeout, started).await,
        Err(e) => {
            debug!(error = %e, %host, "Raw ICMP socket unavailable, falling back to system ping.");
            system_ping(host, remaining, timeout, started).await
        }
    }
}

async fn resolve(host: &str) -> Result<IpAddr, String> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| format!("Failed to resolve host {host}: {e}"))?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| format!("DNS resolution for {host} returned no addresses"))
}

async fn icmp_echo(
    client: &Client,
    addr: IpAddr,
    remaining: Duration,
    timeout: Duration,
    started: Instant,
) -> CheckResult {
    let mut pinger = client.pinger(addr, PingIdentifier(random())).await;
    pinger.timeout(remaining);
    match pinger.ping(PingSequence(0), &PAYLOAD).await {
        Ok((_reply, rtt)) => CheckResult::success(rtt.as_secs_f64() * 1000.0),
        Err(SurgeError::Timeout { .. }) => {
            CheckResult::failure(timeout_message(timeout)).with_response_time(elapsed_ms(started))
        }
        Err(e) => CheckResult::failure(format!("Ping failed: {e}"))
            .with_response_time(elapsed_ms(started)),
    }
}

async fn system_ping(
    host: &str,
    remaining: Duration,
    timeout: Duration,
    started: Instant,
) -> CheckResult {
    let mut command = Command::new("ping");
    if cfg!(windows) {
        command.args(["-n", "1", "-w", &remaining.as_millis().max(1).to_string(), host]);
    } else {
        command.args(["-c", "1", "-W", &remaining.as_secs().max(1).to_string(), host]);
    }
    // The child is killed if the deadline drops the future.
    command
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = match tokio::time::timeout(remaining, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return CheckResult::failure(format!("Failed to run ping: {e}")),
        Err(_) => {
            return CheckResult::failure(timeout_message(timeout))
                .with_response_time(elapsed_ms(started));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let summary = parse_ping_output(&stdout);
    let replied = match summary.received {
        Some(received) => received == 1,
        None => output.status.success() && summary.rtt_ms.is_some(),
    };

    if replied {
        CheckResult::success(summary.rtt_ms.unwrap_or_else(|| elapsed_ms(started)))
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr
            .lines()
            .chain(stdout.lines())
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("no reply");
        CheckResult::failure(format!("Ping to {host} failed: {reason}"))
            .with_response_time(elapsed_ms(started))
    }
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct PingSummary {
    pub received: Option<u32>,
    pub rtt_ms: Option<f64>,
}

/// Extracts the reply count and round-trip time from `ping` output on
/// Linux, macOS/BSD and Windows.
pub(crate) fn parse_ping_output(output: &str) -> PingSummary {
    let mut summary = PingSummary::default();
    for line in output.lines() {
        let lower = line.to_ascii_lowercase();
        if summary.rtt_ms.is_none() {
            summary.rtt_ms = parse_rtt(&lower);
        }
        if summary.received.is_none() {
            summary.received = parse_received(&lower);
        }
    }
    summary
}

fn parse_rtt(line: &str) -> Option<f64> {
    let idx = line.find("time=").map(|i| i + 5).or_else(|| line.find("time<").map(|i| i + 5))?;
    let number: String = line[idx..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    number.parse().ok()
}

fn parse_received(line: &str) -> Option<u32> {
    // Windows: "Packets: Sent = 1, Received = 1, Lost = 0"
    if let Some(idx) = line.find("received = ") {
        let number: String = line[idx + 11..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        return number.parse().ok();
    }
    // Linux: "1 packets transmitted, 1 received"; BSD: "1 packets received"
    let idx = line.find(" received")?;
    line[..idx]
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty() && *t != "packets")
        .last()
        .and_then(|t| t.parse().ok())
}
