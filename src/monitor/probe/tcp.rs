use std::time::{Duration, Instant};
use tokio::net::TcpStream;

use super::{CheckResult, elapsed_ms};

/// Succeeds once a TCP connection is established. No data is exchanged.
pub async fn check(host: &str, port: u16, timeout: Duration) -> CheckResult {
    let started = Instant::now();
    let result = tokio::time::timeout(timeout, TcpStream::connect((host, port))).await;
    let response_time = elapsed_ms(started);

    match result {
        Ok(Ok(stream)) => {
            drop(stream);
            CheckResult::success(response_time)
        }
        Ok(Err(e)) => CheckResult::failure(format!("Connection to {host}:{port} failed: {e}"))
            .with_response_time(response_time),
        Err(_) => CheckResult::failure(format!(
            "Connection timeout after {}ms",
            timeout.as_millis()
        ))
        .with_response_time(response_time),
    }
}
