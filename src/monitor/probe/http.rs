use once_cell::sync::OnceCell;
use reqwest::{Client, Method, Url, redirect};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{CheckResult, elapsed_ms};

const MAX_REDIRECTS: usize = 10;
const USER_AGENT: &str = concat!("healthwatch/", env!("CARGO_PKG_VERSION"));

static HTTP_CLIENT: OnceCell<Client> = OnceCell::new();

fn shared_client() -> Result<&'static Client, reqwest::Error> {
    HTTP_CLIENT.get_or_try_init(|| {
        Client::builder()
            // Endpoints commonly redirect http -> https or to a canonical host.
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .no_proxy()
            .build()
    })
}

pub fn timeout_message(timeout: Duration) -> String {
    format!("Request timeout after {}ms", timeout.as_millis())
}

/// Issues one request and compares the final status code with `expected_status`.
pub async fn check(url: &str, method: &str, expected_status: u16, timeout: Duration) -> CheckResult {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(e) => return CheckResult::failure(format!("Invalid URL: {e}")),
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return CheckResult::failure(format!(
            "Unsupported URL scheme `{}`; expected http or https",
            parsed.scheme()
        ));
    }
    let method = match Method::from_bytes(method.as_bytes()) {
        Ok(method) => method,
        Err(_) => return CheckResult::failure(format!("Invalid HTTP method `{method}`")),
    };
    let client = match shared_client() {
        Ok(client) => client,
        Err(e) => return CheckResult::failure(format!("Failed to build HTTP client: {e}")),
    };

    let started = Instant::now();
    let request = client.request(method, parsed).timeout(timeout).send();

    // Dropping the in-flight future on expiry closes the connection.
    let response = match tokio::time::timeout(timeout, request).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) if e.is_timeout() => {
            return CheckResult::failure(timeout_message(timeout))
                .with_response_time(elapsed_ms(started));
        }
        Ok(Err(e)) => {
            debug!(error = %e, %url, "HTTP probe request failed");
            return CheckResult::failure(e.to_string()).with_response_time(elapsed_ms(started));
        }
        Err(_) => {
            return CheckResult::failure(timeout_message(timeout))
                .with_response_time(elapsed_ms(started));
        }
    };

    let response_time = elapsed_ms(started);
    let status = response.status().as_u16();
    if status == expected_status {
        CheckResult::success(response_time).with_status_code(status)
    } else {
        CheckResult::failure(format!(
            "Expected status code {expected_status}, got {status}"
        ))
        .with_status_code(status)
        .with_response_time(response_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves canned responses keyed by request path until the test ends.
    async fn spawn_server(routes: Vec<(&'static str, &'static str)>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut read = 0;
                    while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => read += n,
                        }
                    }
                    let request = String::from_utf8_lossy(&buf[..read]).to_string();
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let Some((_, response)) = routes.iter().find(|(p, _)| *p == path) else {
                        let _ = socket
                            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                            .await;
                        return;
                    };
                    if response.is_empty() {
                        // Hang without answering.
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        return;
                    }
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        addr
    }

    const OK: &str = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";

    #[tokio::test]
    async fn matching_status_is_success() {
        let addr = spawn_server(vec![("/health", OK)]).await;
        let result = check(
            &format!("http://{addr}/health"),
            "GET",
            200,
            Duration::from_secs(5),
        )
        .await;
        assert!(result.success, "{result:?}");
        assert_eq!(result.status_code, Some(200));
        assert!(result.response_time_ms.is_some());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn unexpected_status_is_failure_with_code() {
        let addr = spawn_server(vec![]).await;
        let result = check(&format!("http://{addr}/missing"), "GET", 200, Duration::from_secs(5)).await;
        assert!(!result.success);
        assert_eq!(result.status_code, Some(404));
        assert_eq!(
            result.error.as_deref(),
            Some("Expected status code 200, got 404")
        );
    }

    #[tokio::test]
    async fn redirects_are_followed() {
        let addr = spawn_server(vec![
            (
                "/old",
                "HTTP/1.1 301 Moved Permanently\r\nLocation: /new\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            ),
            ("/new", OK),
        ])
        .await;
        let result = check(&format!("http://{addr}/old"), "GET", 200, Duration::from_secs(5)).await;
        assert!(result.success, "{result:?}");
        assert_eq!(result.status_code, Some(200));
    }

    #[tokio::test]
    async fn hanging_endpoint_times_out_with_message() {
        let addr = spawn_server(vec![("/slow", "")]).await;
        let result = check(&format!("http://{addr}/slow"), "GET", 200, Duration::from_secs(1)).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Request timeout after 1000ms"));
    }

    #[test]
    fn timeout_message_uses_milliseconds() {
        assert_eq!(
            timeout_message(Duration::from_secs(5)),
            "Request timeout after 5000ms"
        );
    }

    #[tokio::test]
    async fn non_http_scheme_is_rejected_without_io() {
        let result = check("ftp://example.com/file", "GET", 200, Duration::from_secs(1)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Unsupported URL scheme"));
    }

    #[tokio::test]
    async fn connection_refused_is_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = check(&format!("http://{addr}/"), "GET", 200, Duration::from_secs(2)).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
