//! Game-server query probes.
//!
//! A server counts as up when it answers with a well-formed state payload.
//! Player and slot counts are only logged.

pub mod minecraft;
pub mod source;

use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use super::{CheckResult, elapsed_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameProtocol {
    /// Valve Source engine `A2S_INFO` over UDP.
    Source,
    /// Minecraft Java edition server list ping over TCP.
    Minecraft,
}

impl FromStr for GameProtocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "source" | "a2s" | "valve" => Ok(GameProtocol::Source),
            "minecraft" | "mc" => Ok(GameProtocol::Minecraft),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerState {
    pub name: String,
    pub map: Option<String>,
    pub players: u32,
    pub max_players: u32,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("could not resolve {0}")]
    Resolve(String),
}

pub async fn check(host: &str, port: u16, protocol: GameProtocol, timeout: Duration) -> CheckResult {
    let started = Instant::now();
    let query = async {
        match protocol {
            GameProtocol::Source => source::query(host, port).await,
            GameProtocol::Minecraft => minecraft::query(host, port).await,
        }
    };

    match tokio::time::timeout(timeout, query).await {
        Ok(Ok(state)) => {
            debug!(
                %host,
                port,
                server = %state.name,
                players = state.players,
                max_players = state.max_players,
                "Game server answered query."
            );
            CheckResult::success(elapsed_ms(started))
        }
        Ok(Err(e)) => CheckResult::failure(format!("Game query failed: {e}"))
            .with_response_time(elapsed_ms(started)),
        Err(_) => CheckResult::failure(format!("Query timeout after {}ms", timeout.as_millis()))
            .with_response_time(elapsed_ms(started)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_names_are_case_insensitive() {
        assert_eq!("Source".parse(), Ok(GameProtocol::Source));
        assert_eq!("a2s".parse(), Ok(GameProtocol::Source));
        assert_eq!("MINECRAFT".parse(), Ok(GameProtocol::Minecraft));
        assert_eq!("quake3".parse::<GameProtocol>(), Err(()));
    }

    #[tokio::test]
    async fn silent_udp_server_times_out() {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();

        let result = check("127.0.0.1", port, GameProtocol::Source, Duration::from_secs(1)).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Query timeout after 1000ms"));
        drop(socket);
    }
}
