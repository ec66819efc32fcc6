use tokio::net::UdpSocket;

use super::{QueryError, ServerState};

const SIMPLE_HEADER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
const A2S_INFO_REQUEST: &[u8] = b"\xFF\xFF\xFF\xFFTSource Engine Query\0";
const S2C_CHALLENGE: u8 = 0x41;
const S2A_INFO: u8 = 0x49;
const MAX_PACKET: usize = 1400;

/// Sends `A2S_INFO`, answering one challenge round if the server asks for it.
pub async fn query(host: &str, port: u16) -> Result<ServerState, QueryError> {
    let addr = tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| QueryError::Resolve(format!("{host}:{port}")))?;
    let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(addr).await?;

    let mut buf = [0u8; MAX_PACKET];
    socket.send(A2S_INFO_REQUEST).await?;
    let mut len = socket.recv(&mut buf).await?;

    if let Some(challenge) = parse_challenge(&buf[..len])? {
        let mut request = A2S_INFO_REQUEST.to_vec();
        request.extend_from_slice(&challenge);
        socket.send(&request).await?;
        len = socket.recv(&mut buf).await?;
    }

    parse_info(&buf[..len])
}

fn payload(packet: &[u8]) -> Result<(u8, &[u8]), QueryError> {
    if packet.len() < 5 {
        return Err(QueryError::Malformed(format!(
            "packet of {} bytes is too short",
            packet.len()
        )));
    }
    if packet[..4] != SIMPLE_HEADER {
        return Err(QueryError::Malformed(
            "split or unknown packet header".to_string(),
        ));
    }
    Ok((packet[4], &packet[5..]))
}

fn parse_challenge(packet: &[u8]) -> Result<Option<[u8; 4]>, QueryError> {
    let (kind, body) = payload(packet)?;
    if kind != S2C_CHALLENGE {
        return Ok(None);
    }
    let challenge: [u8; 4] = body
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| QueryError::Malformed("truncated challenge".to_string()))?;
    Ok(Some(challenge))
}

pub(crate) fn parse_info(packet: &[u8]) -> Result<ServerState, QueryError> {
    let (kind, body) = payload(packet)?;
    if kind != S2A_INFO {
        return Err(QueryError::Malformed(format!(
            "unexpected response type 0x{kind:02X}"
        )));
    }

    let mut reader = Reader { data: body };
    let _protocol = reader.u8()?;
    let name = reader.cstring()?;
    let map = reader.cstring()?;
    let _folder = reader.cstring()?;
    let _game = reader.cstring()?;
    let _app_id = reader.u16_le()?;
    let players = reader.u8()?;
    let max_players = reader.u8()?;

    Ok(ServerState {
        name,
        map: Some(map),
        players: u32::from(players),
        max_players: u32::from(max_players),
    })
}

struct Reader<'a> {
    data: &'a [u8],
}

impl Reader<'_> {
    fn u8(&mut self) -> Result<u8, QueryError> {
        let (&first, rest) = self
            .data
            .split_first()
            .ok_or_else(|| QueryError::Malformed("unexpected end of packet".to_string()))?;
        self.data = rest;
        Ok(first)
    }

    fn u16_le(&mut self) -> Result<u16, QueryError> {
        let lo = self.u8()?;
        let hi = self.u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn cstring(&mut self) -> Result<String, QueryError> {
        let end = self
            .data
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| QueryError::Malformed("unterminated string".to_string()))?;
        let value = String::from_utf8_lossy(&self.data[..end]).into_owned();
        self.data = &self.data[end + 1..];
        Ok(value)
    }
}
