use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{QueryError, ServerState};

/// `-1` asks the server to report its own protocol version.
const PROTOCOL_VERSION: i32 = -1;
const NEXT_STATE_STATUS: i32 = 1;
const MAX_STATUS_LEN: i32 = 1 << 20;

/// Server list ping: handshake, status request, JSON status response.
pub async fn query(host: &str, port: u16) -> Result<ServerState, QueryError> {
    let mut stream = TcpStream::connect((host, port)).await?;

    let mut handshake = Vec::new();
    write_varint(&mut handshake, 0x00);
    write_varint(&mut handshake, PROTOCOL_VERSION);
    write_string(&mut handshake, host);
    handshake.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut handshake, NEXT_STATE_STATUS);

    stream.write_all(&frame(&handshake)).await?;
    stream.write_all(&frame(&[0x00])).await?;

    let _packet_len = read_varint(&mut stream).await?;
    let packet_id = read_varint(&mut stream).await?;
    if packet_id != 0x00 {
        return Err(QueryError::Malformed(format!(
            "unexpected packet id 0x{packet_id:02X}"
        )));
    }
    let json_len = read_varint(&mut stream).await?;
    if !(0..=MAX_STATUS_LEN).contains(&json_len) {
        return Err(QueryError::Malformed(format!(
            "status length {json_len} out of range"
        )));
    }
    let mut json = vec![0u8; json_len as usize];
    stream.read_exact(&mut json).await?;

    parse_status(&json)
}

pub(crate) fn parse_status(json: &[u8]) -> Result<ServerState, QueryError> {
    let status: Value = serde_json::from_slice(json)
        .map_err(|e| QueryError::Malformed(format!("invalid status JSON: {e}")))?;
    if status.get("version").is_none() && status.get("players").is_none() {
        return Err(QueryError::Malformed(
            "status has neither version nor players".to_string(),
        ));
    }

    let count = |key: &str| {
        status
            .get("players")
            .and_then(|p| p.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    };
    let name = match status.get("description") {
        Some(Value::String(text)) => text.clone(),
        Some(description) => description
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        None => String::new(),
    };

    Ok(ServerState {
        name,
        map: None,
        players: count("online"),
        max_players: count("max"),
    })
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + 5);
    write_varint(&mut framed, payload.len() as i32);
    framed.extend_from_slice(payload);
    framed
}

fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_varint(buf, value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32, QueryError> {
    let mut value: u32 = 0;
    for i in 0..5 {
        let byte = reader.read_u8().await?;
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(QueryError::Malformed("varint longer than 5 bytes".to_string()))
}
