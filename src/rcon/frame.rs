//! Length-prefixed RCON frames.
//!
//! Wire layout, all integers little-endian `i32`:
//!
//! ```text
//! size | id | type | body bytes (UTF-8) | 0x00 0x00
//! ```
//!
//! `size` counts everything after itself, so an empty body has size 10.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::RconError;

/// Packet type for an authentication request.
pub const SERVERDATA_AUTH: i32 = 3;
/// Packet type for a command request.
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
/// Packet type the server uses to answer an authentication request.
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
/// Packet type for command output.
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Request id the server echoes when authentication is rejected.
pub const AUTH_FAILED_ID: i32 = -1;

/// id + type + two terminating nulls.
const HEADER_AND_TRAILER: usize = 10;

/// Upper bound on a single frame, well above the 4 KiB most servers emit.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// What a request asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Authenticate with the shared secret.
    Auth,
    /// Execute a console command.
    Exec,
}

impl RequestKind {
    /// Numeric packet type on the wire.
    pub fn wire_type(self) -> i32 {
        match self {
            Self::Auth => SERVERDATA_AUTH,
            Self::Exec => SERVERDATA_EXECCOMMAND,
        }
    }
}

/// Outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconRequest {
    /// Correlation id echoed by the server.
    pub id: i32,
    /// Auth or exec.
    pub kind: RequestKind,
    /// Password or command text.
    pub body: String,
}

impl RconRequest {
    /// Serialize into a complete frame including the size prefix.
    ///
    /// # Errors
    ///
    /// Returns [`RconError::Decode`] if the body is too large for one frame.
    pub fn encode(&self) -> Result<Vec<u8>, RconError> {
        let body = self.body.as_bytes();
        let payload_len = body
            .len()
            .checked_add(HEADER_AND_TRAILER)
            .filter(|len| *len <= MAX_FRAME_SIZE)
            .ok_or_else(|| {
                RconError::Decode(format!("request body of {} bytes is too large", body.len()))
            })?;
        let size = i32::try_from(payload_len)
            .map_err(|_| RconError::Decode("frame size exceeds i32".to_owned()))?;

        let mut frame = Vec::with_capacity(payload_len.saturating_add(4));
        frame.extend_from_slice(&size.to_le_bytes());
        frame.extend_from_slice(&self.id.to_le_bytes());
        frame.extend_from_slice(&self.kind.wire_type().to_le_bytes());
        frame.extend_from_slice(body);
        frame.extend_from_slice(&[0, 0]);
        Ok(frame)
    }
}

/// Inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconResponse {
    /// Echoed correlation id, or [`AUTH_FAILED_ID`].
    pub id: i32,
    /// Raw packet type.
    pub packet_type: i32,
    /// Response text with trailing nulls removed.
    pub body: String,
}

/// Decode the part of a frame that follows the size prefix.
///
/// # Errors
///
/// Returns [`RconError::Decode`] if the payload is shorter than a header.
pub fn decode_payload(payload: &[u8]) -> Result<RconResponse, RconError> {
    if payload.len() < HEADER_AND_TRAILER {
        return Err(RconError::Decode(format!(
            "payload of {} bytes is shorter than the {HEADER_AND_TRAILER}-byte minimum",
            payload.len()
        )));
    }
    let id = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let packet_type = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);

    let raw_body = &payload[8..];
    let end = raw_body
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |pos| pos.saturating_add(1));
    let body = String::from_utf8_lossy(&raw_body[..end]).into_owned();

    Ok(RconResponse {
        id,
        packet_type,
        body,
    })
}

/// Write one request frame.
///
/// # Errors
///
/// Returns an error on encode or socket failure.
pub async fn write_frame<W>(writer: &mut W, request: &RconRequest) -> Result<(), RconError>
where
    W: AsyncWrite + Unpin,
{
    let frame = request.encode()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one response frame.
///
/// # Errors
///
/// Returns [`RconError::Decode`] for an out-of-range size prefix and
/// [`RconError::Io`] if the peer closes mid-frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<RconResponse, RconError>
where
    R: AsyncRead + Unpin,
{
    let mut size_buf = [0u8; 4];
    reader.read_exact(&mut size_buf).await?;
    let size = i32::from_le_bytes(size_buf);

    let size = usize::try_from(size)
        .ok()
        .filter(|s| (HEADER_AND_TRAILER..=MAX_FRAME_SIZE).contains(s))
        .ok_or_else(|| RconError::Decode(format!("invalid frame size {size}")))?;

    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await?;
    decode_payload(&payload)
}
