//! Codec for encoding and decoding Roomcast envelopes.
//!
//! Envelopes are serialized as JSON, one envelope per transport frame.

use bytes::Bytes;
use thiserror::Error;

use crate::envelope::Envelope;
use crate::ids::{RoomId, UserId};

/// Maximum encoded envelope size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Frame carried no data.
    #[error("Empty frame")]
    Empty,

    /// JSON encoding or decoding error.
    #[error("Malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode an envelope to bytes.
///
/// # Errors
///
/// Returns an error if the envelope is too large or serialization fails.
pub fn encode(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(envelope)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode an envelope from a single frame.
///
/// # Errors
///
/// Returns an error if the frame is empty, too large, or not a valid envelope.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::Empty);
    }

    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    Ok(serde_json::from_slice(data)?)
}

/// Decode a client frame, overwrite its sender identity and re-encode it.
///
/// This is the only place the hub interprets payload bytes.
///
/// # Errors
///
/// Returns an error if the frame cannot be decoded or re-encoded.
pub fn restamp(
    data: &[u8],
    user_id: UserId,
    username: &str,
    room_id: RoomId,
    now_ms: i64,
) -> Result<Bytes, ProtocolError> {
    let mut envelope = decode(data)?;
    envelope.stamp_sender(user_id, username, room_id, now_ms);
    encode(&envelope)
}
