//! Binary framing: fixed 32-byte header followed by the payload.
//!
//! ```text
//! offset  size  field
//!  0      1     type tag
//!  1      8     sender id   (u64 little-endian)
//!  9      8     receiver id
//! 17      8     timestamp   (u64 ms since epoch)
//! 25      4     payload length (u32)
//! 29      3     reserved (zero on write, ignored on read)
//! 32      n     payload bytes
//! ```

use lattice_types::{NodeId, Timestamp};

use crate::{Message, MessageKind};

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 32;

/// Upper bound on a single frame's payload.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Error decoding or encoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("truncated frame: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("unknown message tag {0}")]
    UnknownTag(u8),

    #[error("payload length {0} exceeds frame limit")]
    PayloadTooLarge(usize),

    #[error("malformed {0} payload")]
    MalformedPayload(&'static str),
}

/// Encode a message into a single frame.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, WireError> {
    if msg.payload.len() > MAX_PAYLOAD_LEN {
        return Err(WireError::PayloadTooLarge(msg.payload.len()));
    }

    let mut out = Vec::with_capacity(HEADER_LEN + msg.payload.len());
    out.push(msg.kind.tag());
    out.extend_from_slice(&msg.sender.as_u64().to_le_bytes());
    out.extend_from_slice(&msg.receiver.as_u64().to_le_bytes());
    out.extend_from_slice(&msg.timestamp.as_millis().to_le_bytes());
    out.extend_from_slice(&(msg.payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&msg.payload);
    Ok(out)
}

/// Decode one frame from the front of `bytes`. Returns the message and the
/// number of bytes consumed, so a read loop can decode back-to-back frames
/// out of a single buffer.
pub fn decode_message(bytes: &[u8]) -> Result<(Message, usize), WireError> {
    if bytes.len() < HEADER_LEN {
        return Err(WireError::Truncated {
            need: HEADER_LEN,
            have: bytes.len(),
        });
    }

    let kind = MessageKind::from_tag(bytes[0]).ok_or(WireError::UnknownTag(bytes[0]))?;
    let sender = NodeId::new(read_u64(&bytes[1..9]));
    let receiver = NodeId::new(read_u64(&bytes[9..17]));
    let timestamp = Timestamp::from_millis(read_u64(&bytes[17..25]));
    let payload_len = read_u32(&bytes[25..29]) as usize;
    // bytes 29..32 are reserved and ignored

    if payload_len > MAX_PAYLOAD_LEN {
        return Err(WireError::PayloadTooLarge(payload_len));
    }

    let total = HEADER_LEN + payload_len;
    if bytes.len() < total {
        return Err(WireError::Truncated {
            need: total,
            have: bytes.len(),
        });
    }

    let payload = bytes[HEADER_LEN..total].to_vec();
    Ok((
        Message::new(kind, sender, receiver, timestamp, payload),
        total,
    ))
}

pub(crate) fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

pub(crate) fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}
