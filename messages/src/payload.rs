//! Payload codecs for the control vocabulary.
//!
//! All integers are little-endian. Decoders are length-checked and return
//! [`WireError::MalformedPayload`] rather than panicking on short input.

use lattice_types::{NetworkAddress, NodeId};

use crate::wire::{read_u32, read_u64, WireError};

// ── Node lists ──────────────────────────────────────────────────────────

/// Encode a node-id list: `u32` count followed by count × `u64` ids.
pub fn encode_node_list(ids: &[NodeId]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + ids.len() * 8);
    out.extend_from_slice(&(ids.len() as u32).to_le_bytes());
    for id in ids {
        out.extend_from_slice(&id.as_u64().to_le_bytes());
    }
    out
}

pub fn decode_node_list(bytes: &[u8]) -> Result<Vec<NodeId>, WireError> {
    if bytes.len() < 4 {
        return Err(WireError::MalformedPayload("node list"));
    }
    let count = read_u32(&bytes[..4]) as usize;
    let expected = 4 + count * 8;
    if bytes.len() < expected {
        return Err(WireError::MalformedPayload("node list"));
    }

    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let off = 4 + i * 8;
        ids.push(NodeId::new(read_u64(&bytes[off..off + 8])));
    }
    Ok(ids)
}

// ── Join request ────────────────────────────────────────────────────────

/// Encode the joiner's advertised address: `u16` port, `u16` host length,
/// host UTF-8 bytes. The joiner's id rides in the envelope sender field.
pub fn encode_join_request(address: &NetworkAddress) -> Vec<u8> {
    let host = address.host.as_bytes();
    let mut out = Vec::with_capacity(4 + host.len());
    out.extend_from_slice(&address.port.to_le_bytes());
    out.extend_from_slice(&(host.len() as u16).to_le_bytes());
    out.extend_from_slice(host);
    out
}

pub fn decode_join_request(bytes: &[u8]) -> Result<NetworkAddress, WireError> {
    if bytes.len() < 4 {
        return Err(WireError::MalformedPayload("join request"));
    }
    let port = u16::from_le_bytes([bytes[0], bytes[1]]);
    let host_len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
    if bytes.len() < 4 + host_len {
        return Err(WireError::MalformedPayload("join request"));
    }
    let host = std::str::from_utf8(&bytes[4..4 + host_len])
        .map_err(|_| WireError::MalformedPayload("join request"))?;
    Ok(NetworkAddress::new(host, port))
}

// ── Join response ───────────────────────────────────────────────────────

/// Encode the admission verdict: one `accepted` byte followed by the
/// suggested-peer node list.
pub fn encode_join_response(accepted: bool, peers: &[NodeId]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + peers.len() * 8);
    out.push(u8::from(accepted));
    out.extend_from_slice(&encode_node_list(peers));
    out
}

pub fn decode_join_response(bytes: &[u8]) -> Result<(bool, Vec<NodeId>), WireError> {
    if bytes.is_empty() {
        return Err(WireError::MalformedPayload("join response"));
    }
    let accepted = bytes[0] != 0;
    let peers = decode_node_list(&bytes[1..])?;
    Ok((accepted, peers))
}

// ── Peer discovery ──────────────────────────────────────────────────────

pub fn encode_peer_discovery(max_peers: i32) -> Vec<u8> {
    max_peers.to_le_bytes().to_vec()
}

pub fn decode_peer_discovery(bytes: &[u8]) -> Result<i32, WireError> {
    if bytes.len() < 4 {
        return Err(WireError::MalformedPayload("peer discovery"));
    }
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

// ── Reliable-message acknowledgment ─────────────────────────────────────

pub fn encode_ack(message_id: u64) -> Vec<u8> {
    message_id.to_le_bytes().to_vec()
}

pub fn decode_ack(bytes: &[u8]) -> Result<u64, WireError> {
    if bytes.len() < 8 {
        return Err(WireError::MalformedPayload("ack"));
    }
    Ok(read_u64(&bytes[..8]))
}

// ── Data chunks ─────────────────────────────────────────────────────────

/// Size of the chunk header preceding the chunk bytes.
pub const CHUNK_HEADER_LEN: usize = 21;

/// One segment of a chunked transfer.
///
/// For a given transfer, every chunk advertises the same `total_chunks`;
/// exactly the chunk with `sequence == total_chunks - 1` carries `is_last`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// The owning transfer's id.
    pub transfer_id: u64,
    pub sequence: u32,
    pub total_chunks: u32,
    pub data: Vec<u8>,
    pub is_last: bool,
}

/// Encode a chunk: `{u64 transfer id, u32 sequence, u32 total, u8 is-last,
/// 3 padding bytes}` followed by the chunk bytes.
pub fn encode_chunk(chunk: &Chunk) -> Vec<u8> {
    let mut out = Vec::with_capacity(CHUNK_HEADER_LEN + chunk.data.len());
    out.extend_from_slice(&chunk.transfer_id.to_le_bytes());
    out.extend_from_slice(&chunk.sequence.to_le_bytes());
    out.extend_from_slice(&chunk.total_chunks.to_le_bytes());
    out.push(u8::from(chunk.is_last));
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&chunk.data);
    out
}

pub fn decode_chunk(bytes: &[u8]) -> Result<Chunk, WireError> {
    if bytes.len() < CHUNK_HEADER_LEN {
        return Err(WireError::MalformedPayload("data chunk"));
    }
    Ok(Chunk {
        transfer_id: read_u64(&bytes[0..8]),
        sequence: read_u32(&bytes[8..12]),
        total_chunks: read_u32(&bytes[12..16]),
        is_last: bytes[16] != 0,
        // bytes 17..20 are padding
        data: bytes[CHUNK_HEADER_LEN..].to_vec(),
    })
}

// ── Transfer pre-announcement ───────────────────────────────────────────

/// A transfer offer: lets the receiver create its incoming record (and
/// learn the data type) before the first chunk lands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferOffer {
    pub transfer_id: u64,
    pub total_size: u64,
    pub data_type: String,
}

pub fn encode_transfer_request(offer: &TransferOffer) -> Vec<u8> {
    let name = offer.data_type.as_bytes();
    let mut out = Vec::with_capacity(18 + name.len());
    out.extend_from_slice(&offer.transfer_id.to_le_bytes());
    out.extend_from_slice(&offer.total_size.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(name);
    out
}

pub fn decode_transfer_request(bytes: &[u8]) -> Result<TransferOffer, WireError> {
    if bytes.len() < 18 {
        return Err(WireError::MalformedPayload("transfer request"));
    }
    let transfer_id = read_u64(&bytes[0..8]);
    let total_size = read_u64(&bytes[8..16]);
    let name_len = u16::from_le_bytes([bytes[16], bytes[17]]) as usize;
    if bytes.len() < 18 + name_len {
        return Err(WireError::MalformedPayload("transfer request"));
    }
    let data_type = std::str::from_utf8(&bytes[18..18 + name_len])
        .map_err(|_| WireError::MalformedPayload("transfer request"))?
        .to_string();
    Ok(TransferOffer {
        transfer_id,
        total_size,
        data_type,
    })
}

pub fn encode_transfer_response(transfer_id: u64, accepted: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.extend_from_slice(&transfer_id.to_le_bytes());
    out.push(u8::from(accepted));
    out
}

pub fn decode_transfer_response(bytes: &[u8]) -> Result<(u64, bool), WireError> {
    if bytes.len() < 9 {
        return Err(WireError::MalformedPayload("transfer response"));
    }
    Ok((read_u64(&bytes[0..8]), bytes[8] != 0))
}
