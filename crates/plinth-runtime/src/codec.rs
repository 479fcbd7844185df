//! Wire codec between the broker and action programs.
//!
//! Every message is a single self-delimiting frame:
//!
//! ```text
//! +-------+---------+------+-------------+-------------+-------------------+
//! | magic | version | kind | length (BE) | JSON bytes  | SHA-256 of header |
//! | PLNB  |   u8    |  u8  |     u32     |  `length`   |   and payload     |
//! +-------+---------+------+-------------+-------------+-------------------+
//!   4         1        1         4          <= 1 MiB          32
//! ```
//!
//! Requests flow to the program on stdin; a program may answer with one
//! response frame on stdout. Decoding is all-or-nothing: any structural
//! problem, checksum mismatch or schema violation is a [`CodecError`].

use plinth_core::ActionRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

/// Frame magic.
pub const MAGIC: [u8; 4] = *b"PLNB";

/// Current format version.
pub const FORMAT_VERSION: u8 = 1;

/// Largest payload accepted in either direction.
pub const MAX_PAYLOAD_LEN: usize = 1024 * 1024;

const HEADER_LEN: usize = 10;
const CHECKSUM_LEN: usize = 32;

/// Frame kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Request = 1,
    Response = 2,
}

impl FrameKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(FrameKind::Request),
            2 => Some(FrameKind::Response),
            _ => None,
        }
    }
}

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("bad frame magic")]
    BadMagic,

    #[error("unsupported frame format version {0}")]
    UnsupportedVersion(u8),

    #[error("unexpected frame kind {found} (expected {expected:?})")]
    UnexpectedKind { expected: FrameKind, found: u8 },

    #[error("payload of {length} bytes exceeds the {max} byte limit")]
    Oversized { length: usize, max: usize },

    #[error("frame checksum mismatch")]
    ChecksumMismatch,

    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct RequestPayloadRef<'a> {
    action: &'a str,
    arguments: &'a BTreeMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RequestPayload {
    action: String,
    arguments: BTreeMap<String, Value>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResponsePayload {
    payload: Value,
}

/// Encode a request frame.
pub fn encode_request(request: &ActionRequest) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(&RequestPayloadRef {
        action: &request.name,
        arguments: &request.arguments,
    })?;
    encode_frame(FrameKind::Request, &body)
}

/// Decode a request frame (the action program's side of the protocol).
pub fn decode_request(bytes: &[u8]) -> Result<ActionRequest, CodecError> {
    let body = decode_frame(FrameKind::Request, bytes)?;
    let payload: RequestPayload = serde_json::from_slice(body)?;
    Ok(ActionRequest::new(payload.action, payload.arguments))
}

/// Encode a response frame (the action program's side of the protocol).
pub fn encode_response(payload: &Value) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(&ResponsePayload {
        payload: payload.clone(),
    })?;
    encode_frame(FrameKind::Response, &body)
}

/// Decode a response frame.
pub fn decode_response(bytes: &[u8]) -> Result<Value, CodecError> {
    let body = decode_frame(FrameKind::Response, bytes)?;
    let response: ResponsePayload = serde_json::from_slice(body)?;
    Ok(response.payload)
}

/// Whether `bytes` claims to be a frame (starts with the magic).
pub fn looks_like_frame(bytes: &[u8]) -> bool {
    bytes.starts_with(&MAGIC)
}

fn encode_frame(kind: FrameKind, body: &[u8]) -> Result<Vec<u8>, CodecError> {
    if body.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::Oversized {
            length: body.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len() + CHECKSUM_LEN);
    frame.extend_from_slice(&MAGIC);
    frame.push(FORMAT_VERSION);
    frame.push(kind as u8);
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body);
    let checksum = Sha256::digest(&frame);
    frame.extend_from_slice(&checksum);
    Ok(frame)
}

fn decode_frame(expected: FrameKind, bytes: &[u8]) -> Result<&[u8], CodecError> {
    if bytes.len() < MAGIC.len() {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN,
            available: bytes.len(),
        });
    }
    if bytes[..MAGIC.len()] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN,
            available: bytes.len(),
        });
    }

    let version = bytes[4];
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let kind = bytes[5];
    if FrameKind::from_byte(kind) != Some(expected) {
        return Err(CodecError::UnexpectedKind {
            expected,
            found: kind,
        });
    }

    let length = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    if length > MAX_PAYLOAD_LEN {
        return Err(CodecError::Oversized {
            length,
            max: MAX_PAYLOAD_LEN,
        });
    }

    let total = HEADER_LEN + length + CHECKSUM_LEN;
    if bytes.len() < total {
        return Err(CodecError::Truncated {
            needed: total,
            available: bytes.len(),
        });
    }
    if bytes.len() > total {
        return Err(CodecError::TrailingBytes(bytes.len() - total));
    }

    let (signed, checksum) = bytes.split_at(HEADER_LEN + length);
    if Sha256::digest(signed).as_slice() != checksum {
        return Err(CodecError::ChecksumMismatch);
    }

    Ok(&signed[HEADER_LEN..])
}
