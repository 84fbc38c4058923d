//! Pagination cursors.
//!
//! A cursor is base64-encoded JSON `{"offset": n, "timestamp": ms}`.
//! The timestamp is informational (when the cursor was minted); only
//! the offset drives continuation. Decoding failures are not errors:
//! callers degrade to offset 0 and return the first page.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

#[derive(Debug, Serialize, Deserialize)]
struct CursorToken {
    offset: usize,
    timestamp: i64,
}

/// Encodes an offset into an opaque cursor token.
pub fn encode_cursor(offset: usize) -> String {
    let token = CursorToken {
        offset,
        timestamp: Timestamp::now().as_millis(),
    };
    // Serializing a two-field struct cannot fail
    let json = serde_json::to_string(&token).expect("cursor serialization");
    STANDARD.encode(json)
}

/// Decodes a cursor token back to its offset.
///
/// Returns `None` for malformed tokens; callers treat that as offset 0.
pub fn decode_cursor(cursor: &str) -> Option<usize> {
    let bytes = STANDARD.decode(cursor).ok()?;
    let json = String::from_utf8(bytes).ok()?;
    let token: CursorToken = serde_json::from_str(&json).ok()?;
    Some(token.offset)
}
