//! Session token to instance address codec.
//!
//! A session token is a UUID-shaped 128-bit value. Its first eight bytes, read big-endian,
//! are the numeric address of the backend instance that owns the session.
use uuid::Uuid;

/// Render a numeric overlay instance address as a hostname label.
///
/// Addresses are sixteen lowercase hex digits, so every `u64` maps to exactly one valid
/// label.
pub fn encode_address(id: u64) -> String {
    format!("{id:016x}")
}

/// Extract the instance id carried by a session token.
pub fn session_instance(token: &str) -> Option<u64> {
    let uuid = Uuid::parse_str(token.trim()).ok()?;
    let bytes = uuid.as_bytes();
    let mut head = [0u8; 8];
    head.copy_from_slice(&bytes[..8]);
    Some(u64::from_be_bytes(head))
}

/// Decode a session token into the hostname of the instance it is pinned to.
///
/// Returns `None` for anything that is not a well-formed 128-bit identifier; callers treat
/// that as "no affinity" and keep their normal routing.
pub fn decode_session_host(token: &str) -> Option<String> {
    session_instance(token).map(encode_address)
}
