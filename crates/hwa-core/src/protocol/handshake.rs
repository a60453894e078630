//! WebSocket opening handshake (RFC 6455 §4.2).
//!
//! The client sends an HTTP/1.1 `Upgrade` request carrying a random
//! `Sec-WebSocket-Key`.  The server proves it understood the request by
//! answering with `Sec-WebSocket-Accept` = base64(SHA-1(key + GUID)).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Fixed GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Name of the request header carrying the client key.
pub const KEY_HEADER: &str = "Sec-WebSocket-Key";

/// Errors that prevent a handshake from completing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// The request has no (or an empty) `Sec-WebSocket-Key` header.
    #[error("request has no Sec-WebSocket-Key header")]
    MissingKey,
}

/// Derives the `Sec-WebSocket-Accept` value for `client_key`.
///
/// # Examples
///
/// ```rust
/// use hwa_core::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Extracts the client key from a raw HTTP upgrade request and returns the
/// matching accept key.
///
/// The header name is matched case-insensitively; the value runs to the end
/// of its line and is trimmed of surrounding whitespace.
///
/// # Errors
///
/// Returns [`HandshakeError::MissingKey`] if no non-empty key header exists.
pub fn handle_handshake(request: &str) -> Result<String, HandshakeError> {
    let key = client_key(request).ok_or(HandshakeError::MissingKey)?;
    Ok(compute_accept_key(key))
}

/// Builds the `101 Switching Protocols` response for `accept_key`.
pub fn build_handshake_response(accept_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept_key}\r\n\r\n"
    )
}

/// Returns the offset just past the blank line that ends the request headers.
///
/// Bytes beyond this offset were pipelined by the client after the request
/// and already belong to the frame stream.
pub fn header_end(request: &[u8]) -> Option<usize> {
    request
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn client_key(request: &str) -> Option<&str> {
    request
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case(KEY_HEADER))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}
