//! Git packet-line framing for the smart HTTP advertisement preamble.
//!
//! Each packet line is prefixed with a 4-character lowercase hex length that
//! includes the prefix itself:
//!
//! - `0000` -- flush packet (end of section)
//! - `0004`+ -- data packet
//!
//! Only the short `# service=...` control line and its flush are produced by
//! this crate.  Pack negotiation payloads are already framed by `git` itself
//! and are passed through untouched.

/// Largest payload a single data packet may carry (`0xfff0` total minus the
/// 4-byte prefix).
pub const MAX_PAYLOAD_LEN: usize = 0xfff0 - 4;

/// Wire form of a flush packet.
pub const FLUSH: &[u8; 4] = b"0000";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("packet-line payload too large ({len} bytes, at most {MAX_PAYLOAD_LEN})")]
pub struct PayloadTooLarge {
    pub len: usize,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode `payload` as a packet line (4-hex-digit length prefix + data).
///
/// Callers include any trailing newline the protocol requires.
pub fn encode_line(payload: &[u8]) -> Result<Vec<u8>, PayloadTooLarge> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(PayloadTooLarge { len: payload.len() });
    }
    let total_len = payload.len() + 4;
    let mut buf = Vec::with_capacity(total_len);
    buf.extend_from_slice(format!("{total_len:04x}").as_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// The flush marker, `0000`.
pub fn encode_flush() -> &'static [u8] {
    FLUSH
}

/// The advertisement preamble for `service`: one `# service=<service>\n`
/// packet followed by a flush.
pub fn service_preamble(service: &str) -> Vec<u8> {
    let line = format!("# service={service}\n");
    // A service name never comes close to the payload limit.
    let mut buf = encode_line(line.as_bytes()).unwrap_or_default();
    buf.extend_from_slice(encode_flush());
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
