//! RFC 6455 handshake and minimal text-frame (de)framing used to tunnel the
//! JSON dialect over a WebSocket connection after the HTTP upgrade. No
//! tungstenite dependency — the server only ever needs to move complete JSON
//! text frames in one direction and out the other, never fragmentation,
//! pings, or binary frames, so a tiny hand-rolled codec matches the rest of
//! this workspace's "no crate for a one-shot wire format" practice.

use std::io::{self, Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` header value for a client's
/// `Sec-WebSocket-Key`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

const OPCODE_TEXT: u8 = 0x1;
const OPCODE_CLOSE: u8 = 0x8;

/// Reads one client-to-server frame. Returns `Ok(None)` on a clean close
/// frame or EOF.
pub fn read_text_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; 2];
    if reader.read_exact(&mut header).is_err() {
        return Ok(None);
    }
    let opcode = header[0] & 0x0f;
    let masked = header[1] & 0x80 != 0;
    let mut len = (header[1] & 0x7f) as u64;
    if len == 126 {
        let mut ext = [0u8; 2];
        reader.read_exact(&mut ext)?;
        len = u16::from_be_bytes(ext) as u64;
    } else if len == 127 {
        let mut ext = [0u8; 8];
        reader.read_exact(&mut ext)?;
        len = u64::from_be_bytes(ext);
    }
    let mask = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key)?;
        Some(key)
    } else {
        None
    };
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    if let Some(key) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }
    if opcode == OPCODE_CLOSE {
        return Ok(None);
    }
    if opcode != OPCODE_TEXT {
        // Unsupported opcode (binary/ping/pong) — ignore the frame and let
        // the caller read the next one rather than tearing down the
        // connection over it.
        return read_text_frame(reader);
    }
    Ok(Some(payload))
}

/// Writes one unmasked server-to-client text frame (servers never mask per
/// RFC 6455 §5.1).
pub fn write_text_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let mut header = vec![0x80 | OPCODE_TEXT];
    let len = payload.len();
    if len < 126 {
        header.push(len as u8);
    } else if len <= u16::MAX as usize {
        header.push(126);
        header.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        header.push(127);
        header.extend_from_slice(&(len as u64).to_be_bytes());
    }
    writer.write_all(&header)?;
    writer.write_all(payload)
}
