//! Byte framing for the terminal TCP link.
//!
//! One frame on the wire is `STX LF <ascii JSON> LF ETX LF`. Real terminals
//! are sloppy about the fillers, so the decoder tolerates any number of
//! stray LF/CR bytes inside the frame and any garbage between frames.

use serde_json::Value;
use thiserror::Error;

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const LF: u8 = 0x0A;
const CR: u8 = 0x0D;
const NUL: u8 = 0x00;

/// A frame whose delimiters were found but whose payload is not valid JSON.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid frame payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Serialize a JSON value with all non-ASCII characters escaped, so the
/// framed payload is pure ASCII.
fn to_ascii_json(envelope: &Value) -> String {
    let json = envelope.to_string();
    if json.is_ascii() {
        return json;
    }
    let mut out = String::with_capacity(json.len());
    for ch in json.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

/// Encode an envelope into a single wire frame.
pub fn encode_frame(envelope: &Value) -> Vec<u8> {
    let json = to_ascii_json(envelope);
    let mut frame = Vec::with_capacity(json.len() + 6);
    frame.push(STX);
    frame.push(LF);
    frame.extend_from_slice(json.as_bytes());
    frame.push(LF);
    frame.push(ETX);
    frame.push(LF);
    frame
}

/// Streaming frame decoder.
///
/// Feed raw socket bytes with [`FrameDecoder::extend`] and drain complete
/// frames with [`FrameDecoder::next_frame`]. Bytes before the first STX are
/// discarded; an STX without a following ETX is retained until more bytes
/// arrive. A malformed payload is reported once and the decoder resumes at
/// the byte after the offending ETX.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes received from the socket.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if any.
    pub fn next_frame(&mut self) -> Option<Result<Value, FrameError>> {
        let stx = self.buf.iter().position(|&b| b == STX)?;
        if stx > 0 {
            self.buf.drain(..stx);
        }
        // ETX must come after the STX now at index 0
        let etx = self.buf[1..].iter().position(|&b| b == ETX)? + 1;

        // Scrub framing bytes a sloppy terminal may have embedded
        let payload: Vec<u8> = self.buf[1..etx]
            .iter()
            .copied()
            .filter(|&b| !matches!(b, STX | ETX | LF | CR | NUL))
            .collect();
        self.buf.drain(..=etx);

        Some(serde_json::from_slice(&payload).map_err(FrameError::from))
    }

    /// Bytes currently buffered (retained partial frame).
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all(bytes: &[u8]) -> Vec<Result<Value, FrameError>> {
        let mut dec = FrameDecoder::new();
        dec.extend(bytes);
        let mut out = Vec::new();
        while let Some(frame) = dec.next_frame() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn test_encode_frame_layout() {
        let frame = encode_frame(&json!({"message": "ACK"}));
        assert_eq!(frame[0], STX);
        assert_eq!(frame[1], LF);
        assert_eq!(frame[frame.len() - 3], LF);
        assert_eq!(frame[frame.len() - 2], ETX);
        assert_eq!(frame[frame.len() - 1], LF);
    }

    #[test]
    fn test_round_trip() {
        let envelope = json!({
            "message": "MSG",
            "data": {"command": "Sale", "EcrId": "1", "requestId": "000042"}
        });
        let frames = decode_all(&encode_frame(&envelope));
        assert_eq!(frames.len(), 1);
        assert_eq!(*frames[0].as_ref().unwrap(), envelope);
    }

    #[test]
    fn test_leading_garbage_discarded() {
        let mut bytes = b"\r\nnoise".to_vec();
        bytes.extend_from_slice(&encode_frame(&json!({"message": "ACK"})));
        let frames = decode_all(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap()["message"], "ACK");
    }

    #[test]
    fn test_partial_frame_retained_across_feeds() {
        let frame = encode_frame(&json!({"message": "MSG", "data": {"response": "Ping"}}));
        let mut dec = FrameDecoder::new();
        dec.extend(&frame[..frame.len() / 2]);
        assert!(dec.next_frame().is_none());
        assert!(dec.pending_len() > 0);
        dec.extend(&frame[frame.len() / 2..]);
        let decoded = dec.next_frame().unwrap().unwrap();
        assert_eq!(decoded["data"]["response"], "Ping");
    }

    #[test]
    fn test_embedded_fillers_scrubbed() {
        // Terminal embeds stray LF/CR inside the payload
        let mut bytes = vec![STX, LF];
        bytes.extend_from_slice(b"{\"message\":\n\r \"ACK\"}");
        bytes.extend_from_slice(&[LF, ETX, LF]);
        let frames = decode_all(&bytes);
        assert_eq!(frames[0].as_ref().unwrap()["message"], "ACK");
    }

    #[test]
    fn test_malformed_payload_resynchronizes() {
        let mut bytes = vec![STX, LF];
        bytes.extend_from_slice(b"{not json");
        bytes.extend_from_slice(&[LF, ETX, LF]);
        bytes.extend_from_slice(&encode_frame(&json!({"message": "ACK"})));

        let frames = decode_all(&bytes);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_err());
        assert_eq!(frames[1].as_ref().unwrap()["message"], "ACK");
    }

    #[test]
    fn test_two_frames_one_feed() {
        let mut bytes = encode_frame(&json!({"message": "ACK"}));
        bytes.extend_from_slice(&encode_frame(&json!({"message": "MSG"})));
        let frames = decode_all(&bytes);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref().unwrap()["message"], "ACK");
        assert_eq!(frames[1].as_ref().unwrap()["message"], "MSG");
    }

    #[test]
    fn test_non_ascii_payload_escaped() {
        let frame = encode_frame(&json!({"message": "MSG", "data": {"text": "café"}}));
        assert!(frame.is_ascii());
        let frames = decode_all(&frame);
        assert_eq!(frames[0].as_ref().unwrap()["data"]["text"], "café");
    }
}
