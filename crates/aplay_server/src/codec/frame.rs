//! Frame codec: null-terminated, base64-encoded application frames.
//!
//! Wire format (both directions):
//! ```text
//! ┌──────────────────────────────┬──────┐
//! │ base64(payload) as ASCII     │ 0x00 │
//! └──────────────────────────────┴──────┘
//! ```
//!
//! Frames are processed strictly in arrival order. Bytes for a partial frame
//! are buffered until the terminating zero byte arrives; the buffer is only
//! bounded by peer behavior.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Accumulation buffer splitting a raw byte stream into frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly received bytes to the accumulation buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Extracts the next complete frame's decoded payload, consuming it and
    /// its terminator from the buffer. Returns `None` when no zero byte has
    /// arrived yet ("need more data"). A frame whose ASCII text is not valid
    /// base64 is consumed and dropped, yielding an empty payload.
    pub fn extract_frame(&mut self) -> Option<Vec<u8>> {
        let zero = self.buf.iter().position(|&b| b == 0)?;
        let text: Vec<u8> = self.buf.drain(..=zero).take(zero).collect();
        Some(BASE64.decode(&text).unwrap_or_default())
    }
}

/// Encodes a payload into its on-wire form: base64 text plus terminator.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut wire = BASE64.encode(payload).into_bytes();
    wire.push(0);
    wire
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_any_payload() {
        let payload = [0u8, 1, 2, 255, 128, 0, 42];
        let wire = encode_frame(&payload);
        assert_eq!(*wire.last().expect("terminator"), 0);

        let mut buffer = FrameBuffer::new();
        buffer.extend(&wire);
        assert_eq!(buffer.extract_frame().expect("frame"), payload);
        assert!(buffer.is_empty());
    }

    #[test]
    fn needs_more_data_without_terminator() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(b"QUJD");
        assert!(buffer.extract_frame().is_none());
        assert_eq!(buffer.len(), 4);

        buffer.extend(&[0]);
        assert_eq!(buffer.extract_frame().expect("frame"), b"ABC");
    }

    #[test]
    fn yields_concatenated_frames_in_order() {
        let frames: Vec<Vec<u8>> = (0u8..5).map(|i| vec![i; (i as usize) + 1]).collect();
        let mut wire = Vec::new();
        for frame in &frames {
            wire.extend_from_slice(&encode_frame(frame));
        }

        // Feed the stream one byte at a time to exercise split reads.
        let mut buffer = FrameBuffer::new();
        let mut decoded = Vec::new();
        for byte in wire {
            buffer.extend(&[byte]);
            while let Some(frame) = buffer.extract_frame() {
                decoded.push(frame);
            }
        }
        assert_eq!(decoded, frames);
    }

    #[test]
    fn invalid_base64_is_consumed_and_dropped() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(b"!!!not-base64!!!\0");
        buffer.extend(&encode_frame(b"ok"));
        assert_eq!(buffer.extract_frame().expect("bad frame"), Vec::<u8>::new());
        assert_eq!(buffer.extract_frame().expect("good frame"), b"ok");
    }

    #[test]
    fn empty_frame_decodes_to_empty_payload() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&[0]);
        assert_eq!(buffer.extract_frame().expect("frame"), Vec::<u8>::new());
    }
}
