//! Core Envelope and Shared Field Event binary codecs.
//!
//! Two envelopes nest inside every frame:
//!
//! ```text
//! Core Envelope (outer)
//! ┌─────────┬────────────┬────────────┬─────────────┬───────────┐
//! │ tag: u8 │ server: u32│ raw_len:i32│ raw bytes   │ msg_no:u64│
//! └─────────┴────────────┴────────────┴─────────────┴───────────┘
//!
//! Shared Field Event (inner, carried in `raw`)
//! ┌─────────┬──────────────┬─────────────┬────────────┬──────────┐
//! │ kind:u8 │ entity: u64  │ field: u16  │ data_len:i32│ data     │
//! └─────────┴──────────────┴─────────────┴────────────┴──────────┘
//! ```
//!
//! All integers are little-endian. Decoders reject rather than panic: a
//! length field that disagrees with the remaining bytes drops the message,
//! never the connection.

/// Tag byte identifying a DirectSystem message.
pub const DIRECT_SYSTEM_TAG: u8 = 0x44;

/// Minimum Core Envelope size: tag + server id + raw length + msg no.
const CORE_ENVELOPE_MIN: usize = 1 + 4 + 4 + 8;

/// Fixed Shared Field Event header: kind + entity id + field id + data length.
const FIELD_EVENT_HEADER: usize = 1 + 8 + 2 + 4;

/// Decoded outer envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreEnvelope {
    pub server_id: u32,
    pub raw: Vec<u8>,
    pub msg_no: u64,
}

/// Decoded inner call descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFieldEvent {
    pub kind: u8,
    pub entity_id: u64,
    pub field_id: u16,
    pub data: Vec<u8>,
}

/// Bounds-checked little-endian reader over a byte slice.
///
/// Every accessor returns `None` instead of panicking when the declared
/// layout overruns the buffer, so one bad length aborts a single decode.
#[derive(Debug)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        Some(u16::from_le_bytes(self.take::<2>()?))
    }

    pub fn read_i32(&mut self) -> Option<i32> {
        Some(i32::from_le_bytes(self.take::<4>()?))
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take::<4>()?))
    }

    pub fn read_u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take::<8>()?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Some(slice)
    }

    /// Skips `len` bytes; `None` when fewer remain.
    pub fn skip(&mut self, len: usize) -> Option<()> {
        self.read_bytes(len).map(|_| ())
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let slice = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Some(out)
    }
}

/// Decodes a Core Envelope. Rejects on short input, tag mismatch, or a raw
/// length that does not leave exactly eight trailing bytes for the message
/// number.
pub fn decode_core_envelope(bytes: &[u8]) -> Option<CoreEnvelope> {
    if bytes.len() < CORE_ENVELOPE_MIN {
        return None;
    }
    let mut reader = ByteReader::new(bytes);
    if reader.read_u8()? != DIRECT_SYSTEM_TAG {
        return None;
    }
    let server_id = reader.read_u32()?;
    let raw_len = reader.read_i32()?;
    if raw_len < 0 {
        return None;
    }
    let raw_len = raw_len as usize;
    // The declared payload must account for everything but the msg number.
    if reader.remaining() != raw_len + 8 {
        return None;
    }
    let raw = reader.read_bytes(raw_len)?.to_vec();
    let msg_no = reader.read_u64()?;
    Some(CoreEnvelope { server_id, raw, msg_no })
}

/// Encodes a Core Envelope.
pub fn encode_core_envelope(server_id: u32, raw: &[u8], msg_no: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(CORE_ENVELOPE_MIN + raw.len());
    out.push(DIRECT_SYSTEM_TAG);
    out.extend_from_slice(&server_id.to_le_bytes());
    out.extend_from_slice(&(raw.len() as i32).to_le_bytes());
    out.extend_from_slice(raw);
    out.extend_from_slice(&msg_no.to_le_bytes());
    out
}

/// Decodes a Shared Field Event from an envelope's raw payload.
pub fn decode_shared_field_event(raw: &[u8]) -> Option<SharedFieldEvent> {
    if raw.len() < FIELD_EVENT_HEADER {
        return None;
    }
    let mut reader = ByteReader::new(raw);
    let kind = reader.read_u8()?;
    let entity_id = reader.read_u64()?;
    let field_id = reader.read_u16()?;
    let data_len = reader.read_i32()?;
    if data_len < 0 || reader.remaining() < data_len as usize {
        return None;
    }
    let data = reader.read_bytes(data_len as usize)?.to_vec();
    Some(SharedFieldEvent { kind, entity_id, field_id, data })
}

/// Encodes a Shared Field Event into raw payload bytes.
pub fn encode_shared_field_event(kind: u8, entity_id: u64, field_id: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FIELD_EVENT_HEADER + data.len());
    out.push(kind);
    out.extend_from_slice(&entity_id.to_le_bytes());
    out.extend_from_slice(&field_id.to_le_bytes());
    out.extend_from_slice(&(data.len() as i32).to_le_bytes());
    out.extend_from_slice(data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_envelope_round_trip() {
        let encoded = encode_core_envelope(7, b"payload", 0xDEAD_BEEF_0042);
        let decoded = decode_core_envelope(&encoded).expect("envelope");
        assert_eq!(decoded.server_id, 7);
        assert_eq!(decoded.raw, b"payload");
        assert_eq!(decoded.msg_no, 0xDEAD_BEEF_0042);
    }

    #[test]
    fn truncated_envelope_always_rejects() {
        let encoded = encode_core_envelope(1, b"raw bytes here", 99);
        for cut in 1..=encoded.len() {
            assert!(
                decode_core_envelope(&encoded[..encoded.len() - cut]).is_none(),
                "cut={cut} should reject"
            );
        }
    }

    #[test]
    fn tag_mismatch_rejects() {
        let mut encoded = encode_core_envelope(1, b"x", 1);
        encoded[0] = 0x45;
        assert!(decode_core_envelope(&encoded).is_none());
    }

    #[test]
    fn inflated_raw_length_rejects() {
        let mut encoded = encode_core_envelope(1, b"abcd", 1);
        // Claim one more raw byte than exists; msg_no bytes would be eaten.
        encoded[5..9].copy_from_slice(&5i32.to_le_bytes());
        assert!(decode_core_envelope(&encoded).is_none());
    }

    #[test]
    fn trailing_garbage_rejects() {
        let mut encoded = encode_core_envelope(1, b"abcd", 1);
        encoded.push(0xFF);
        assert!(decode_core_envelope(&encoded).is_none());
    }

    #[test]
    fn field_event_round_trip() {
        let raw = encode_shared_field_event(2, 0x1122_3344_5566, 513, &[9, 8, 7]);
        let event = decode_shared_field_event(&raw).expect("event");
        assert_eq!(event.kind, 2);
        assert_eq!(event.entity_id, 0x1122_3344_5566);
        assert_eq!(event.field_id, 513);
        assert_eq!(event.data, [9, 8, 7]);
    }

    #[test]
    fn field_event_overrun_rejects() {
        let mut raw = encode_shared_field_event(1, 1, 1, &[1, 2, 3]);
        raw.truncate(raw.len() - 1);
        assert!(decode_shared_field_event(&raw).is_none());
        assert!(decode_shared_field_event(&[1, 2, 3]).is_none());
    }

    #[test]
    fn byte_reader_is_bounds_checked() {
        let mut reader = ByteReader::new(&[1, 0]);
        assert_eq!(reader.read_u16(), Some(1));
        assert!(reader.read_u8().is_none());
        assert!(reader.read_u64().is_none());
        assert!(ByteReader::new(&[]).read_i32().is_none());
    }
}
