//! The ad-hoc UTF-16 string-list payload codec.
//!
//! Most client calls carry their arguments as a short list of UTF-16
//! strings: each entry is a 32-bit little-endian *character* count (not a
//! byte count) followed by that many UTF-16LE code units. A malformed list
//! decodes to whatever was successfully parsed before the defect; it never
//! faults the caller. At most eight entries are decoded — longer lists do
//! not occur in real traffic and a huge declared count is always garbage.
//!
//! A handful of client calls use a different string convention entirely and
//! embed a UTF-16 JSON document in the data blob; [`extract_utf16_json`]
//! recovers it when the structured decode yields nothing.

use crate::codec::envelope::ByteReader;

/// Upper bound on decoded list entries.
const MAX_ENTRIES: usize = 8;

/// Decodes a UTF-16 string list, stopping (not erroring) on a negative
/// length, a length that overruns the buffer, or after [`MAX_ENTRIES`].
pub fn decode_utf16_string_list(data: &[u8]) -> Vec<String> {
    let mut reader = ByteReader::new(data);
    let mut out = Vec::new();
    while out.len() < MAX_ENTRIES {
        let char_count = match reader.read_i32() {
            Some(count) => count,
            None => break,
        };
        if char_count < 0 {
            break;
        }
        let byte_len = match (char_count as usize).checked_mul(2) {
            Some(len) if len <= reader.remaining() => len,
            _ => break,
        };
        let units: Vec<u16> = match reader.read_bytes(byte_len) {
            Some(bytes) => bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect(),
            None => break,
        };
        out.push(String::from_utf16_lossy(&units));
    }
    out
}

/// Encodes strings as a UTF-16 string list; the inverse of
/// [`decode_utf16_string_list`].
pub fn encode_utf16_string_list<S: AsRef<str>>(strings: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for s in strings {
        let units: Vec<u16> = s.as_ref().encode_utf16().collect();
        out.extend_from_slice(&(units.len() as i32).to_le_bytes());
        for unit in units {
            out.extend_from_slice(&unit.to_le_bytes());
        }
    }
    out
}

/// Fallback extractor for payloads that embed a raw UTF-16LE JSON document
/// instead of a string list: scans for a UTF-16 `{` and returns the longest
/// substring up to the last `}`. Returns `None` when no such span exists.
pub fn extract_utf16_json(data: &[u8]) -> Option<String> {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let text = String::from_utf16_lossy(&units);
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_three_strings() {
        let encoded = encode_utf16_string_list(&["alpha", "", "päyload"]);
        assert_eq!(decode_utf16_string_list(&encoded), vec!["alpha", "", "päyload"]);
    }

    #[test]
    fn overlong_claimed_length_yields_partial_list() {
        let mut encoded = encode_utf16_string_list(&["ok"]);
        // Claim 1000 characters with only a few bytes behind it.
        encoded.extend_from_slice(&1000i32.to_le_bytes());
        encoded.extend_from_slice(&[0x41, 0x00]);
        assert_eq!(decode_utf16_string_list(&encoded), vec!["ok"]);
    }

    #[test]
    fn negative_length_stops_decoding() {
        let mut encoded = encode_utf16_string_list(&["first"]);
        encoded.extend_from_slice(&(-1i32).to_le_bytes());
        encoded.extend_from_slice(&encode_utf16_string_list(&["unreachable"]));
        assert_eq!(decode_utf16_string_list(&encoded), vec!["first"]);
    }

    #[test]
    fn entry_count_is_capped() {
        let strings: Vec<String> = (0..12).map(|i| format!("s{i}")).collect();
        let encoded = encode_utf16_string_list(&strings);
        assert_eq!(decode_utf16_string_list(&encoded).len(), 8);
    }

    #[test]
    fn garbage_decodes_to_empty_list() {
        assert!(decode_utf16_string_list(&[0xFF, 0xFF, 0xFF]).is_empty());
        assert!(decode_utf16_string_list(&[]).is_empty());
    }

    #[test]
    fn utf16_json_fallback_finds_balanced_span() {
        let mut data = vec![0xAB, 0xCD]; // binary noise before the document
        for unit in "xx{\"Map\":\"m01\"}yy".encode_utf16() {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        let json = extract_utf16_json(&data).expect("json span");
        assert!(json.starts_with('{') && json.ends_with('}'));
        assert!(json.contains("\"Map\""));
    }

    #[test]
    fn utf16_json_fallback_rejects_braceless_input() {
        let data: Vec<u8> = "no braces here"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        assert!(extract_utf16_json(&data).is_none());
        assert!(extract_utf16_json(b"}{").is_none());
    }
}
