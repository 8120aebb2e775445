//! Wire codecs: frame splitting, nested envelopes, and string payloads.

pub mod envelope;
pub mod frame;
pub mod strings;
