//! Ad-hoc JSON extractors for loosely-structured payloads.
//!
//! The client's serializer produces type-hinted, loosely-structured JSON,
//! sometimes with binary garbage appended after the document. These scanners
//! pull individual fields out of such text without a full parser, and they
//! stay tolerant where a strict parser would reject: unknown escapes, bare
//! tokens, trailing noise. Do not replace them with a schema-driven parser
//! without re-validating against captured traffic.

/// Returns the index of the `}` matching the `{` at `open`, skipping over
/// quoted string contents (honoring backslash escapes). `None` when `open`
/// does not point at `{` or the input is unbalanced.
pub fn find_matching_brace(text: &str, open: usize) -> Option<usize> {
    find_matching(text, open, b'{', b'}')
}

/// Bracket counterpart of [`find_matching_brace`].
pub fn find_matching_bracket(text: &str, open: usize) -> Option<usize> {
    find_matching(text, open, b'[', b']')
}

fn find_matching(text: &str, open: usize, opener: u8, closer: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&opener) {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == opener => depth += 1,
            _ if b == closer => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extracts the value of the first occurrence of `"key"` as a string:
/// either the contents of a quoted value or a bare token terminated by
/// `,`, `}`, `]` or whitespace. Keys nested at different depths are not
/// distinguished; callers pass scoped substrings when that matters.
pub fn extract_scalar(json: &str, key: &str) -> Option<String> {
    let needle = format!("\"{key}\"");
    let key_at = json.find(&needle)?;
    let after_key = &json[key_at + needle.len()..];
    let colon = after_key.find(':')?;
    let value = after_key[colon + 1..].trim_start();

    if let Some(rest) = value.strip_prefix('"') {
        // Quoted value: scan to the closing quote, honoring escapes.
        let mut out = String::new();
        let mut escaped = false;
        for c in rest.chars() {
            if escaped {
                out.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                return Some(out);
            } else {
                out.push(c);
            }
        }
        None
    } else {
        let end = value
            .find(|c: char| c == ',' || c == '}' || c == ']' || c.is_whitespace())
            .unwrap_or(value.len());
        let token = &value[..end];
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }
}

/// Convenience wrapper parsing a numeric scalar; `None` when the key is
/// absent or the token is not a number.
pub fn extract_i64(json: &str, key: &str) -> Option<i64> {
    extract_scalar(json, key)?.trim().parse().ok()
}

/// Slices the array value of `key` (including its brackets).
pub fn extract_array<'a>(json: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("\"{key}\"");
    let key_at = json.find(&needle)?;
    let after_key = &json[key_at + needle.len()..];
    let colon = after_key.find(':')?;
    let rest = &after_key[colon + 1..];
    let offset = rest.find('[')?;
    let base = json.len() - rest.len() + offset;
    let end = find_matching_bracket(json, base)?;
    Some(&json[base..=end])
}

/// Iterates the top-level `{...}` objects inside an array slice.
pub fn objects_in_array(array: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut at = 0;
    while let Some(rel) = array[at..].find('{') {
        let open = at + rel;
        match find_matching_brace(array, open) {
            Some(close) => {
                out.push(&array[open..=close]);
                at = close + 1;
            }
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brace_matcher_skips_quoted_braces() {
        let json = r#"{"a":"b{c}","d":1}"#;
        assert_eq!(find_matching_brace(json, 0), Some(json.len() - 1));
    }

    #[test]
    fn brace_matcher_honors_escapes() {
        let json = r#"{"a":"quote \" and }","b":2}"#;
        assert_eq!(find_matching_brace(json, 0), Some(json.len() - 1));
    }

    #[test]
    fn unbalanced_input_is_not_found() {
        assert!(find_matching_brace(r#"{"a":1"#, 0).is_none());
        assert!(find_matching_brace("no brace", 0).is_none());
        assert!(find_matching_bracket("[1,2", 0).is_none());
    }

    #[test]
    fn bracket_matcher_handles_nesting() {
        let json = r#"[[1,2],["x]"],3]"#;
        assert_eq!(find_matching_bracket(json, 0), Some(json.len() - 1));
        assert_eq!(find_matching_bracket(json, 1), Some(6));
    }

    #[test]
    fn extracts_quoted_and_bare_scalars() {
        let json = r#"{"Mission":"m01_intro","Delta":-3,"Flag":true}"#;
        assert_eq!(extract_scalar(json, "Mission").as_deref(), Some("m01_intro"));
        assert_eq!(extract_scalar(json, "Delta").as_deref(), Some("-3"));
        assert_eq!(extract_scalar(json, "Flag").as_deref(), Some("true"));
        assert!(extract_scalar(json, "Absent").is_none());
        assert_eq!(extract_i64(json, "Delta"), Some(-3));
        assert!(extract_i64(json, "Mission").is_none());
    }

    #[test]
    fn extracts_escaped_string_values() {
        let json = r#"{"Name":"a \"quoted\" name"}"#;
        assert_eq!(extract_scalar(json, "Name").as_deref(), Some("a \"quoted\" name"));
    }

    #[test]
    fn tolerates_trailing_binary_noise() {
        let json = "{\"Map\":\"m02\"}\u{fffd}\u{0003}garbage";
        assert_eq!(extract_scalar(json, "Map").as_deref(), Some("m02"));
    }

    #[test]
    fn array_extraction_and_object_iteration() {
        let json = r#"{"Changes":[{"Item":"a","Delta":1},{"Item":"b","Delta":-2}],"Tail":0}"#;
        let array = extract_array(json, "Changes").expect("array");
        let objects = objects_in_array(array);
        assert_eq!(objects.len(), 2);
        assert_eq!(extract_scalar(objects[1], "Item").as_deref(), Some("b"));
        assert_eq!(extract_i64(objects[1], "Delta"), Some(-2));
        assert!(extract_array(json, "Missing").is_none());
    }
}
