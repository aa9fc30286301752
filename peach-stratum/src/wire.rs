//! Hand-rolled line scanner for the three known Stratum message shapes.
//!
//! This deliberately does not pull in a general JSON parser: the wire
//! protocol only ever carries `mining.notify`, `mining.set_difficulty`, and
//! `{id, result, error}` responses, so field-location-by-key lookup with
//! tolerance for quoted/unquoted numerics is enough, matching the reference
//! client's own string/int field getters.

/// Find the value of a quoted string field, e.g. `"method":"mining.notify"`.
pub fn extract_string_field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let after_colon = field_value_start(line, key)?;
    let rest = after_colon.trim_start();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(&rest[..end])
}

/// Find the raw token after a key's colon, stopping at the first `,`, `}`
/// or `]` — tolerant of both `"id":5` and `"id":"5"`.
pub fn extract_raw_field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let after_colon = field_value_start(line, key)?;
    let rest = after_colon.trim_start();
    let end = rest
        .find(|c| c == ',' || c == '}' || c == ']')
        .unwrap_or(rest.len());
    let token = rest[..end].trim();
    Some(token.trim_matches('"'))
}

pub fn extract_bool_field(line: &str, key: &str) -> Option<bool> {
    extract_raw_field(line, key).map(|tok| tok == "true")
}

pub fn has_key(line: &str, key: &str) -> bool {
    let pat = format!("\"{}\"", key);
    line.contains(&pat)
}

pub fn extract_method(line: &str) -> Option<&str> {
    extract_string_field(line, "method")
}

fn field_value_start<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let pat = format!("\"{}\"", key);
    let key_pos = line.find(&pat)?;
    let after_key = &line[key_pos + pat.len()..];
    let colon = after_key.find(':')?;
    Some(&after_key[colon + 1..])
}

/// Upper bound on fields a known message shape ever carries
/// (`mining.notify`'s 7-element array is the longest); extras beyond this
/// are counted but not stored, matching the reference parser's tolerance
/// for trailing fields it doesn't look at.
pub const MAX_PARAMS: usize = 8;

/// Split the JSON array following `"params":` at its top level by commas,
/// writing up to `out.len()` borrowed fields (quotes stripped from string
/// elements) into `out` and returning the total field count seen. No
/// allocation: every field is a slice into `line`. Returns `Some(0)` (not
/// `None`) for `"params":[]`.
pub fn extract_params<'a>(line: &'a str, out: &mut [Option<&'a str>]) -> Option<usize> {
    let after_colon = field_value_start(line, "params")?;
    let rest = after_colon.trim_start();
    let rest = rest.strip_prefix('[')?;
    let end = find_matching_bracket(rest)?;
    let body = &rest[..end];

    for slot in out.iter_mut() {
        *slot = None;
    }

    let mut count = 0usize;
    let mut field_start = 0usize;
    let mut depth = 0i32;
    let mut in_string = false;

    for (i, c) in body.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '[' | '{' if !in_string => depth += 1,
            ']' | '}' if !in_string => depth -= 1,
            ',' if !in_string && depth == 0 => {
                if count < out.len() {
                    out[count] = Some(trim_param(&body[field_start..i]));
                }
                count += 1;
                field_start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    let tail = body[field_start..].trim();
    if !tail.is_empty() {
        if count < out.len() {
            out[count] = Some(trim_param(tail));
        }
        count += 1;
    }
    Some(count)
}

fn trim_param(s: &str) -> &str {
    s.trim().trim_matches('"')
}

fn find_matching_bracket(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '[' if !in_string => depth += 1,
            ']' if !in_string => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

/// Parse a numeric field the way `atoi`/`strtol` would: a leading `0x`/`0X`
/// switches to hex, otherwise decimal; anything unparsable yields 0 rather
/// than an error, matching the pool-side tolerance this client targets.
pub fn parse_numeric_field(s: &str) -> u64 {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).unwrap_or(0)
    } else {
        s.parse::<u64>().unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extracts_method() {
        let line = r#"{"id":null,"method":"mining.notify","params":[]}"#;
        assert_eq!(extract_method(line), Some("mining.notify"));
    }

    #[test]
    fn extracts_raw_id_unquoted_and_quoted() {
        assert_eq!(extract_raw_field(r#"{"id":5,"result":true}"#, "id"), Some("5"));
        assert_eq!(extract_raw_field(r#"{"id":"5","result":true}"#, "id"), Some("5"));
    }

    #[test]
    fn extracts_bool_result() {
        assert_eq!(extract_bool_field(r#"{"id":1,"result":true}"#, "result"), Some(true));
        assert_eq!(extract_bool_field(r#"{"id":1,"result":false}"#, "result"), Some(false));
    }

    #[test]
    fn splits_params_array() {
        let line = r#"{"method":"mining.notify","params":["j1","aa","0100000000000000","8","66ddee00","bb",true]}"#;
        let mut params = [None; MAX_PARAMS];
        let count = extract_params(line, &mut params).unwrap();
        assert_eq!(count, 7);
        assert_eq!(
            &params[..7],
            &[
                Some("j1"),
                Some("aa"),
                Some("0100000000000000"),
                Some("8"),
                Some("66ddee00"),
                Some("bb"),
                Some("true"),
            ]
        );
    }

    #[test]
    fn empty_params_array_yields_zero_count() {
        let line = r#"{"method":"mining.subscribe","params":[]}"#;
        let mut params = [None; MAX_PARAMS];
        assert_eq!(extract_params(line, &mut params), Some(0));
    }

    #[test]
    fn parses_hex_and_decimal_numerics() {
        assert_eq!(parse_numeric_field("0x8"), 8);
        assert_eq!(parse_numeric_field("8"), 8);
        assert_eq!(parse_numeric_field("not-a-number"), 0);
    }

    #[test]
    fn has_key_distinguishes_method_messages_from_responses() {
        assert!(has_key(r#"{"id":1,"result":true}"#, "id"));
        assert!(!has_key(r#"{"method":"mining.notify"}"#, "id"));
    }
}
