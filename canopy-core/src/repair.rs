//! JSON repair engine for malformed model output
//!
//! Extraction prompts ask the model for a bare JSON array of relation tuples,
//! but responses routinely arrive wrapped in Markdown fences, padded with
//! prose, quoted with single quotes, or missing a delimiter. The engine
//! applies a fixed sequence of salvage strategies, in order:
//!
//! 1. Strip ``` / ```json fence markers
//! 2. Isolate the first `[` .. last `]` span and collapse newlines
//! 3. Normalize single quotes to double quotes (best effort — this can
//!    corrupt content containing legitimate apostrophes)
//! 4. Strict parse, with two targeted fixups retried once each:
//!    a missing comma after an array close, and a missing property-name quote
//! 5. Permissive literal parse (single quotes, trailing commas,
//!    Python-style `True`/`False`/`None`) re-serialized to a strict value
//!
//! Only after all of these fail does `repair` give up.

use regex::Regex;
use serde_json::Value;

use crate::error::CanopyError;

/// How far back from a parse error the missing-comma scan looks.
const COMMA_SCAN_WINDOW: usize = 200;

/// Salvage a JSON array from raw model output.
///
/// The parsed value is guaranteed to be an array; any other top-level type
/// is rejected even when it parses cleanly.
pub fn repair(raw: &str) -> Result<Value, CanopyError> {
    let stripped = strip_code_fences(raw);
    let isolated = isolate_array(&stripped);
    // Step 3 is lossy by design: apostrophes inside labels become double
    // quotes and may break the parse, which the later strategies then
    // attempt to recover.
    let normalized = isolated.replace('\'', "\"");

    let err = match serde_json::from_str::<Value>(&normalized) {
        Ok(value) => return ensure_array(value, raw),
        Err(e) => e,
    };

    let position = error_offset(&normalized, &err);
    let message = err.to_string();
    tracing::warn!(
        position,
        error = %message,
        context = %near(&normalized, position),
        "Strict parse failed, attempting targeted fixups"
    );

    if message.contains("expected `,`") {
        if let Some(fixed) = insert_missing_comma(&normalized, position) {
            tracing::info!(position, "Inserted comma after preceding array close");
            if let Ok(value) = serde_json::from_str::<Value>(&fixed) {
                return ensure_array(value, raw);
            }
        }
    }

    if message.contains("key must be a string") {
        let fixed = insert_at(&normalized, position, '"');
        tracing::info!(position, "Inserted missing property-name quote");
        if let Ok(value) = serde_json::from_str::<Value>(&fixed) {
            return ensure_array(value, raw);
        }
    }

    tracing::warn!("Targeted fixups failed, falling back to permissive parse");
    match permissive::parse(&normalized) {
        Ok(value) => ensure_array(value, raw),
        Err((pos, detail)) => {
            tracing::error!(position = pos, error = %detail, "All repair strategies exhausted");
            Err(CanopyError::UnrecoverableFormat {
                position: pos,
                detail,
                raw: raw.to_string(),
            })
        }
    }
}

fn ensure_array(value: Value, raw: &str) -> Result<Value, CanopyError> {
    if value.is_array() {
        Ok(value)
    } else {
        Err(CanopyError::UnrecoverableFormat {
            position: 0,
            detail: format!("expected a JSON array, got {}", type_name(&value)),
            raw: raw.to_string(),
        })
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Remove Markdown code-fence markers and surrounding whitespace.
fn strip_code_fences(raw: &str) -> String {
    match Regex::new(r"```(?:json)?") {
        Ok(re) => re.replace_all(raw, "").trim().to_string(),
        Err(_) => raw.trim().to_string(),
    }
}

/// Cut the text down to the first `[` .. last `]` span, discarding any prose
/// the model added around the array, and collapse embedded newlines to
/// single spaces.
fn isolate_array(text: &str) -> String {
    let span = match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    };
    match Regex::new(r"\n\s*") {
        Ok(re) => re.replace_all(span, " ").trim().to_string(),
        Err(_) => span.trim().to_string(),
    }
}

/// Byte offset of a serde parse error (line/column are 1-based).
fn error_offset(text: &str, err: &serde_json::Error) -> usize {
    let line = err.line().max(1);
    let mut offset = 0;
    for (i, l) in text.split('\n').enumerate() {
        if i + 1 == line {
            return (offset + err.column().saturating_sub(1)).min(text.len());
        }
        offset += l.len() + 1;
    }
    text.len()
}

/// A short window of text around `position`, for log context.
fn near(text: &str, position: usize) -> String {
    let mut start = position.saturating_sub(20);
    let mut end = (position + 20).min(text.len());
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].to_string()
}

/// Scan backward from the error position tracking bracket nesting; at the
/// first `]` encountered at depth zero — the close of the preceding array
/// element — insert a comma immediately after it.
fn insert_missing_comma(text: &str, position: usize) -> Option<String> {
    let bytes = text.as_bytes();
    let stop = position.saturating_sub(COMMA_SCAN_WINDOW);
    let mut depth = 0i32;
    let mut i = position.min(bytes.len());
    while i > stop {
        i -= 1;
        match bytes[i] {
            b']' => {
                if depth == 0 {
                    let mut fixed = text.to_string();
                    fixed.insert(i + 1, ',');
                    return Some(fixed);
                }
                depth += 1;
            }
            b'[' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Insert `c` at the given byte offset, clamped to the nearest char boundary.
fn insert_at(text: &str, position: usize, c: char) -> String {
    let mut at = position.min(text.len());
    while at > 0 && !text.is_char_boundary(at) {
        at -= 1;
    }
    let mut fixed = text.to_string();
    fixed.insert(at, c);
    fixed
}

/// Last-resort literal parser. Accepts a superset of JSON: single-quoted
/// strings, unquoted object keys, trailing commas, parenthesized tuples, and
/// the Python spellings of `true`/`false`/`null`.
mod permissive {
    use serde_json::{Map, Number, Value};

    pub fn parse(text: &str) -> Result<Value, (usize, String)> {
        let mut p = Parser {
            chars: text.char_indices().collect(),
            pos: 0,
        };
        p.skip_ws();
        let value = p.value()?;
        p.skip_ws();
        if p.pos < p.chars.len() {
            return Err((p.byte_pos(), "trailing characters after value".to_string()));
        }
        Ok(value)
    }

    struct Parser {
        chars: Vec<(usize, char)>,
        pos: usize,
    }

    impl Parser {
        fn byte_pos(&self) -> usize {
            self.chars.get(self.pos).map(|(b, _)| *b).unwrap_or_else(|| {
                self.chars.last().map(|(b, c)| b + c.len_utf8()).unwrap_or(0)
            })
        }

        fn peek(&self) -> Option<char> {
            self.chars.get(self.pos).map(|(_, c)| *c)
        }

        fn bump(&mut self) -> Option<char> {
            let c = self.peek();
            if c.is_some() {
                self.pos += 1;
            }
            c
        }

        fn skip_ws(&mut self) {
            while matches!(self.peek(), Some(c) if c.is_whitespace()) {
                self.pos += 1;
            }
        }

        fn fail<T>(&self, msg: &str) -> Result<T, (usize, String)> {
            Err((self.byte_pos(), msg.to_string()))
        }

        fn value(&mut self) -> Result<Value, (usize, String)> {
            match self.peek() {
                Some('[') => self.sequence(']'),
                Some('(') => self.sequence(')'),
                Some('{') => self.object(),
                Some('"') | Some('\'') => self.string().map(Value::String),
                Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
                Some(c) if c.is_alphabetic() => self.word(),
                Some(c) => self.fail(&format!("unexpected character `{}`", c)),
                None => self.fail("unexpected end of input"),
            }
        }

        fn sequence(&mut self, close: char) -> Result<Value, (usize, String)> {
            self.bump();
            let mut items = Vec::new();
            loop {
                self.skip_ws();
                if self.peek() == Some(close) {
                    self.bump();
                    return Ok(Value::Array(items));
                }
                items.push(self.value()?);
                self.skip_ws();
                match self.peek() {
                    Some(',') => {
                        self.bump();
                    }
                    Some(c) if c == close => {}
                    _ => return self.fail(&format!("expected `,` or `{}`", close)),
                }
            }
        }

        fn object(&mut self) -> Result<Value, (usize, String)> {
            self.bump();
            let mut map = Map::new();
            loop {
                self.skip_ws();
                if self.peek() == Some('}') {
                    self.bump();
                    return Ok(Value::Object(map));
                }
                let key = match self.peek() {
                    Some('"') | Some('\'') => self.string()?,
                    Some(c) if c.is_alphabetic() || c == '_' => self.bare_key(),
                    _ => return self.fail("expected an object key"),
                };
                self.skip_ws();
                if self.peek() != Some(':') {
                    return self.fail("expected `:` after object key");
                }
                self.bump();
                self.skip_ws();
                let value = self.value()?;
                map.insert(key, value);
                self.skip_ws();
                match self.peek() {
                    Some(',') => {
                        self.bump();
                    }
                    Some('}') => {}
                    _ => return self.fail("expected `,` or `}`"),
                }
            }
        }

        fn bare_key(&mut self) -> String {
            let mut key = String::new();
            while let Some(c) = self.peek() {
                if !(c.is_alphanumeric() || c == '_') {
                    break;
                }
                key.push(c);
                self.pos += 1;
            }
            key
        }

        fn string(&mut self) -> Result<String, (usize, String)> {
            let quote = match self.bump() {
                Some(q) => q,
                None => return self.fail("expected a string"),
            };
            let mut out = String::new();
            loop {
                match self.bump() {
                    Some('\\') => match self.bump() {
                        Some('n') => out.push('\n'),
                        Some('t') => out.push('\t'),
                        Some('r') => out.push('\r'),
                        Some(c) => out.push(c),
                        None => return self.fail("unterminated escape"),
                    },
                    Some(c) if c == quote => return Ok(out),
                    Some(c) => out.push(c),
                    None => return self.fail("unterminated string"),
                }
            }
        }

        fn number(&mut self) -> Result<Value, (usize, String)> {
            let mut text = String::new();
            while let Some(c) = self.peek() {
                if !(c.is_ascii_digit() || "+-.eE".contains(c)) {
                    break;
                }
                text.push(c);
                self.pos += 1;
            }
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Value::Number(i.into()));
            }
            match text.parse::<f64>().ok().and_then(Number::from_f64) {
                Some(n) => Ok(Value::Number(n)),
                None => self.fail(&format!("invalid number `{}`", text)),
            }
        }

        fn word(&mut self) -> Result<Value, (usize, String)> {
            let word = self.bare_key();
            match word.as_str() {
                "true" | "True" => Ok(Value::Bool(true)),
                "false" | "False" => Ok(Value::Bool(false)),
                "null" | "None" => Ok(Value::Null),
                _ => self.fail(&format!("unexpected word `{}`", word)),
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_json_passes_through_unchanged() {
        let raw = r#"[["A", "contains", "B"], ["A", "contains", "C"]]"#;
        let value = repair(raw).expect("valid JSON must repair to itself");
        assert_eq!(value, json!([["A", "contains", "B"], ["A", "contains", "C"]]));
    }

    #[test]
    fn test_markdown_fences_are_stripped() {
        let raw = "```json\n[[\"A\", \"contains\", \"B\"]]\n```";
        let value = repair(raw).expect("fenced JSON should repair");
        assert_eq!(value, json!([["A", "contains", "B"]]));
    }

    #[test]
    fn test_surrounding_prose_is_discarded() {
        let raw = "Here are the extracted relations:\n[[\"A\", \"contains\", \"B\"]]\nLet me know if you need more.";
        let value = repair(raw).expect("prose-wrapped JSON should repair");
        assert_eq!(value, json!([["A", "contains", "B"]]));
    }

    #[test]
    fn test_embedded_newlines_are_collapsed() {
        let raw = "[\n  [\"A\", \"contains\", \"B\"],\n  [\"B\", \"contains\", \"C\"]\n]";
        let value = repair(raw).expect("multi-line JSON should repair");
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_single_quotes_are_normalized() {
        let raw = "[['A', 'contains', 'B']]";
        let value = repair(raw).expect("single-quoted JSON should repair");
        assert_eq!(value, json!([["A", "contains", "B"]]));
    }

    #[test]
    fn test_missing_comma_between_elements_is_inserted() {
        let raw = r#"[["A", "contains", "B"] ["A", "contains", "C"]]"#;
        let value = repair(raw).expect("missing comma should be repaired");
        assert_eq!(value, json!([["A", "contains", "B"], ["A", "contains", "C"]]));
    }

    #[test]
    fn test_missing_comma_with_nested_elements() {
        let raw = r#"[[["x"], "r", "B"] ["B", "r", "C"]]"#;
        let value = repair(raw).expect("nested missing comma should be repaired");
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_trailing_comma_recovered_by_permissive_parse() {
        let raw = r#"[["A", "contains", "B"],]"#;
        let value = repair(raw).expect("trailing comma should be repaired");
        assert_eq!(value, json!([["A", "contains", "B"]]));
    }

    #[test]
    fn test_python_literals_recovered_by_permissive_parse() {
        let raw = "[['A', 'contains', 'B', True], ['B', 'contains', 'C', False]]";
        let value = repair(raw).expect("Python literal array should be repaired");
        assert_eq!(
            value,
            json!([["A", "contains", "B", true], ["B", "contains", "C", false]])
        );
    }

    #[test]
    fn test_unquoted_object_keys_recovered() {
        let raw = r#"[{source: "A", relation: "contains", target: "B"}]"#;
        let value = repair(raw).expect("bare keys should be repaired");
        assert_eq!(value[0]["source"], "A");
        assert_eq!(value[0]["target"], "B");
    }

    #[test]
    fn test_empty_string_is_unrecoverable() {
        let err = repair("").expect_err("empty input must fail");
        assert!(matches!(err, CanopyError::UnrecoverableFormat { .. }));
    }

    #[test]
    fn test_bare_object_rejected_by_type_check() {
        let err = repair(r#"{"source": "A"}"#).expect_err("non-array must be rejected");
        match err {
            CanopyError::UnrecoverableFormat { detail, .. } => {
                assert!(detail.contains("object"), "detail was: {}", detail)
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unrecoverable_error_carries_original_text() {
        let raw = "no brackets here at all";
        match repair(raw) {
            Err(CanopyError::UnrecoverableFormat { raw: kept, .. }) => {
                assert_eq!(kept, raw);
            }
            other => panic!("expected UnrecoverableFormat, got {:?}", other),
        }
    }

    #[test]
    fn test_insert_missing_comma_finds_sibling_close() {
        let text = r#"[["a","b"] ["c","d"]]"#;
        let fixed = insert_missing_comma(text, 11).expect("should find insertion point");
        assert_eq!(fixed, r#"[["a","b"], ["c","d"]]"#);
    }

    #[test]
    fn test_insert_missing_comma_none_without_close() {
        assert!(insert_missing_comma(r#"["a" "b"]"#, 5).is_none());
    }

    #[test]
    fn test_isolate_array_keeps_bracket_span() {
        assert_eq!(isolate_array("noise [1, 2] more noise"), "[1, 2]");
        assert_eq!(isolate_array("no array"), "no array");
    }

    #[test]
    fn test_permissive_parses_tuples_as_arrays() {
        let value = permissive::parse("[('A', 'r', 'B')]").expect("tuple should parse");
        assert_eq!(value, json!([["A", "r", "B"]]));
    }
}
