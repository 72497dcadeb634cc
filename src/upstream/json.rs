//! JSON decoding for upstream responses with readable failure messages.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Parse a response body, reporting the failing path, the type mismatch and a
/// snippet of the offending line.
pub fn parse_json_with_context<T: DeserializeOwned>(body: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let message = inner.to_string();
        let message = message
            .strip_suffix(&format!(" at line {line} column {column}"))
            .unwrap_or(&message);

        anyhow::anyhow!(
            "{}{} (line {line} col {column})\n{}",
            path_prefix(&err.path().to_string()),
            describe_mismatch(message),
            snippet(body, line, column, 20)
        )
    })
}

/// Decode an already-parsed value, reporting the failing path on error.
pub fn decode_value<T: DeserializeOwned>(value: &Value) -> Result<T> {
    serde_path_to_error::deserialize(value).map_err(|err| {
        anyhow::anyhow!(
            "{}{}",
            path_prefix(&err.path().to_string()),
            describe_mismatch(&err.inner().to_string())
        )
    })
}

fn path_prefix(path: &str) -> String {
    if path.is_empty() || path == "." {
        String::new()
    } else {
        format!("at path '{path}': ")
    }
}

/// Turn "invalid type: null, expected a string" into "expected a string, got null".
fn describe_mismatch(message: &str) -> String {
    if let Some(rest) = message.split_once("invalid type: ").map(|(_, rest)| rest)
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        let expected = expected
            .split(" at line ")
            .next()
            .unwrap_or(expected)
            .trim();
        return format!("expected {expected}, got {actual}");
    }
    message
        .split(" at line ")
        .next()
        .unwrap_or(message)
        .to_string()
}

fn snippet(body: &str, line: usize, column: usize, width: usize) -> String {
    let target = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if target.is_empty() {
        return "(empty line)".to_string();
    }
    let at = column.saturating_sub(1).min(target.len());
    let start = floor_char_boundary(target, at.saturating_sub(width / 2));
    let end = floor_char_boundary(target, (at + width / 2).min(target.len()));
    let caret = " ".repeat(at - start) + "^";
    format!("...{}...\n   {caret}", &target[start..end])
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Game {
        id: u64,
        name: String,
        platforms: Vec<Platform>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Platform {
        abbreviation: String,
    }

    #[test]
    fn describe_mismatch_rewrites_invalid_type() {
        assert_eq!(
            describe_mismatch("invalid type: null, expected a string at line 4 column 9"),
            "expected a string, got null"
        );
        assert_eq!(
            describe_mismatch("expected value at line 1 column 1"),
            "expected value"
        );
    }

    #[test]
    fn parse_reports_nested_path() {
        let body = r#"[
            {"id": 1, "name": "Foo", "platforms": [{"abbreviation": null}]}
        ]"#;
        let err = parse_json_with_context::<Vec<Game>>(body)
            .unwrap_err()
            .to_string();
        assert!(err.contains("[0].platforms[0].abbreviation"), "{err}");
        assert!(err.contains("expected a string, got null"), "{err}");
    }

    #[test]
    fn parse_handles_truncated_body() {
        let err = parse_json_with_context::<Vec<Game>>("[{\"id\": 1,")
            .unwrap_err()
            .to_string();
        assert!(err.contains("line 1"), "{err}");
    }

    #[test]
    fn decode_value_reports_path() {
        let value = serde_json::json!([{"id": "one", "name": "Foo", "platforms": []}]);
        let err = decode_value::<Vec<Game>>(&value).unwrap_err().to_string();
        assert!(err.contains("[0].id"), "{err}");
    }

    #[test]
    fn snippet_points_at_column() {
        let out = snippet("abcdefghij", 1, 5, 4);
        assert_eq!(out, "...cdef...\n     ^");
    }
}
