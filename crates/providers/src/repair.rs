//! Bounded repair of truncated JSON tool-call payloads.
//!
//! Models that hit their token limit mid-call emit arguments like
//! `{"path": "/tmp/a", "opts": {"depth": [1, 2`. The only repair performed
//! here is closing what was left open at the end of the input: an
//! unterminated string, then every open object and array in reverse order.
//! Anything else (stray or mismatched closers, a dangling key, a trailing
//! comma) is reported as unrepairable.

use serde_json::{Map, Value};

/// Why a payload could not be turned into an argument object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepairError {
    #[error("unexpected '{found}' at byte {offset} with nothing open")]
    ExtraCloser { offset: usize, found: char },

    #[error("expected '{expected}' but found '{found}' at byte {offset}")]
    MismatchedCloser {
        offset: usize,
        expected: char,
        found: char,
    },

    #[error("invalid JSON after repair: {0}")]
    Invalid(String),

    #[error("arguments must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Close an unterminated string and any open `{` / `[` at the end of `raw`.
///
/// Balanced input comes back byte-for-byte unchanged. The result is not
/// guaranteed to parse; interior truncation survives closing and is caught
/// by the caller's re-parse.
pub fn close_json(raw: &str) -> Result<String, RepairError> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => match stack.pop() {
                None => return Err(RepairError::ExtraCloser { offset, found: c }),
                Some(expected) if expected != c => {
                    return Err(RepairError::MismatchedCloser {
                        offset,
                        expected,
                        found: c,
                    });
                }
                Some(_) => {}
            },
            _ => {}
        }
    }

    if !in_string && stack.is_empty() {
        return Ok(raw.to_string());
    }

    let mut repaired = raw.to_string();
    if in_string {
        if escaped {
            // A lone trailing backslash would escape the closing quote
            repaired.pop();
        }
        repaired.push('"');
    }
    repaired.extend(stack.iter().rev());
    Ok(repaired)
}

/// Parse a model-emitted argument string into an object, repairing once.
///
/// Returns the arguments and whether repair was needed. Blank input is an
/// empty argument object.
pub fn parse_arguments(raw: &str) -> Result<(Map<String, Value>, bool), RepairError> {
    if raw.trim().is_empty() {
        return Ok((Map::new(), false));
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(value) => into_object(value).map(|args| (args, false)),
        Err(original) => {
            let repaired = close_json(raw)?;
            if repaired == raw {
                return Err(RepairError::Invalid(original.to_string()));
            }
            let value = serde_json::from_str::<Value>(&repaired)
                .map_err(|e| RepairError::Invalid(e.to_string()))?;
            into_object(value).map(|args| (args, true))
        }
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>, RepairError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Array(_) => Err(RepairError::NotAnObject("an array")),
        Value::String(_) => Err(RepairError::NotAnObject("a string")),
        Value::Number(_) => Err(RepairError::NotAnObject("a number")),
        Value::Bool(_) => Err(RepairError::NotAnObject("a boolean")),
        Value::Null => Err(RepairError::NotAnObject("null")),
    }
}
