use serde_json::{Map, Value};

use super::{FunctionCall, CALL_CLOSE, CALL_OPEN, END_MARKERS};

/// Result of scanning model text for a call payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCall {
    Call(FunctionCall),
    /// No well-formed payload; carries the cleaned text.
    NoCall(String),
}

impl ParsedCall {
    pub fn call(&self) -> Option<&FunctionCall> {
        match self {
            ParsedCall::Call(call) => Some(call),
            ParsedCall::NoCall(_) => None,
        }
    }

    pub fn into_call(self) -> Option<FunctionCall> {
        match self {
            ParsedCall::Call(call) => Some(call),
            ParsedCall::NoCall(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDiagnostic {
    pub reason: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallParse {
    pub outcome: ParsedCall,
    /// Text before the first opening marker.
    pub preamble: String,
    /// Well-formed payloads after the first one; never used.
    pub ignored_payloads: usize,
    pub diagnostics: Vec<CallDiagnostic>,
}

/// Extracts the first well-formed `<tool_call>{...}</tool_call>` payload from `text`.
///
/// A closing marker written without its slash is accepted when the enclosed
/// body parses. Malformed bodies are skipped and reported in `diagnostics`.
/// This never fails: text without a usable payload yields `ParsedCall::NoCall`.
pub fn parse_call(text: &str) -> CallParse {
    let mut diagnostics = Vec::new();
    let mut first: Option<FunctionCall> = None;
    let mut ignored_payloads = 0usize;
    let mut cursor = 0usize;

    let preamble = match text.find(CALL_OPEN) {
        Some(start) => strip_end_markers(&text[..start]),
        None => String::new(),
    };

    while let Some(offset) = text[cursor..].find(CALL_OPEN) {
        let body_start = cursor + offset + CALL_OPEN.len();
        let rest = &text[body_start..];
        let close = rest.find(CALL_CLOSE);
        let reopen = rest.find(CALL_OPEN);

        let (body, next_cursor, missing_slash) = match (close, reopen) {
            (Some(close), Some(reopen)) if reopen < close => {
                (&rest[..reopen], body_start + reopen, true)
            }
            (Some(close), _) => (&rest[..close], body_start + close + CALL_CLOSE.len(), false),
            (None, Some(reopen)) => (&rest[..reopen], body_start + reopen, true),
            (None, None) => {
                let body = strip_end_markers(rest);
                if !body.is_empty() {
                    diagnostics.push(CallDiagnostic {
                        reason: "payload has no closing marker".to_string(),
                        payload: body,
                    });
                }
                break;
            }
        };

        match decode_payload(body) {
            Ok(call) => {
                if first.is_none() {
                    first = Some(call);
                } else {
                    ignored_payloads += 1;
                }
                // The slashless closer belongs to this payload.
                cursor = if missing_slash {
                    next_cursor + CALL_OPEN.len()
                } else {
                    next_cursor
                };
            }
            Err(reason) => {
                diagnostics.push(CallDiagnostic {
                    reason,
                    payload: body.trim().to_string(),
                });
                cursor = next_cursor;
            }
        }
    }

    let outcome = match first {
        Some(call) => ParsedCall::Call(call),
        None => ParsedCall::NoCall(strip_end_markers(text)),
    };
    CallParse {
        outcome,
        preamble,
        ignored_payloads,
        diagnostics,
    }
}

/// Trims whitespace and any trailing end-of-output markers.
pub fn strip_end_markers(text: &str) -> String {
    let mut out = text.trim();
    loop {
        let before = out.len();
        for marker in END_MARKERS {
            if let Some(stripped) = out.strip_suffix(marker) {
                out = stripped.trim_end();
            }
        }
        if out.len() == before {
            break;
        }
    }
    out.trim().to_string()
}

fn decode_payload(body: &str) -> Result<FunctionCall, String> {
    let object = decode_object(body)?;
    let name = match object.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        Some(_) => return Err("`name` is not a non-empty string".to_string()),
        None => return Err("payload has no `name` field".to_string()),
    };
    let arguments = match object.get("arguments") {
        Some(Value::Object(arguments)) => arguments.clone(),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(arguments)) => arguments,
            Ok(_) => return Err("string-encoded `arguments` is not an object".to_string()),
            Err(err) => return Err(format!("string-encoded `arguments` is not JSON: {err}")),
        },
        Some(_) => return Err("`arguments` is not an object".to_string()),
        None => return Err("payload has no `arguments` field".to_string()),
    };
    Ok(FunctionCall { name, arguments })
}

fn decode_object(body: &str) -> Result<Map<String, Value>, String> {
    let raw = body.trim();
    if raw.is_empty() {
        return Err("empty payload".to_string());
    }
    let mut candidates = vec![raw];
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start && (start > 0 || end + 1 < raw.len()) {
            candidates.push(&raw[start..=end]);
        }
    }
    let mut last_error = String::new();
    for candidate in candidates {
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(object)) => return Ok(object),
            Ok(_) => last_error = "payload is not a JSON object".to_string(),
            Err(err) => last_error = format!("invalid JSON: {err}"),
        }
    }
    Err(last_error)
}
