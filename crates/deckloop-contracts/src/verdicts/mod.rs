use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calls::{parse_call, strip_end_markers, CallDiagnostic, FunctionCall, CALL_OPEN};

pub const NO_REASON: &str = "No reason provided.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Deny,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Accept => "accept",
            Decision::Deny => "deny",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub decision: Decision,
    pub rationale: String,
    /// Only ever set on `Deny`.
    pub revised_call: Option<FunctionCall>,
    /// Set when an accept carried a payload that was dropped.
    pub dropped_payload: bool,
    pub diagnostics: Vec<CallDiagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerdictError {
    #[error("verdict needs a decision line and a rationale, got {lines} line(s)")]
    TooShort { lines: usize },
    #[error("unrecognized verdict decision `{0}`")]
    UnknownDecision(String),
}

/// Parses the evaluator's reply:
///
/// ```text
/// <!-- accept|deny -->
/// <!-- rationale, possibly over several lines -->
/// <tool_call>
/// {"name": ..., "arguments": {...}}
/// </tool_call>
/// ```
///
/// The payload block is only read on `deny`.
pub fn parse_verdict(text: &str) -> Result<Verdict, VerdictError> {
    let cleaned = strip_end_markers(text);
    let lines: Vec<&str> = cleaned.split('\n').collect();
    if lines.len() < 2 {
        return Err(VerdictError::TooShort { lines: lines.len() });
    }

    let token = decision_token(lines[0]);
    let decision = match token.to_ascii_lowercase().as_str() {
        "accept" => Decision::Accept,
        "deny" => Decision::Deny,
        _ => return Err(VerdictError::UnknownDecision(token)),
    };

    let body = &lines[1..];
    let payload_at = body
        .iter()
        .position(|line| line.trim_start().starts_with(CALL_OPEN));
    let rationale_lines = match payload_at {
        Some(index) => &body[..index],
        None => body,
    };
    let rationale = rationale_lines
        .iter()
        .map(|line| strip_comment(line))
        .filter(|line| !line.is_empty())
        .collect::<Vec<String>>()
        .join("\n");
    let rationale = if rationale.is_empty() {
        NO_REASON.to_string()
    } else {
        rationale
    };

    let mut verdict = Verdict {
        decision,
        rationale,
        revised_call: None,
        dropped_payload: false,
        diagnostics: Vec::new(),
    };
    let Some(index) = payload_at else {
        return Ok(verdict);
    };
    match decision {
        Decision::Accept => verdict.dropped_payload = true,
        Decision::Deny => {
            let payload = body[index..].join("\n");
            let parsed = parse_call(&payload);
            verdict.revised_call = parsed.outcome.into_call();
            verdict.diagnostics = parsed.diagnostics;
        }
    }
    Ok(verdict)
}

fn decision_token(line: &str) -> String {
    line.trim()
        .trim_matches(|ch| matches!(ch, '<' | '!' | '-' | '>'))
        .trim()
        .to_string()
}

fn strip_comment(line: &str) -> String {
    let mut out = line.trim();
    if let Some(rest) = out.strip_prefix("<!--") {
        out = rest;
    }
    if let Some(rest) = out.strip_suffix("-->") {
        out = rest;
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_verdict, Decision, VerdictError, NO_REASON};

    #[test]
    fn accept_with_rationale() -> anyhow::Result<()> {
        let verdict = parse_verdict("<!-- accept -->\n<!-- Clear title, balanced layout. -->")?;
        assert_eq!(verdict.decision, Decision::Accept);
        assert_eq!(verdict.rationale, "Clear title, balanced layout.");
        assert!(verdict.revised_call.is_none());
        Ok(())
    }

    #[test]
    fn deny_with_revised_call_and_multiline_reason() -> anyhow::Result<()> {
        let text = "<!-- deny -->\nThe subtitle is unreadable.\nContrast is too low.\n<tool_call>\n{\"name\": \"split_title\", \"arguments\": {\"subtitle_color\": \"#111\"}}\n</tool_call>";
        let verdict = parse_verdict(text)?;
        assert_eq!(verdict.decision, Decision::Deny);
        assert_eq!(
            verdict.rationale,
            "The subtitle is unreadable.\nContrast is too low."
        );
        let call = verdict.revised_call.unwrap_or_else(|| panic!("missing revision"));
        assert_eq!(call.name, "split_title");
        assert_eq!(call.arguments.get("subtitle_color"), Some(&json!("#111")));
        Ok(())
    }

    #[test]
    fn deny_without_payload_is_tolerated() -> anyhow::Result<()> {
        let verdict = parse_verdict("<!-- DENY -->\n<!-- -->")?;
        assert_eq!(verdict.decision, Decision::Deny);
        assert_eq!(verdict.rationale, NO_REASON);
        assert!(verdict.revised_call.is_none());
        Ok(())
    }

    #[test]
    fn deny_with_malformed_payload_keeps_diagnostics() -> anyhow::Result<()> {
        let verdict = parse_verdict("deny\nbad\n<tool_call>\n{oops}\n</tool_call>")?;
        assert!(verdict.revised_call.is_none());
        assert_eq!(verdict.diagnostics.len(), 1);
        Ok(())
    }

    #[test]
    fn accept_never_carries_a_revision() -> anyhow::Result<()> {
        let text = "<!-- accept -->\nlooks good\n<tool_call>\n{\"name\": \"x\", \"arguments\": {}}\n</tool_call>";
        let verdict = parse_verdict(text)?;
        assert_eq!(verdict.decision, Decision::Accept);
        assert!(verdict.revised_call.is_none());
        assert!(verdict.dropped_payload);
        assert_eq!(verdict.rationale, "looks good");
        Ok(())
    }

    #[test]
    fn single_line_and_unknown_tokens_fail() {
        assert_eq!(
            parse_verdict("<!-- accept -->"),
            Err(VerdictError::TooShort { lines: 1 })
        );
        assert_eq!(
            parse_verdict("<!-- maybe -->\nnot sure"),
            Err(VerdictError::UnknownDecision("maybe".to_string()))
        );
        assert!(parse_verdict("Model not loaded").is_err());
    }
}
