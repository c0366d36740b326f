use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::calls::FunctionCall;
use crate::runs::verdict_log::VerdictRecord;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// Everything known about one render/evaluate cycle of one slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptReceipt {
    pub slide: usize,
    pub attempt: u32,
    pub call: Option<FunctionCall>,
    #[serde(default)]
    pub model_output: Option<String>,
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub verdict: Option<VerdictRecord>,
    #[serde(default)]
    pub artifacts: AttemptArtifacts,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptArtifacts {
    pub html_path: Option<PathBuf>,
    pub png_path: Option<PathBuf>,
    pub receipt_path: Option<PathBuf>,
}

impl AttemptReceipt {
    pub fn new(slide: usize, attempt: u32) -> Self {
        Self {
            slide,
            attempt,
            call: None,
            model_output: None,
            failure: None,
            verdict: None,
            artifacts: AttemptArtifacts::default(),
            metadata: Map::new(),
        }
    }
}

pub fn build_receipt(receipt: &AttemptReceipt) -> anyhow::Result<Value> {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    if let Value::Object(fields) = serde_json::to_value(receipt)? {
        for (key, value) in fields {
            root.insert(key, sanitize_payload(&value));
        }
    }
    Ok(Value::Object(root))
}

pub fn write_receipt(path: &Path, receipt: &AttemptReceipt) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let payload = build_receipt(receipt)?;
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

pub fn read_receipt(path: &Path) -> anyhow::Result<AttemptReceipt> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(lowered.as_str(), "png" | "image_url" | "data") {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{build_receipt, read_receipt, write_receipt, AttemptReceipt, RECEIPT_SCHEMA_VERSION};
    use crate::calls::FunctionCall;
    use crate::runs::verdict_log::VerdictRecord;
    use crate::verdicts::Decision;

    #[test]
    fn receipt_round_trips_through_disk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("attempts/slide_001/attempt_1.json");

        let mut receipt = AttemptReceipt::new(0, 1);
        receipt.call = Some(FunctionCall::new(
            "body_focus",
            json!({"title": "Roadmap"}).as_object().cloned().unwrap_or_default(),
        ));
        receipt.verdict = Some(VerdictRecord {
            decision: Decision::Deny,
            rationale: "Too dense.".to_string(),
            revised_call: None,
            dropped_payload: false,
        });
        receipt.artifacts.html_path = Some(temp.path().join("attempt_1.html"));
        write_receipt(&path, &receipt)?;

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(raw["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(raw["verdict"]["decision"], json!("deny"));

        let loaded = read_receipt(&path)?;
        assert_eq!(loaded, receipt);
        Ok(())
    }

    #[test]
    fn image_payloads_are_omitted() -> anyhow::Result<()> {
        let mut receipt = AttemptReceipt::new(2, 3);
        receipt.metadata.insert(
            "vision_request".to_string(),
            json!({"image_url": "data:image/png;base64,AAAA", "detail": "high"}),
        );
        receipt.failure = Some("render timed out".to_string());
        let payload = build_receipt(&receipt)?;
        assert_eq!(
            payload["metadata"]["vision_request"]["image_url"],
            json!("<omitted>")
        );
        assert_eq!(payload["metadata"]["vision_request"]["detail"], json!("high"));
        assert_eq!(payload["failure"], json!("render timed out"));
        Ok(())
    }
}
