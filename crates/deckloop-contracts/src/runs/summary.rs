use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckSummary {
    pub deck_id: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: String,
    pub total_slides: u64,
    pub accepted: u64,
    pub exhausted: u64,
    pub total_attempts: u64,
    pub error: Option<String>,
}

pub fn write_summary(
    path: &Path,
    summary: &DeckSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{write_summary, DeckSummary};

    #[test]
    fn write_summary_generates_expected_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("summary.json");

        let summary = DeckSummary {
            deck_id: "deck-123".to_string(),
            status: "succeeded".to_string(),
            started_at: "2026-02-19T00:00:00+00:00".to_string(),
            finished_at: "2026-02-19T00:10:00+00:00".to_string(),
            total_slides: 4,
            accepted: 3,
            exhausted: 1,
            total_attempts: 9,
            error: None,
        };
        let mut extra = Map::new();
        extra.insert("archive".to_string(), Value::String("deck.zip".to_string()));
        write_summary(&path, &summary, Some(&extra))?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["deck_id"], json!("deck-123"));
        assert_eq!(parsed["total_slides"], json!(4));
        assert_eq!(parsed["exhausted"], json!(1));
        assert_eq!(parsed["error"], Value::Null);
        assert_eq!(parsed["archive"], json!("deck.zip"));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }
}
