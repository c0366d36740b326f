use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::calls::FunctionCall;
use crate::verdicts::{Decision, Verdict};

/// Serializable view of a parsed verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub decision: Decision,
    pub rationale: String,
    pub revised_call: Option<FunctionCall>,
    #[serde(default)]
    pub dropped_payload: bool,
}

impl From<&Verdict> for VerdictRecord {
    fn from(verdict: &Verdict) -> Self {
        Self {
            decision: verdict.decision,
            rationale: verdict.rationale.clone(),
            revised_call: verdict.revised_call.clone(),
            dropped_payload: verdict.dropped_payload,
        }
    }
}

/// Appends one JSONL row per evaluated attempt to `verdicts.jsonl`.
#[derive(Debug, Clone)]
pub struct VerdictLog {
    path: PathBuf,
    deck_id: String,
}

impl VerdictLog {
    pub fn new(path: impl Into<PathBuf>, deck_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            deck_id: deck_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(
        &self,
        slide: usize,
        attempt: u32,
        verdict: &Verdict,
    ) -> anyhow::Result<Map<String, Value>> {
        let record = VerdictRecord::from(verdict);
        let mut payload = Map::new();
        payload.insert("ts".to_string(), Value::String(now_utc_iso()));
        payload.insert("deck_id".to_string(), Value::String(self.deck_id.clone()));
        payload.insert("slide".to_string(), Value::Number(slide.into()));
        payload.insert("attempt".to_string(), Value::Number(attempt.into()));
        if let Value::Object(fields) = serde_json::to_value(&record)? {
            payload.extend(fields);
        }

        append_jsonl(&self.path, &payload)?;
        Ok(payload)
    }
}

/// Reads back `(slide, attempt, record)` rows; malformed lines are skipped.
pub fn read_verdicts(path: &Path) -> anyhow::Result<Vec<(usize, u32, VerdictRecord)>> {
    let raw = std::fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for line in raw.lines() {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let slide = value.get("slide").and_then(Value::as_u64);
        let attempt = value.get("attempt").and_then(Value::as_u64);
        let record = serde_json::from_value::<VerdictRecord>(value.clone()).ok();
        if let (Some(slide), Some(attempt), Some(record)) = (slide, attempt, record) {
            rows.push((slide as usize, attempt as u32, record));
        }
    }
    Ok(rows)
}

fn append_jsonl(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    use std::io::Write;
    file.write_all(serde_json::to_string(payload)?.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
