use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only writer for a deck run's `events.jsonl`.
///
/// - default fields are `type`, `deck_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
/// - with `echo` set, a short `[deckloop] <type> ...` line also goes to stderr
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    deck_id: String,
    echo: bool,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, deck_id: impl Into<String>) -> Self {
        Self::with_echo(path, deck_id, false)
    }

    pub fn with_echo(path: impl Into<PathBuf>, deck_id: impl Into<String>, echo: bool) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                deck_id: deck_id.into(),
                echo,
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn deck_id(&self) -> &str {
        &self.inner.deck_id
    }

    /// Appends one event and returns it as written.
    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::with_capacity(payload.len() + 3);
        event.insert("type".into(), event_type.into());
        event.insert("deck_id".into(), self.inner.deck_id.as_str().into());
        event.insert("ts".into(), now_utc_iso().into());
        event.extend(payload);
        let line = serde_json::to_string(&event)?;

        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        if let Some(dir) = self.inner.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        writeln!(file, "{line}")?;
        if self.inner.echo {
            eprintln!("[deckloop] {}", echo_line(&event));
        }
        Ok(Value::Object(event))
    }
}

/// Reads every parseable line of an events file; unparseable lines are skipped.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<Map<String, Value>>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|row| row.as_object().cloned())
        .collect())
}

fn echo_line(event: &Map<String, Value>) -> String {
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or("event");
    let mut parts = vec![event_type.to_string()];
    for key in ["slide", "attempt", "decision", "reason", "outcome", "error"] {
        let Some(value) = event.get(key) else {
            continue;
        };
        let rendered = match value {
            Value::String(text) => text.clone(),
            Value::Null => continue,
            other => other.to_string(),
        };
        parts.push(format!("{key}={rendered}"));
    }
    parts.join(" ")
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "deck-123");

        let mut payload = EventPayload::new();
        payload.insert("out_dir".to_string(), Value::String("/tmp/deck".to_string()));
        let emitted = writer.emit("run_started", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], json!("run_started"));
        assert_eq!(parsed["deck_id"], json!("deck-123"));
        assert_eq!(parsed["out_dir"], json!("/tmp/deck"));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "deck-123");

        let mut payload = EventPayload::new();
        payload.insert("deck_id".to_string(), json!("override-deck"));
        let emitted = writer.emit("slide_started", payload)?;

        assert_eq!(emitted["type"], json!("slide_started"));
        assert_eq!(emitted["deck_id"], json!("override-deck"));
        Ok(())
    }

    #[test]
    fn read_events_returns_lines_in_order_and_skips_garbage() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "deck-123");

        writer.emit("one", EventPayload::new())?;
        {
            let mut file = OpenOptions::new().append(true).open(&path)?;
            file.write_all(b"not json\n")?;
        }
        writer.emit("two", EventPayload::new())?;

        let rows = read_events(&path)?;
        let types: Vec<&str> = rows
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str))
            .collect();
        assert_eq!(types, vec!["one", "two"]);
        Ok(())
    }

    #[test]
    fn echo_line_lists_known_fields_only() {
        let event = json!({
            "type": "attempt_failed",
            "slide": 2,
            "attempt": 3,
            "reason": "invalid_call",
            "raw": "ignored",
        });
        let line = echo_line(event.as_object().unwrap_or(&Map::new()));
        assert_eq!(line, "attempt_failed slide=2 attempt=3 reason=invalid_call");
    }
}
