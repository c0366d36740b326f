use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use similar::TextDiff;
use uuid::Uuid;

use crate::calls::FunctionCall;
use crate::slides::SlideOutcome;

pub const MANIFEST_SCHEMA_VERSION: u64 = 1;

/// One applied deny-with-revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionEntry {
    pub attempt: u32,
    pub from_name: String,
    pub to_name: String,
    #[serde(default)]
    pub argument_diff: Map<String, Value>,
    #[serde(default)]
    pub content_diff: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideEntry {
    pub index: usize,
    pub content: String,
    pub outcome: SlideOutcome,
    pub attempts_used: u32,
    pub final_call: Option<FunctionCall>,
    pub html_path: Option<String>,
    pub png_path: Option<String>,
    #[serde(default)]
    pub revisions: Vec<RevisionEntry>,
}

impl SlideEntry {
    pub fn new(index: usize, content: impl Into<String>) -> Self {
        Self {
            index,
            content: content.into(),
            outcome: SlideOutcome::Pending,
            attempts_used: 0,
            final_call: None,
            html_path: None,
            png_path: None,
            revisions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeckManifest {
    pub path: PathBuf,
    pub schema_version: u64,
    pub deck_id: String,
    pub created_at: String,
    pub source: Option<String>,
    pub status: String,
    pub slides: Vec<SlideEntry>,
}

impl DeckManifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schema_version: MANIFEST_SCHEMA_VERSION,
            deck_id: Uuid::new_v4().to_string(),
            created_at: now_utc_iso(),
            source: None,
            status: "running".to_string(),
            slides: Vec::new(),
        }
    }

    /// Loads what it can; missing or unreadable fields keep fresh defaults
    /// and malformed slide rows are skipped.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut manifest = Self::new(path.clone());
        let payload = read_json(&path).unwrap_or(Value::Object(Map::new()));
        let Some(obj) = payload.as_object() else {
            return manifest;
        };

        manifest.schema_version = obj
            .get("schema_version")
            .and_then(Value::as_u64)
            .unwrap_or(manifest.schema_version);
        manifest.deck_id = obj
            .get("deck_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(manifest.deck_id);
        manifest.created_at = obj
            .get("created_at")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(manifest.created_at);
        manifest.source = obj
            .get("source")
            .and_then(Value::as_str)
            .map(str::to_string);
        manifest.status = obj
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(manifest.status);

        if let Some(slides) = obj.get("slides").and_then(Value::as_array) {
            for item in slides {
                if let Ok(parsed) = serde_json::from_value::<SlideEntry>(item.clone()) {
                    manifest.slides.push(parsed);
                }
            }
        }
        manifest.slides.sort_by_key(|entry| entry.index);
        manifest
    }

    /// Inserts or replaces the entry for `entry.index`, keeping slide order.
    pub fn add_slide(&mut self, entry: SlideEntry) {
        match self
            .slides
            .binary_search_by_key(&entry.index, |existing| existing.index)
        {
            Ok(pos) => self.slides[pos] = entry,
            Err(pos) => self.slides.insert(pos, entry),
        }
    }

    pub fn slide(&self, index: usize) -> Option<&SlideEntry> {
        self.slides.iter().find(|entry| entry.index == index)
    }

    pub fn set_status(&mut self, status: &str) {
        self.status = status.to_string();
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let mut payload = Map::new();
        payload.insert(
            "schema_version".to_string(),
            Value::Number(self.schema_version.into()),
        );
        payload.insert("deck_id".to_string(), Value::String(self.deck_id.clone()));
        payload.insert(
            "created_at".to_string(),
            Value::String(self.created_at.clone()),
        );
        payload.insert(
            "source".to_string(),
            self.source.clone().map(Value::String).unwrap_or(Value::Null),
        );
        payload.insert("status".to_string(), Value::String(self.status.clone()));
        let mut slides = Vec::with_capacity(self.slides.len());
        for entry in &self.slides {
            slides.push(serde_json::to_value(entry)?);
        }
        payload.insert("slides".to_string(), Value::Array(slides));

        write_json(&self.path, Value::Object(payload))
    }

    /// Committed `(html, png)` paths in ascending slide order, resolved
    /// against the manifest's directory.
    pub fn ordered_artifacts(&self) -> Vec<(usize, Option<PathBuf>, Option<PathBuf>)> {
        let base = self.path.parent().map(Path::to_path_buf).unwrap_or_default();
        let resolve = |raw: &Option<String>| {
            raw.as_ref().map(|value| {
                let path = PathBuf::from(value);
                if path.is_absolute() {
                    path
                } else {
                    base.join(path)
                }
            })
        };
        self.slides
            .iter()
            .map(|entry| (entry.index, resolve(&entry.html_path), resolve(&entry.png_path)))
            .collect()
    }
}

/// Builds the manifest record for a revision from `current` to `revised`.
/// `content_keys` names the content-role parameters whose text changes are
/// diffed line by line.
pub fn record_revision(
    attempt: u32,
    current: &FunctionCall,
    revised: &FunctionCall,
    content_keys: &[String],
) -> RevisionEntry {
    let argument_diff = argument_diff(current, revised);
    let mut content_lines = Vec::new();
    for key in content_keys {
        if !argument_diff.contains_key(key) {
            continue;
        }
        let before = text_of(current.arguments.get(key));
        let after = text_of(revised.arguments.get(key));
        content_lines.extend(text_diff(key, &before, &after));
    }
    RevisionEntry {
        attempt,
        from_name: current.name.clone(),
        to_name: revised.name.clone(),
        argument_diff,
        content_diff: if content_lines.is_empty() {
            None
        } else {
            Some(content_lines)
        },
    }
}

/// Unified diff of one field, `prev`/`curr` headers labelled with `key`.
pub fn text_diff(key: &str, before: &str, after: &str) -> Vec<String> {
    let diff = TextDiff::from_lines(before, after);
    diff.unified_diff()
        .header(&format!("{key} (prev)"), &format!("{key} (curr)"))
        .to_string()
        .lines()
        .map(str::to_string)
        .collect()
}

fn argument_diff(current: &FunctionCall, revised: &FunctionCall) -> Map<String, Value> {
    let mut diff = Map::new();
    for key in current.changed_keys(revised) {
        let mut row = Map::new();
        let from = current.arguments.get(&key).cloned().unwrap_or(Value::Null);
        let to = revised.arguments.get(&key).cloned().unwrap_or(Value::Null);
        row.insert("from".to_string(), from);
        row.insert("to".to_string(), to);
        diff.insert(key, Value::Object(row));
    }
    diff
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<String>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json(path: &Path, payload: Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{record_revision, DeckManifest, SlideEntry};
    use crate::calls::FunctionCall;
    use crate::slides::SlideOutcome;

    fn call(name: &str, arguments: serde_json::Value) -> FunctionCall {
        FunctionCall::new(name, arguments.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn manifest_slides_roundtrip_in_order() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("manifest.json");
        let mut manifest = DeckManifest::new(&path);
        manifest.source = Some("notes.docx".to_string());

        let mut second = SlideEntry::new(1, "body text");
        second.outcome = SlideOutcome::ExhaustedFallback;
        second.attempts_used = 5;
        second.html_path = Some("html/slide_002.html".to_string());
        manifest.add_slide(second);

        let mut first = SlideEntry::new(0, "intro");
        first.outcome = SlideOutcome::Accepted;
        first.attempts_used = 2;
        first.final_call = Some(call("split_title", json!({"title": "Intro"})));
        first.html_path = Some("html/slide_001.html".to_string());
        first.png_path = Some("png/slide_001.png".to_string());
        first.revisions.push(record_revision(
            1,
            &call("split_title", json!({"title": "Intro", "bg_color": "#fff"})),
            &call("split_title", json!({"title": "Intro", "bg_color": "#000"})),
            &["title".to_string()],
        ));
        manifest.add_slide(first);
        manifest.set_status("succeeded");
        manifest.save()?;

        let loaded = DeckManifest::load(&path);
        assert_eq!(loaded.deck_id, manifest.deck_id);
        assert_eq!(loaded.status, "succeeded");
        assert_eq!(loaded.source.as_deref(), Some("notes.docx"));
        assert_eq!(loaded.slides.len(), 2);
        assert_eq!(loaded.slides[0].index, 0);
        assert_eq!(loaded.slides[0].revisions.len(), 1);
        assert_eq!(
            loaded.slides[0].revisions[0].argument_diff["bg_color"],
            json!({"from": "#fff", "to": "#000"})
        );
        assert!(loaded.slides[0].revisions[0].content_diff.is_none());
        assert_eq!(loaded.slides[1].outcome, SlideOutcome::ExhaustedFallback);

        let artifacts = loaded.ordered_artifacts();
        assert_eq!(artifacts[0].1, Some(tmp.path().join("html/slide_001.html")));
        assert_eq!(artifacts[1].2, None);
        Ok(())
    }

    #[test]
    fn add_slide_replaces_existing_index() {
        let mut manifest = DeckManifest::new("manifest.json");
        manifest.add_slide(SlideEntry::new(0, "first"));
        manifest.add_slide(SlideEntry::new(0, "replacement"));
        assert_eq!(manifest.slides.len(), 1);
        assert_eq!(
            manifest.slide(0).map(|entry| entry.content.as_str()),
            Some("replacement")
        );
    }

    #[test]
    fn content_changes_carry_a_text_diff() {
        let revision = record_revision(
            3,
            &call("body_focus", json!({"title": "Plan", "body": "Ship in May."})),
            &call("body_gradient", json!({"title": "Plan", "body": "Ship in June."})),
            &["title".to_string(), "body".to_string()],
        );
        assert_eq!(revision.from_name, "body_focus");
        assert_eq!(revision.to_name, "body_gradient");
        let lines = revision.content_diff.unwrap_or_default();
        assert!(lines.iter().any(|line| line == "-Ship in May."));
        assert!(lines.iter().any(|line| line == "+Ship in June."));
        assert!(!revision.argument_diff.contains_key("title"));
    }

    #[test]
    fn load_of_missing_file_is_a_fresh_manifest() {
        let manifest = DeckManifest::load("/nonexistent/manifest.json");
        assert!(manifest.slides.is_empty());
        assert_eq!(manifest.status, "running");
    }
}
