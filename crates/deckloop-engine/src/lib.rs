pub mod archive;
pub mod config;
pub mod documents;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod refine;
pub mod renderer;
#[cfg(test)]
mod test_support;

pub use config::DeckConfig;
pub use models::{CallModel, CallRequest, InferenceServices, VerdictModel, VerdictRequest};
pub use pipeline::{CancelToken, CommittedSlide, DeckEngine, DeckOutput, RunError};
pub use renderer::{ChromeRenderer, DryrunRenderer, SlideRenderer};

use serde_json::{Map, Value};

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing: &String| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}
