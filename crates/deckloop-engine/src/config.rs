use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use deckloop_contracts::content::ChunkingConfig;
use deckloop_contracts::slides::{CANONICAL_HEIGHT, CANONICAL_WIDTH};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const MAX_ATTEMPTS_LIMIT: u32 = 50;
const DEFAULT_MODEL_TIMEOUT_S: f64 = 120.0;
const DEFAULT_RENDER_TIMEOUT_S: f64 = 30.0;
/// Upper bound for any configured timeout (one day).
const MAX_TIMEOUT_S: f64 = 86_400.0;

/// Settings for one deck run. Defaults first, then `DECKLOOP_*` / `OPENAI_*`
/// environment variables, then whatever the caller overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct DeckConfig {
    pub max_attempts: u32,
    pub model_timeout: Duration,
    pub render_timeout: Duration,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub capture_width: u32,
    pub capture_height: u32,
    pub chunking: ChunkingConfig,
    /// Reject template changes and revert content edits in revisions.
    pub preserve_content: bool,
    pub chrome_path: Option<PathBuf>,
    pub chrome_args: Vec<String>,
    pub call_model: Option<String>,
    pub vision_model: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    pub echo_events: bool,
    /// Event stream location; `events.jsonl` in the run dir when unset.
    pub events_path: Option<PathBuf>,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            model_timeout: Duration::from_secs_f64(DEFAULT_MODEL_TIMEOUT_S),
            render_timeout: Duration::from_secs_f64(DEFAULT_RENDER_TIMEOUT_S),
            viewport_width: 1920,
            viewport_height: 1080,
            capture_width: CANONICAL_WIDTH,
            capture_height: CANONICAL_HEIGHT,
            chunking: ChunkingConfig::default(),
            preserve_content: false,
            chrome_path: None,
            chrome_args: Vec::new(),
            call_model: None,
            vision_model: None,
            openai_api_key: None,
            openai_api_base: "https://api.openai.com/v1".to_string(),
            echo_events: false,
            events_path: None,
        }
    }
}

impl DeckConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Applies overrides from `lookup`; blank values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let first = |keys: &[&str]| -> Option<String> {
            keys.iter().find_map(|key| {
                lookup(key)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
        };

        if let Some(raw) = first(&["DECKLOOP_MAX_ATTEMPTS"]) {
            let value = raw
                .parse::<u32>()
                .with_context(|| format!("DECKLOOP_MAX_ATTEMPTS must be a positive integer, got `{raw}`"))?;
            self.max_attempts = value.clamp(1, MAX_ATTEMPTS_LIMIT);
        }
        if let Some(raw) = first(&["DECKLOOP_MODEL_TIMEOUT_S"]) {
            self.model_timeout = parse_seconds("DECKLOOP_MODEL_TIMEOUT_S", &raw)?;
        }
        if let Some(raw) = first(&["DECKLOOP_RENDER_TIMEOUT_S"]) {
            self.render_timeout = parse_seconds("DECKLOOP_RENDER_TIMEOUT_S", &raw)?;
        }
        if let Some(raw) = first(&["DECKLOOP_CHROME", "CHROME_PATH"]) {
            self.chrome_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = first(&["DECKLOOP_CHROME_ARGS"]) {
            self.chrome_args = shell_words::split(&raw)
                .with_context(|| format!("DECKLOOP_CHROME_ARGS is not valid shell syntax: `{raw}`"))?;
        }
        if let Some(raw) = first(&["DECKLOOP_CALL_MODEL"]) {
            self.call_model = Some(raw);
        }
        if let Some(raw) = first(&["DECKLOOP_VISION_MODEL"]) {
            self.vision_model = Some(raw);
        }
        if let Some(raw) = first(&["OPENAI_API_KEY", "OPENAI_API_KEY_BACKUP"]) {
            self.openai_api_key = Some(raw);
        }
        if let Some(raw) = first(&["OPENAI_API_BASE", "OPENAI_BASE_URL"]) {
            self.openai_api_base = normalize_api_base(&raw);
        }
        Ok(())
    }

    pub fn set_max_attempts(&mut self, value: u32) {
        self.max_attempts = value.clamp(1, MAX_ATTEMPTS_LIMIT);
    }
}

/// Trims trailing slashes and appends `/v1` when the base has no path.
pub fn normalize_api_base(raw: &str) -> String {
    let mut base = raw.trim().trim_end_matches('/').to_string();
    if let Ok(parsed) = reqwest::Url::parse(&base) {
        if parsed.path().trim().is_empty() || parsed.path() == "/" {
            base = format!("{base}/v1");
        }
    }
    base.trim_end_matches('/').to_string()
}

pub fn parse_seconds(label: &str, raw: &str) -> Result<Duration> {
    let value = raw
        .trim()
        .parse::<f64>()
        .with_context(|| format!("{label} must be a number of seconds, got `{raw}`"))?;
    if !value.is_finite() || value <= 0.0 {
        anyhow::bail!("{label} must be greater than zero, got `{raw}`");
    }
    if value > MAX_TIMEOUT_S {
        anyhow::bail!("{label} must be at most {MAX_TIMEOUT_S} seconds, got `{raw}`");
    }
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("{label} is not a representable duration: `{raw}`"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use super::{normalize_api_base, parse_seconds, DeckConfig};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_capture_contract() {
        let config = DeckConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!((config.viewport_width, config.viewport_height), (1920, 1080));
        assert_eq!((config.capture_width, config.capture_height), (900, 500));
        assert_eq!(config.model_timeout, Duration::from_secs(120));
        assert!(!config.preserve_content);
    }

    #[test]
    fn environment_overrides_apply() -> anyhow::Result<()> {
        let mut config = DeckConfig::default();
        config.apply_env(lookup(&[
            ("DECKLOOP_MAX_ATTEMPTS", "3"),
            ("DECKLOOP_RENDER_TIMEOUT_S", "2.5"),
            ("CHROME_PATH", "/opt/chrome/chrome"),
            ("DECKLOOP_CHROME_ARGS", "--no-sandbox '--lang=en US'"),
            ("DECKLOOP_CALL_MODEL", "  "),
            ("OPENAI_BASE_URL", "http://localhost:8000/"),
        ]))?;
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.render_timeout, Duration::from_millis(2500));
        assert_eq!(config.chrome_path, Some(PathBuf::from("/opt/chrome/chrome")));
        assert_eq!(config.chrome_args, vec!["--no-sandbox", "--lang=en US"]);
        assert_eq!(config.call_model, None);
        assert_eq!(config.openai_api_base, "http://localhost:8000/v1");
        Ok(())
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut config = DeckConfig::default();
        let err = config
            .apply_env(lookup(&[("DECKLOOP_MODEL_TIMEOUT_S", "-1")]))
            .unwrap_err();
        assert!(err.to_string().contains("greater than zero"));

        let err = config
            .apply_env(lookup(&[("DECKLOOP_MAX_ATTEMPTS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("DECKLOOP_MAX_ATTEMPTS"));
    }

    #[test]
    fn oversized_timeouts_are_errors_not_panics() {
        let err = parse_seconds("--model-timeout-s", "1e30").unwrap_err();
        assert!(err.to_string().contains("at most"));

        let mut config = DeckConfig::default();
        let err = config
            .apply_env(lookup(&[("DECKLOOP_RENDER_TIMEOUT_S", "1e30")]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("DECKLOOP_RENDER_TIMEOUT_S"));

        let day = parse_seconds("--render-timeout-s", "86400");
        assert_eq!(day.ok(), Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn api_base_keeps_explicit_paths() {
        assert_eq!(normalize_api_base("https://example.com/api/v2/"), "https://example.com/api/v2");
        assert_eq!(normalize_api_base("https://example.com"), "https://example.com/v1");
    }
}
