use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use deckloop_contracts::calls::{FunctionCall, CALL_CLOSE, CALL_OPEN};
use deckloop_contracts::models::{
    ModelSelection, ModelSelector, ModelSpec, CALL_CAPABILITY, VISION_CAPABILITY,
};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Map, Value};

use crate::config::DeckConfig;
use crate::prompts::{call_prompt, verdict_prompt, CALL_SYSTEM_PROMPT};
use crate::{map_object, truncate_text};

/// Input for one content-to-call request.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub previous_content: String,
    /// Tagged payload of the previous slide's call, empty for the first slide.
    pub previous_call: String,
    pub current_content: String,
    /// Tools array from `TemplateRegistry::schema`.
    pub tools: Value,
}

/// Input for one image-to-verdict request.
#[derive(Clone, PartialEq)]
pub struct VerdictRequest {
    pub current_png: Vec<u8>,
    pub previous_png: Option<Vec<u8>>,
    pub call_payload: String,
}

impl std::fmt::Debug for VerdictRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerdictRequest")
            .field("current_png_bytes", &self.current_png.len())
            .field(
                "previous_png_bytes",
                &self.previous_png.as_ref().map(Vec::len),
            )
            .field("call_payload", &self.call_payload)
            .finish()
    }
}

pub trait CallModel: Send + Sync {
    fn name(&self) -> &str;
    fn propose(&self, request: &CallRequest) -> Result<String>;
}

pub trait VerdictModel: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, request: &VerdictRequest) -> Result<String>;
}

/// Offline call model: derives a plausible call from the content itself.
pub struct DryrunCallModel {
    name: String,
}

impl DryrunCallModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl CallModel for DryrunCallModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn propose(&self, request: &CallRequest) -> Result<String> {
        let lines: Vec<&str> = request
            .current_content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        let title = lines
            .first()
            .map(|line| truncate_text(line, 80))
            .unwrap_or_else(|| "Untitled".to_string());
        let rest = lines.get(1..).unwrap_or(&[]);

        let call = if request.previous_content.trim().is_empty() {
            FunctionCall::new(
                "split_title",
                map_object(json!({
                    "title": title,
                    "subtitle": rest.first().map(|line| truncate_text(line, 120)).unwrap_or_default(),
                })),
            )
        } else if rest.len() >= 3 {
            let items: Vec<String> = rest.iter().take(5).map(|line| truncate_text(line, 90)).collect();
            FunctionCall::new(
                "body_bullets",
                map_object(json!({
                    "slide_title": title,
                    "intro": "",
                    "items": items,
                })),
            )
        } else {
            let paragraph = if rest.is_empty() {
                title.clone()
            } else {
                truncate_text(&rest.join(" "), 400)
            };
            FunctionCall::new(
                "body_focus",
                map_object(json!({
                    "header_text": title,
                    "paragraph_text": paragraph,
                })),
            )
        };
        Ok(format!("Slide for: {title}\n{}", call.to_payload()))
    }
}

/// Offline evaluator that accepts every slide.
pub struct DryrunVerdictModel {
    name: String,
}

impl DryrunVerdictModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl VerdictModel for DryrunVerdictModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, request: &VerdictRequest) -> Result<String> {
        if request.current_png.is_empty() {
            bail!("dryrun evaluator received an empty image");
        }
        Ok("<!-- accept -->\n<!-- Dryrun evaluation: no issues found. -->".to_string())
    }
}

/// Chat-completions client shared by the two OpenAI-compatible models.
struct ChatEndpoint {
    model: String,
    api_base: String,
    api_key: String,
    max_tokens: u64,
    http: HttpClient,
}

impl ChatEndpoint {
    fn new(spec: &ModelSpec, config: &DeckConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is required for model `{}`", spec.name))?;
        let http = HttpClient::builder()
            .timeout(config.model_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            model: spec.name.clone(),
            api_base: config.openai_api_base.clone(),
            api_key,
            max_tokens: spec.max_output_tokens,
            http,
        })
    }

    fn post(&self, mut payload: Map<String, Value>) -> Result<Value> {
        payload.insert("model".to_string(), Value::String(self.model.clone()));
        payload.insert("max_tokens".to_string(), json!(self.max_tokens));
        let endpoint = format!("{}/chat/completions", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&Value::Object(payload))
            .send()
            .with_context(|| format!("chat request to {endpoint} failed"))?;
        response_json_or_error(&self.model, response)
    }
}

pub struct OpenAiCallModel {
    endpoint: ChatEndpoint,
}

impl OpenAiCallModel {
    pub fn new(spec: &ModelSpec, config: &DeckConfig) -> Result<Self> {
        Ok(Self {
            endpoint: ChatEndpoint::new(spec, config)?,
        })
    }
}

impl CallModel for OpenAiCallModel {
    fn name(&self) -> &str {
        &self.endpoint.model
    }

    fn propose(&self, request: &CallRequest) -> Result<String> {
        let payload = map_object(json!({
            "messages": [
                {"role": "system", "content": CALL_SYSTEM_PROMPT},
                {
                    "role": "user",
                    "content": call_prompt(
                        &request.previous_content,
                        &request.previous_call,
                        &request.current_content,
                    ),
                },
            ],
            "tools": request.tools,
        }));
        let response = self.endpoint.post(payload)?;
        chat_reply_text(&response)
    }
}

pub struct OpenAiVerdictModel {
    endpoint: ChatEndpoint,
}

impl OpenAiVerdictModel {
    pub fn new(spec: &ModelSpec, config: &DeckConfig) -> Result<Self> {
        Ok(Self {
            endpoint: ChatEndpoint::new(spec, config)?,
        })
    }
}

impl VerdictModel for OpenAiVerdictModel {
    fn name(&self) -> &str {
        &self.endpoint.model
    }

    fn evaluate(&self, request: &VerdictRequest) -> Result<String> {
        let mut content = Vec::new();
        if let Some(previous) = &request.previous_png {
            content.push(json!({"type": "text", "text": "Previous slide:"}));
            content.push(json!({
                "type": "image_url",
                "image_url": {"url": png_data_url(previous)},
            }));
            content.push(json!({"type": "text", "text": "Current slide:"}));
        }
        content.push(json!({
            "type": "image_url",
            "image_url": {"url": png_data_url(&request.current_png)},
        }));
        content.push(json!({
            "type": "text",
            "text": verdict_prompt(&request.call_payload, request.previous_png.is_some()),
        }));
        let payload = map_object(json!({
            "messages": [{"role": "user", "content": content}],
        }));
        let response = self.endpoint.post(payload)?;
        chat_reply_text(&response)
    }
}

/// Owns the two model clients for one run. Every request is bounded by the
/// configured deadline; after `shutdown` requests fail immediately.
pub struct InferenceServices {
    call_model: Arc<dyn CallModel>,
    verdict_model: Arc<dyn VerdictModel>,
    timeout: Duration,
    call_selection: Option<ModelSelection>,
    vision_selection: Option<ModelSelection>,
    closed: AtomicBool,
}

impl InferenceServices {
    pub fn new(
        call_model: Arc<dyn CallModel>,
        verdict_model: Arc<dyn VerdictModel>,
        timeout: Duration,
    ) -> Self {
        Self {
            call_model,
            verdict_model,
            timeout,
            call_selection: None,
            vision_selection: None,
            closed: AtomicBool::new(false),
        }
    }

    pub fn dryrun(timeout: Duration) -> Self {
        Self::new(
            Arc::new(DryrunCallModel::new("dryrun-call-1")),
            Arc::new(DryrunVerdictModel::new("dryrun-vision-1")),
            timeout,
        )
    }

    /// Resolves both models through the model registry by capability.
    ///
    /// An explicitly named model is never swapped for another one. Names the
    /// registry does not know are registered as OpenAI-compatible models
    /// when an API key is configured, and rejected otherwise.
    pub fn from_config(config: &DeckConfig) -> Result<Self> {
        let mut selector = ModelSelector::new(None);
        let call_selection =
            select_model(&mut selector, config, config.call_model.as_deref(), CALL_CAPABILITY)?;
        let vision_selection = select_model(
            &mut selector,
            config,
            config.vision_model.as_deref(),
            VISION_CAPABILITY,
        )?;

        let call_model: Arc<dyn CallModel> = if call_selection.model.is_dryrun() {
            Arc::new(DryrunCallModel::new(call_selection.model.name.clone()))
        } else {
            Arc::new(OpenAiCallModel::new(&call_selection.model, config)?)
        };
        let verdict_model: Arc<dyn VerdictModel> = if vision_selection.model.is_dryrun() {
            Arc::new(DryrunVerdictModel::new(vision_selection.model.name.clone()))
        } else {
            Arc::new(OpenAiVerdictModel::new(&vision_selection.model, config)?)
        };

        let mut services = Self::new(call_model, verdict_model, config.model_timeout);
        services.call_selection = Some(call_selection);
        services.vision_selection = Some(vision_selection);
        Ok(services)
    }

    pub fn call_model_name(&self) -> &str {
        self.call_model.name()
    }

    pub fn verdict_model_name(&self) -> &str {
        self.verdict_model.name()
    }

    pub fn call_selection(&self) -> Option<&ModelSelection> {
        self.call_selection.as_ref()
    }

    pub fn vision_selection(&self) -> Option<&ModelSelection> {
        self.vision_selection.as_ref()
    }

    pub fn propose(&self, request: CallRequest) -> Result<String> {
        self.ensure_open()?;
        let model = Arc::clone(&self.call_model);
        with_deadline("call model", self.timeout, move || model.propose(&request))
    }

    pub fn evaluate(&self, request: VerdictRequest) -> Result<String> {
        self.ensure_open()?;
        let model = Arc::clone(&self.verdict_model);
        with_deadline("verdict model", self.timeout, move || model.evaluate(&request))
    }

    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_shut_down() {
            bail!("inference services have been shut down");
        }
        Ok(())
    }
}

fn select_model(
    selector: &mut ModelSelector,
    config: &DeckConfig,
    requested: Option<&str>,
    capability: &str,
) -> Result<ModelSelection> {
    let selection = selector.select(requested, capability)?;
    let Some(requested) = requested.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(selection);
    };
    if selection.model.name.eq_ignore_ascii_case(requested) {
        return Ok(selection);
    }

    let known = selector.registry.get(requested).cloned();
    if known.as_ref().is_some_and(ModelSpec::is_dryrun) {
        bail!("model '{requested}' does not support the '{capability}' capability");
    }
    if config.openai_api_key.is_none() {
        bail!(
            "model '{requested}' is not available for '{capability}'; set OPENAI_API_KEY to use it through {}",
            config.openai_api_base
        );
    }
    let mut spec = known.unwrap_or_else(|| ModelSpec {
        name: requested.to_string(),
        provider: "openai".to_string(),
        capabilities: Vec::new(),
        context_window: None,
        max_output_tokens: 512,
    });
    spec.capabilities.push(capability.to_string());
    selector.registry.register(spec);
    Ok(selector.select(Some(requested), capability)?)
}

/// Runs `job` on a worker thread and waits at most `timeout` for it.
/// A job that overruns is abandoned; its result is discarded when it ends.
pub fn with_deadline<T, F>(label: &str, timeout: Duration, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name(format!("deckloop-{}", label.replace(' ', "-")))
        .spawn(move || {
            let _ = sender.send(job());
        })
        .with_context(|| format!("failed to spawn {label} worker"))?;
    match receiver.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            bail!("{label} timed out after {:.1}s", timeout.as_secs_f64())
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            bail!("{label} worker exited without a result")
        }
    }
}

/// Text of the first choice. Structured `tool_calls` are written back in the
/// tagged payload form, arguments left as the JSON string the API returned.
pub fn chat_reply_text(response: &Value) -> Result<String> {
    let message = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| anyhow!("chat response has no choices"))?;

    let mut parts = Vec::new();
    if let Some(content) = message.get("content").and_then(Value::as_str) {
        if !content.trim().is_empty() {
            parts.push(content.trim().to_string());
        }
    }
    if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            let Some(function) = tool_call.get("function") else {
                continue;
            };
            let payload = json!({
                "name": function.get("name").cloned().unwrap_or(Value::Null),
                "arguments": function.get("arguments").cloned().unwrap_or(Value::Null),
            });
            parts.push(format!("{CALL_OPEN}\n{payload}\n{CALL_CLOSE}"));
        }
    }
    if parts.is_empty() {
        bail!("chat response has neither content nor tool calls");
    }
    Ok(parts.join("\n"))
}

pub fn png_data_url(bytes: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(bytes))
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}
