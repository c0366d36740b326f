//! Per-slide refinement: generate a call, render it, ask for a verdict and
//! either commit, revise or retry until the attempt budget runs out.

use std::path::Path;

use anyhow::{Context, Result};
use deckloop_contracts::calls::{parse_call, CallDiagnostic, FunctionCall, ParsedCall};
use deckloop_contracts::continuity::ContinuityContext;
use deckloop_contracts::events::EventWriter;
use deckloop_contracts::runs::attempts::{write_receipt, AttemptReceipt};
use deckloop_contracts::runs::manifest::{record_revision, RevisionEntry};
use deckloop_contracts::runs::verdict_log::{VerdictLog, VerdictRecord};
use deckloop_contracts::slides::{slide_file_stem, RenderedSlide, SlideContentUnit, SlideOutcome};
use deckloop_contracts::templates::{
    is_invalid_html, TemplateError, TemplateRegistry, INVALID_SLIDE_HTML,
};
use deckloop_contracts::verdicts::{parse_verdict, Decision};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::DeckConfig;
use crate::models::{CallRequest, InferenceServices, VerdictRequest};
use crate::pipeline::CancelToken;
use crate::renderer::{placeholder_bitmap, SlideRenderer};
use crate::{error_chain_text, map_object, truncate_text};

const MAX_EVENT_TEXT: usize = 400;

/// What happened in one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    /// The model text held no usable call.
    InvalidCall,
    /// The registry refused the call.
    Rejected(TemplateError),
    /// The call rendered to the known-invalid document.
    InvalidHtml,
    CaptureFailed(String),
    /// Rendered, but no usable verdict came back.
    VerdictFailed { rendered: RenderedSlide, reason: String },
    Accepted(RenderedSlide),
    Denied {
        rendered: RenderedSlide,
        revised: Option<FunctionCall>,
    },
}

impl AttemptResult {
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptResult::InvalidCall => "invalid_call",
            AttemptResult::Rejected(_) => "rejected",
            AttemptResult::InvalidHtml => "invalid_html",
            AttemptResult::CaptureFailed(_) => "capture_failed",
            AttemptResult::VerdictFailed { .. } => "verdict_failed",
            AttemptResult::Accepted(_) => "accepted",
            AttemptResult::Denied { .. } => "denied",
        }
    }

    /// Failure text for attempts that did not move the slide forward.
    pub fn failure(&self) -> Option<String> {
        match self {
            AttemptResult::InvalidCall => Some("model output contained no usable call".to_string()),
            AttemptResult::Rejected(err) => Some(err.to_string()),
            AttemptResult::InvalidHtml => Some("call rendered the invalid-slide document".to_string()),
            AttemptResult::CaptureFailed(reason) => Some(reason.clone()),
            AttemptResult::VerdictFailed { reason, .. } => Some(reason.clone()),
            AttemptResult::Denied { revised: None, .. } => {
                Some("slide denied without a revised call".to_string())
            }
            AttemptResult::Accepted(_) | AttemptResult::Denied { .. } => None,
        }
    }
}

/// One attempt: the call that was tried (if any) and its result.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub call: Option<FunctionCall>,
    pub result: AttemptResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlideAttemptState {
    pub attempts_used: u32,
    pub max_attempts: u32,
    /// Call for the next attempt; `None` means a fresh one is generated.
    pub current_call: Option<FunctionCall>,
    /// Most recent call that rendered and captured.
    pub last_good_call: Option<FunctionCall>,
    pub last_rendered: Option<RenderedSlide>,
    pub outcome: SlideOutcome,
}

impl SlideAttemptState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts_used: 0,
            max_attempts: max_attempts.max(1),
            current_call: None,
            last_good_call: None,
            last_rendered: None,
            outcome: SlideOutcome::Pending,
        }
    }

    pub fn next_attempt(&self) -> u32 {
        self.attempts_used + 1
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }

    /// Folds one attempt into the state. Terminal states are left as they are.
    pub fn transition(mut self, record: AttemptRecord) -> Self {
        if self.is_terminal() {
            return self;
        }
        self.attempts_used += 1;
        let AttemptRecord { call, result } = record;
        match result {
            AttemptResult::InvalidCall => self.current_call = None,
            // Re-rendering the same call would fail the same way.
            AttemptResult::Rejected(_) | AttemptResult::InvalidHtml => {
                self.current_call = self.last_good_call.clone();
            }
            AttemptResult::CaptureFailed(_) => self.current_call = call,
            AttemptResult::VerdictFailed { rendered, .. } => {
                self.last_good_call = call.clone();
                self.current_call = call;
                self.last_rendered = Some(rendered);
            }
            AttemptResult::Accepted(rendered) => {
                self.last_good_call = call.clone();
                self.current_call = call;
                self.last_rendered = Some(rendered);
                self.outcome = SlideOutcome::Accepted;
            }
            AttemptResult::Denied { rendered, revised } => {
                self.last_good_call = call.clone();
                self.current_call = revised.or(call);
                self.last_rendered = Some(rendered);
            }
        }
        if !self.is_terminal() && self.attempts_used >= self.max_attempts {
            self.outcome = SlideOutcome::ExhaustedFallback;
        }
        self
    }

    /// Ends the slide early without spending an attempt.
    pub fn abandon(mut self) -> Self {
        if !self.is_terminal() {
            self.outcome = SlideOutcome::ExhaustedFallback;
        }
        self
    }
}

/// Why the attempt loop stopped.
#[derive(Debug)]
pub enum SlideStop {
    Completed,
    Cancelled,
    /// The renderer died and could not be restarted.
    RendererLost(anyhow::Error),
}

#[derive(Debug)]
pub struct SlideResult {
    pub outcome: SlideOutcome,
    pub attempts_used: u32,
    /// Call behind `rendered`; the error-template call for placeholders.
    pub final_call: Option<FunctionCall>,
    pub placeholder: bool,
    pub rendered: RenderedSlide,
    pub revisions: Vec<RevisionEntry>,
    pub stop: SlideStop,
}

enum Step {
    Done(AttemptRecord),
    RendererLost {
        record: AttemptRecord,
        error: anyhow::Error,
    },
}

/// Borrowed collaborators for refining slides of one run.
pub struct SlideRefiner<'a> {
    pub registry: &'a TemplateRegistry,
    pub services: &'a InferenceServices,
    pub renderer: &'a mut dyn SlideRenderer,
    pub events: &'a EventWriter,
    pub verdicts: &'a VerdictLog,
    pub attempts_dir: &'a Path,
    pub config: &'a DeckConfig,
    pub cancel: &'a CancelToken,
}

impl SlideRefiner<'_> {
    /// Runs attempts for `unit` until it is accepted, the budget is spent,
    /// the run is cancelled or the renderer is lost. Always yields a slide.
    /// Errors are limited to failures writing run records.
    pub fn refine(
        &mut self,
        unit: &SlideContentUnit,
        context: &ContinuityContext,
    ) -> Result<SlideResult> {
        let mut state = SlideAttemptState::new(self.config.max_attempts);
        let mut revisions = Vec::new();
        let mut last_failure: Option<String> = None;
        let mut stop = SlideStop::Completed;
        let slide_dir = self.attempts_dir.join(slide_file_stem(unit.index));

        self.events.emit(
            "slide_started",
            map_object(json!({
                "slide": unit.index,
                "chars": unit.text.chars().count(),
                "max_attempts": state.max_attempts,
            })),
        )?;

        while !state.is_terminal() {
            if self.cancel.is_cancelled() {
                stop = SlideStop::Cancelled;
                break;
            }
            let attempt = state.next_attempt();
            let mut receipt = AttemptReceipt::new(unit.index, attempt);
            let step = self.attempt(
                unit,
                context,
                &state,
                attempt,
                &slide_dir,
                &mut receipt,
                &mut revisions,
            )?;
            let (record, lost) = match step {
                Step::Done(record) => (record, None),
                Step::RendererLost { record, error } => (record, Some(error)),
            };

            receipt.call = record.call.clone();
            receipt
                .metadata
                .insert("result".to_string(), json!(record.result.kind()));
            if let Some(failure) = record.result.failure() {
                self.events.emit(
                    "attempt_failed",
                    map_object(json!({
                        "slide": unit.index,
                        "attempt": attempt,
                        "reason": record.result.kind(),
                        "error": truncate_text(&failure, MAX_EVENT_TEXT),
                    })),
                )?;
                receipt.failure = Some(failure.clone());
                last_failure = Some(failure);
            }
            let receipt_path = slide_dir.join(format!("attempt_{attempt}.json"));
            receipt.artifacts.receipt_path = Some(receipt_path.clone());
            write_receipt(&receipt_path, &receipt)?;

            state = state.transition(record);
            if let Some(error) = lost {
                stop = SlideStop::RendererLost(error);
                break;
            }
        }

        let state = state.abandon();
        let renderer_lost = matches!(stop, SlideStop::RendererLost(_));
        let (rendered, final_call, placeholder) = match state.last_rendered {
            Some(rendered) => (rendered, state.last_good_call, false),
            None => {
                let (rendered, call) =
                    self.placeholder(unit, last_failure.as_deref(), renderer_lost)?;
                (rendered, Some(call), true)
            }
        };
        Ok(SlideResult {
            outcome: state.outcome,
            attempts_used: state.attempts_used,
            final_call,
            placeholder,
            rendered,
            revisions,
            stop,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn attempt(
        &mut self,
        unit: &SlideContentUnit,
        context: &ContinuityContext,
        state: &SlideAttemptState,
        attempt: u32,
        slide_dir: &Path,
        receipt: &mut AttemptReceipt,
        revisions: &mut Vec<RevisionEntry>,
    ) -> Result<Step> {
        let call = match state.current_call.clone() {
            Some(call) => call,
            None => match self.generate_call(unit, context, attempt, receipt)? {
                Some(call) => call,
                None => {
                    return Ok(Step::Done(AttemptRecord {
                        call: None,
                        result: AttemptResult::InvalidCall,
                    }))
                }
            },
        };

        let html = match self.registry.render_call(&call) {
            Ok(html) => html,
            Err(err) => return Ok(done(call, AttemptResult::Rejected(err))),
        };
        if is_invalid_html(&html) {
            return Ok(done(call, AttemptResult::InvalidHtml));
        }
        let html_path = slide_dir.join(format!("attempt_{attempt}.html"));
        write_file(&html_path, html.as_bytes())?;
        receipt.artifacts.html_path = Some(html_path);
        receipt.metadata.insert(
            "html_sha256".to_string(),
            Value::String(hex::encode(Sha256::digest(html.as_bytes()))),
        );

        let bitmap = match self.renderer.capture(&html) {
            Ok(bitmap) => bitmap,
            Err(err) => {
                let record = AttemptRecord {
                    call: Some(call),
                    result: AttemptResult::CaptureFailed(error_chain_text(&err, MAX_EVENT_TEXT)),
                };
                if self.renderer.is_alive() {
                    return Ok(Step::Done(record));
                }
                let renderer = self.renderer.name().to_string();
                return match self.renderer.restart() {
                    Ok(()) => {
                        self.events.emit(
                            "renderer_restarted",
                            map_object(json!({
                                "slide": unit.index,
                                "attempt": attempt,
                                "renderer": renderer,
                            })),
                        )?;
                        Ok(Step::Done(record))
                    }
                    Err(error) => Ok(Step::RendererLost {
                        record,
                        error: error.context(format!("{renderer} renderer could not be restarted")),
                    }),
                };
            }
        };
        let png_path = slide_dir.join(format!("attempt_{attempt}.png"));
        write_file(&png_path, &bitmap.png)?;
        receipt.artifacts.png_path = Some(png_path);
        self.events.emit(
            "slide_rendered",
            map_object(json!({
                "slide": unit.index,
                "attempt": attempt,
                "template": call.name,
                "width": bitmap.width,
                "height": bitmap.height,
                "png_bytes": bitmap.png.len(),
            })),
        )?;
        let rendered = RenderedSlide { html, bitmap };

        let request = VerdictRequest {
            current_png: rendered.bitmap.png.clone(),
            previous_png: context
                .previous_rendered
                .as_ref()
                .map(|previous| previous.bitmap.png.clone()),
            call_payload: call.to_payload(),
        };
        let reply = match self.services.evaluate(request) {
            Ok(reply) => reply,
            Err(err) => {
                let reason = format!(
                    "verdict model unavailable: {}",
                    error_chain_text(&err, MAX_EVENT_TEXT)
                );
                return Ok(done(call, AttemptResult::VerdictFailed { rendered, reason }));
            }
        };
        receipt
            .metadata
            .insert("verdict_output".to_string(), Value::String(reply.clone()));
        let verdict = match parse_verdict(&reply) {
            Ok(verdict) => verdict,
            Err(err) => {
                let reason = err.to_string();
                return Ok(done(call, AttemptResult::VerdictFailed { rendered, reason }));
            }
        };
        self.verdicts.record(unit.index, attempt, &verdict)?;
        self.emit_diagnostics(unit.index, attempt, &verdict.diagnostics)?;
        self.events.emit(
            "verdict_received",
            map_object(json!({
                "slide": unit.index,
                "attempt": attempt,
                "decision": verdict.decision.as_str(),
                "reason": truncate_text(&verdict.rationale, MAX_EVENT_TEXT),
                "revised": verdict.revised_call.is_some(),
                "dropped_payload": verdict.dropped_payload,
            })),
        )?;
        receipt.verdict = Some(VerdictRecord::from(&verdict));

        let result = match verdict.decision {
            Decision::Accept => AttemptResult::Accepted(rendered),
            Decision::Deny => {
                let revised = match verdict.revised_call {
                    Some(revised) => self.apply_revision(unit.index, attempt, &call, revised, revisions)?,
                    None => None,
                };
                AttemptResult::Denied { rendered, revised }
            }
        };
        Ok(done(call, result))
    }

    fn generate_call(
        &mut self,
        unit: &SlideContentUnit,
        context: &ContinuityContext,
        attempt: u32,
        receipt: &mut AttemptReceipt,
    ) -> Result<Option<FunctionCall>> {
        self.events.emit(
            "call_requested",
            map_object(json!({
                "slide": unit.index,
                "attempt": attempt,
                "model": self.services.call_model_name(),
            })),
        )?;
        let request = CallRequest {
            previous_content: context.previous_content_text().to_string(),
            previous_call: context.previous_call_text(),
            current_content: unit.text.clone(),
            tools: self.registry.schema(),
        };
        let text = match self.services.propose(request) {
            Ok(text) => text,
            Err(err) => {
                let fallback = self.registry.error_call(
                    "Slide content unavailable",
                    "The content model did not respond.",
                );
                self.events.emit(
                    "call_fallback",
                    map_object(json!({
                        "slide": unit.index,
                        "attempt": attempt,
                        "template": fallback.name,
                        "error": error_chain_text(&err, MAX_EVENT_TEXT),
                    })),
                )?;
                fallback.to_payload()
            }
        };
        receipt.model_output = Some(text.clone());

        let parsed = parse_call(&text);
        self.emit_diagnostics(unit.index, attempt, &parsed.diagnostics)?;
        match parsed.outcome {
            ParsedCall::Call(call) => {
                self.events.emit(
                    "call_parsed",
                    map_object(json!({
                        "slide": unit.index,
                        "attempt": attempt,
                        "template": call.name,
                        "ignored_payloads": parsed.ignored_payloads,
                        "preamble": truncate_text(&parsed.preamble, MAX_EVENT_TEXT),
                    })),
                )?;
                Ok(Some(call))
            }
            ParsedCall::NoCall(_) => Ok(None),
        }
    }

    /// Applies the revision policy and returns the call for the next attempt.
    fn apply_revision(
        &self,
        slide: usize,
        attempt: u32,
        current: &FunctionCall,
        revised: FunctionCall,
        revisions: &mut Vec<RevisionEntry>,
    ) -> Result<Option<FunctionCall>> {
        let content_keys = self.content_keys(&[current.name.as_str(), revised.name.as_str()]);
        let proposed = record_revision(attempt, current, &revised, &content_keys);
        if let Some(diff) = &proposed.content_diff {
            self.events.emit(
                "revision_content_changed",
                map_object(json!({
                    "slide": slide,
                    "attempt": attempt,
                    "from": current.name,
                    "to": revised.name,
                    "diff": diff,
                })),
            )?;
        }

        let revised = if self.config.preserve_content {
            if revised.name != current.name {
                self.events.emit(
                    "revision_applied",
                    map_object(json!({
                        "slide": slide,
                        "attempt": attempt,
                        "applied": false,
                        "from": current.name,
                        "to": revised.name,
                        "reason": "template change rejected",
                    })),
                )?;
                return Ok(None);
            }
            keep_content_arguments(current, revised, &content_keys)
        } else {
            revised
        };

        let entry = record_revision(attempt, current, &revised, &content_keys);
        self.events.emit(
            "revision_applied",
            map_object(json!({
                "slide": slide,
                "attempt": attempt,
                "applied": true,
                "from": current.name,
                "to": revised.name,
                "changed": entry.argument_diff.keys().cloned().collect::<Vec<String>>(),
            })),
        )?;
        revisions.push(entry);
        Ok(Some(revised))
    }

    fn content_keys(&self, names: &[&str]) -> Vec<String> {
        let mut keys: Vec<String> = names
            .iter()
            .filter_map(|name| self.registry.resolve(name).ok())
            .flat_map(|spec| spec.content_parameters().map(|param| param.name.clone()))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    fn emit_diagnostics(
        &self,
        slide: usize,
        attempt: u32,
        diagnostics: &[CallDiagnostic],
    ) -> Result<()> {
        for diagnostic in diagnostics {
            self.events.emit(
                "call_payload_skipped",
                map_object(json!({
                    "slide": slide,
                    "attempt": attempt,
                    "reason": diagnostic.reason,
                    "payload": truncate_text(&diagnostic.payload, MAX_EVENT_TEXT),
                })),
            )?;
        }
        Ok(())
    }

    /// Visible error slide for a unit that never rendered.
    fn placeholder(
        &mut self,
        unit: &SlideContentUnit,
        reason: Option<&str>,
        renderer_lost: bool,
    ) -> Result<(RenderedSlide, FunctionCall)> {
        let detail = reason
            .map(|reason| truncate_text(reason, 160))
            .unwrap_or_else(|| "No attempt produced a usable slide.".to_string());
        let call = self.registry.error_call(
            &format!("Slide {} could not be generated", unit.index + 1),
            &detail,
        );
        let html = self
            .registry
            .render_call(&call)
            .unwrap_or_else(|_| INVALID_SLIDE_HTML.to_string());
        let captured = if renderer_lost {
            None
        } else {
            self.renderer.capture(&html).ok()
        };
        let bitmap = match captured {
            Some(bitmap) => bitmap,
            None => placeholder_bitmap(self.config.capture_width, self.config.capture_height)?,
        };
        Ok((RenderedSlide { html, bitmap }, call))
    }
}

fn done(call: FunctionCall, result: AttemptResult) -> Step {
    Step::Done(AttemptRecord {
        call: Some(call),
        result,
    })
}

/// `revised` with every content argument put back to its value in `current`.
fn keep_content_arguments(
    current: &FunctionCall,
    mut revised: FunctionCall,
    content_keys: &[String],
) -> FunctionCall {
    for key in content_keys {
        match current.arguments.get(key) {
            Some(value) => {
                revised.arguments.insert(key.clone(), value.clone());
            }
            None => {
                revised.arguments.remove(key);
            }
        }
    }
    revised
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}
