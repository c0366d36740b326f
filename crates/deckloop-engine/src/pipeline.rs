use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use deckloop_contracts::calls::FunctionCall;
use deckloop_contracts::continuity::ContinuityTracker;
use deckloop_contracts::events::EventWriter;
use deckloop_contracts::runs::manifest::{DeckManifest, RevisionEntry, SlideEntry};
use deckloop_contracts::runs::summary::{write_summary, DeckSummary};
use deckloop_contracts::runs::verdict_log::VerdictLog;
use deckloop_contracts::slides::{slide_file_stem, RenderedSlide, SlideContentUnit, SlideOutcome};
use deckloop_contracts::templates::{TemplateRegistry, INVALID_SLIDE_HTML};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::DeckConfig;
use crate::models::InferenceServices;
use crate::refine::{SlideRefiner, SlideResult, SlideStop};
use crate::renderer::{placeholder_bitmap, SlideRenderer};
use crate::{error_chain_text, map_object, now_utc_iso};

/// Shared flag checked between attempts; a cancelled run stops at the next
/// attempt boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("run cancelled after {committed} of {total} slides")]
    Cancelled { committed: usize, total: usize },
    #[error("renderer lost at slide {slide}: {reason}")]
    RendererFatal { slide: usize, reason: String },
}

/// Final record for one content unit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedSlide {
    pub index: usize,
    pub outcome: SlideOutcome,
    pub attempts_used: u32,
    pub call: Option<FunctionCall>,
    /// The error slide stands in for a unit that never rendered; its call
    /// is not carried to the next slide.
    pub placeholder: bool,
    pub rendered: RenderedSlide,
    pub html_path: PathBuf,
    pub png_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DeckOutput {
    pub deck_id: String,
    pub run_dir: PathBuf,
    pub manifest_path: PathBuf,
    /// One entry per content unit, in input order.
    pub slides: Vec<CommittedSlide>,
    pub summary: DeckSummary,
}

/// Drives one document through the refinement loop.
///
/// Owns the renderer and the model handle for the run; both are released
/// on every exit path of [`DeckEngine::run`].
pub struct DeckEngine {
    run_dir: PathBuf,
    config: DeckConfig,
    registry: TemplateRegistry,
    services: InferenceServices,
    renderer: Box<dyn SlideRenderer>,
    events: EventWriter,
    verdicts: VerdictLog,
    manifest: DeckManifest,
    tracker: ContinuityTracker,
    cancel: CancelToken,
    committed: Vec<CommittedSlide>,
    started_at: String,
}

impl DeckEngine {
    pub fn new(
        run_dir: impl Into<PathBuf>,
        config: DeckConfig,
        services: InferenceServices,
        renderer: Box<dyn SlideRenderer>,
    ) -> Result<Self> {
        let run_dir = run_dir.into();
        std::fs::create_dir_all(&run_dir)
            .with_context(|| format!("failed to create run dir {}", run_dir.display()))?;
        let registry = TemplateRegistry::builtin().context("builtin template library is invalid")?;
        let manifest = DeckManifest::new(run_dir.join("manifest.json"));
        let deck_id = manifest.deck_id.clone();
        let events_path = config
            .events_path
            .clone()
            .unwrap_or_else(|| run_dir.join("events.jsonl"));
        let events = EventWriter::with_echo(events_path, deck_id.clone(), config.echo_events);
        let verdicts = VerdictLog::new(run_dir.join("verdicts.jsonl"), deck_id);

        let mut started = map_object(json!({
            "run_dir": run_dir.to_string_lossy(),
            "renderer": renderer.name(),
            "call_model": services.call_model_name(),
            "vision_model": services.verdict_model_name(),
            "max_attempts": config.max_attempts,
            "preserve_content": config.preserve_content,
        }));
        for (key, selection) in [
            ("call_model_fallback", services.call_selection()),
            ("vision_model_fallback", services.vision_selection()),
        ] {
            if let Some(reason) = selection.and_then(|selection| selection.fallback_reason.clone()) {
                started.insert(key.to_string(), Value::String(reason));
            }
        }
        events.emit("run_started", started)?;

        Ok(Self {
            run_dir,
            config,
            registry,
            services,
            renderer,
            events,
            verdicts,
            manifest,
            tracker: ContinuityTracker::new(),
            cancel: CancelToken::new(),
            committed: Vec::new(),
            started_at: now_utc_iso(),
        })
    }

    pub fn deck_id(&self) -> &str {
        &self.manifest.deck_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Handle for cancelling the run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Records where the content came from in the manifest.
    pub fn set_source(&mut self, source: impl Into<String>) {
        self.manifest.source = Some(source.into());
    }

    /// Refines every unit in order and commits exactly one slide per unit.
    ///
    /// Cancellation and a renderer that cannot be restarted stop the loop;
    /// the remaining units are committed as error slides, the run records
    /// are marked and the matching [`RunError`] is returned.
    pub fn run(mut self, units: Vec<SlideContentUnit>) -> Result<DeckOutput> {
        let total = units.len();
        self.events.emit(
            "units_loaded",
            map_object(json!({
                "count": total,
                "chars": units.iter().map(|unit| unit.text.chars().count()).sum::<usize>(),
            })),
        )?;

        let mut failure: Option<RunError> = None;
        for unit in &units {
            if let Some(reason) = &failure {
                let reason = reason.to_string();
                let slide = self.placeholder_slide(unit, &reason)?;
                self.commit(unit, slide, Vec::new())?;
                continue;
            }

            let result = self.refine_unit(unit)?;
            let stop = match &result.stop {
                SlideStop::Completed => None,
                SlideStop::Cancelled => Some(RunError::Cancelled {
                    committed: unit.index,
                    total,
                }),
                SlideStop::RendererLost(err) => Some(RunError::RendererFatal {
                    slide: unit.index,
                    reason: error_chain_text(err, 400),
                }),
            };
            let revisions = result.revisions.clone();
            let committed = CommittedSlide {
                index: unit.index,
                outcome: result.outcome,
                attempts_used: result.attempts_used,
                call: result.final_call.clone(),
                placeholder: result.placeholder,
                rendered: result.rendered,
                html_path: PathBuf::new(),
                png_path: PathBuf::new(),
            };
            self.commit(unit, committed, revisions)?;
            failure = stop;
        }

        match failure {
            None => self.finish("completed", None),
            Some(err) => {
                let (event, status) = match &err {
                    RunError::Cancelled { .. } => ("run_cancelled", "cancelled"),
                    RunError::RendererFatal { .. } => ("run_failed", "failed"),
                };
                self.events.emit(
                    event,
                    map_object(json!({
                        "error": err.to_string(),
                        "slides": self.committed.len(),
                    })),
                )?;
                self.finish(status, Some(err.to_string()))?;
                Err(err.into())
            }
        }
    }

    fn refine_unit(&mut self, unit: &SlideContentUnit) -> Result<SlideResult> {
        let attempts_dir = self.run_dir.join("attempts");
        let context = self.tracker.current().clone();
        let mut refiner = SlideRefiner {
            registry: &self.registry,
            services: &self.services,
            renderer: self.renderer.as_mut(),
            events: &self.events,
            verdicts: &self.verdicts,
            attempts_dir: &attempts_dir,
            config: &self.config,
            cancel: &self.cancel,
        };
        refiner.refine(unit, &context)
    }

    /// Error slide for a unit that is never attempted. The renderer is not
    /// touched.
    fn placeholder_slide(&self, unit: &SlideContentUnit, reason: &str) -> Result<CommittedSlide> {
        let call = self.registry.error_call(
            &format!("Slide {} was not generated", unit.index + 1),
            reason,
        );
        let html = self
            .registry
            .render_call(&call)
            .unwrap_or_else(|_| INVALID_SLIDE_HTML.to_string());
        let bitmap = placeholder_bitmap(self.config.capture_width, self.config.capture_height)?;
        Ok(CommittedSlide {
            index: unit.index,
            outcome: SlideOutcome::ExhaustedFallback,
            attempts_used: 0,
            call: Some(call),
            placeholder: true,
            rendered: RenderedSlide { html, bitmap },
            html_path: PathBuf::new(),
            png_path: PathBuf::new(),
        })
    }

    /// Writes the slide's files, its manifest entry and the continuity
    /// update.
    fn commit(
        &mut self,
        unit: &SlideContentUnit,
        mut slide: CommittedSlide,
        revisions: Vec<RevisionEntry>,
    ) -> Result<()> {
        let stem = slide_file_stem(unit.index);
        let html_rel = format!("html/{stem}.html");
        let png_rel = format!("png/{stem}.png");
        slide.html_path = self.run_dir.join(&html_rel);
        slide.png_path = self.run_dir.join(&png_rel);
        write_artifact(&slide.html_path, slide.rendered.html.as_bytes())?;
        write_artifact(&slide.png_path, &slide.rendered.bitmap.png)?;

        let mut entry = SlideEntry::new(unit.index, unit.text.clone());
        entry.outcome = slide.outcome;
        entry.attempts_used = slide.attempts_used;
        entry.final_call = slide.call.clone();
        entry.html_path = Some(html_rel);
        entry.png_path = Some(png_rel);
        entry.revisions = revisions;
        self.manifest.add_slide(entry);
        self.manifest.save()?;

        self.events.emit(
            "slide_committed",
            map_object(json!({
                "slide": unit.index,
                "outcome": slide.outcome.as_str(),
                "attempts_used": slide.attempts_used,
                "template": slide.call.as_ref().map(|call| call.name.clone()),
                "html_path": slide.html_path.to_string_lossy(),
                "png_path": slide.png_path.to_string_lossy(),
            })),
        )?;

        let produced = if slide.placeholder { None } else { slide.call.clone() };
        self.tracker
            .advance(unit.clone(), produced, &slide.rendered, slide.outcome);
        self.committed.push(slide);
        Ok(())
    }

    fn finish(&mut self, status: &str, error: Option<String>) -> Result<DeckOutput> {
        self.manifest.set_status(status);
        self.manifest.save()?;

        let accepted = self
            .committed
            .iter()
            .filter(|slide| slide.outcome == SlideOutcome::Accepted)
            .count() as u64;
        let summary = DeckSummary {
            deck_id: self.manifest.deck_id.clone(),
            status: status.to_string(),
            started_at: self.started_at.clone(),
            finished_at: now_utc_iso(),
            total_slides: self.committed.len() as u64,
            accepted,
            exhausted: self.committed.len() as u64 - accepted,
            total_attempts: self
                .committed
                .iter()
                .map(|slide| u64::from(slide.attempts_used))
                .sum(),
            error,
        };
        let extra = map_object(json!({
            "call_model": self.services.call_model_name(),
            "vision_model": self.services.verdict_model_name(),
            "renderer": self.renderer.name(),
        }));
        write_summary(&self.run_dir.join("summary.json"), &summary, Some(&extra))?;

        let close_error = self.renderer.close().err();
        self.services.shutdown();
        let mut finished = map_object(json!({
            "status": status,
            "slides": summary.total_slides,
            "accepted": summary.accepted,
            "exhausted": summary.exhausted,
            "total_attempts": summary.total_attempts,
        }));
        if let Some(err) = close_error {
            finished.insert(
                "renderer_close_error".to_string(),
                Value::String(error_chain_text(&err, 400)),
            );
        }
        self.events.emit("run_finished", finished)?;

        Ok(DeckOutput {
            deck_id: self.manifest.deck_id.clone(),
            run_dir: self.run_dir.clone(),
            manifest_path: self.manifest.path.clone(),
            slides: self.committed.clone(),
            summary,
        })
    }
}

fn write_artifact(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}
