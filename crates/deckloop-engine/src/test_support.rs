//! Scripted models and renderers for engine tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use deckloop_contracts::calls::FunctionCall;
use deckloop_contracts::slides::Bitmap;
use serde_json::Value;

use crate::models::{CallModel, CallRequest, VerdictModel, VerdictRequest};
use crate::renderer::{DryrunRenderer, SlideRenderer};

pub(crate) const ACCEPT: &str = "<!-- accept -->\n<!-- Looks good. -->";

pub(crate) fn payload(name: &str, arguments: Value) -> String {
    FunctionCall::new(name, arguments.as_object().cloned().unwrap_or_default()).to_payload()
}

pub(crate) fn deny_with(reason: &str, revised: &str) -> String {
    format!("<!-- deny -->\n<!-- {reason} -->\n{revised}")
}

/// Replies are consumed in order; `Err` entries become model failures.
/// Once the script runs out, `fallback` is returned.
pub(crate) struct ScriptedCallModel {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    fallback: String,
    pub(crate) requests: Mutex<Vec<CallRequest>>,
}

impl ScriptedCallModel {
    pub(crate) fn new(replies: Vec<std::result::Result<String, String>>, fallback: String) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().map(|requests| requests.len()).unwrap_or(0)
    }
}

impl CallModel for ScriptedCallModel {
    fn name(&self) -> &str {
        "scripted-call"
    }

    fn propose(&self, request: &CallRequest) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self
            .replies
            .lock()
            .map_err(|_| anyhow!("script poisoned"))?
            .pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => bail!("{message}"),
            None => Ok(self.fallback.clone()),
        }
    }
}

pub(crate) struct ScriptedVerdictModel {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    fallback: String,
    pub(crate) requests: Mutex<Vec<VerdictRequest>>,
}

impl ScriptedVerdictModel {
    pub(crate) fn new(replies: Vec<std::result::Result<String, String>>, fallback: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback: fallback.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().map(|requests| requests.len()).unwrap_or(0)
    }
}

impl VerdictModel for ScriptedVerdictModel {
    fn name(&self) -> &str {
        "scripted-verdict"
    }

    fn evaluate(&self, request: &VerdictRequest) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self
            .replies
            .lock()
            .map_err(|_| anyhow!("script poisoned"))?
            .pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => bail!("{message}"),
            None => Ok(self.fallback.clone()),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RendererLog {
    pub(crate) captures: usize,
    pub(crate) restarts: usize,
    pub(crate) closed: bool,
    pub(crate) html: Vec<String>,
}

/// Dryrun capture with scripted failures. `failures` lists the capture
/// numbers (1-based) that fail; `dies_on_failure` marks the process dead
/// after a failure; `restart_fails` makes restarts fail.
pub(crate) struct ScriptedRenderer {
    inner: DryrunRenderer,
    failures: Vec<usize>,
    dies_on_failure: bool,
    restart_fails: bool,
    alive: bool,
    pub(crate) log: Arc<Mutex<RendererLog>>,
}

impl ScriptedRenderer {
    pub(crate) fn new() -> Self {
        Self {
            inner: DryrunRenderer::new(900, 500),
            failures: Vec::new(),
            dies_on_failure: false,
            restart_fails: false,
            alive: true,
            log: Arc::new(Mutex::new(RendererLog::default())),
        }
    }

    pub(crate) fn failing_on(mut self, captures: &[usize]) -> Self {
        self.failures = captures.to_vec();
        self
    }

    pub(crate) fn dying(mut self, restart_fails: bool) -> Self {
        self.dies_on_failure = true;
        self.restart_fails = restart_fails;
        self
    }

    pub(crate) fn snapshot(&self) -> (usize, usize, bool) {
        self.log
            .lock()
            .map(|log| (log.captures, log.restarts, log.closed))
            .unwrap_or((0, 0, false))
    }
}

impl SlideRenderer for ScriptedRenderer {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capture(&mut self, html: &str) -> Result<Bitmap> {
        let count = {
            let mut log = self.log.lock().map_err(|_| anyhow!("log poisoned"))?;
            log.captures += 1;
            log.html.push(html.to_string());
            log.captures
        };
        if !self.alive {
            bail!("renderer process is gone");
        }
        if self.failures.contains(&count) {
            if self.dies_on_failure {
                self.alive = false;
            }
            bail!("capture {count} failed");
        }
        self.inner.capture(html)
    }

    fn is_alive(&mut self) -> bool {
        self.alive
    }

    fn restart(&mut self) -> Result<()> {
        if let Ok(mut log) = self.log.lock() {
            log.restarts += 1;
        }
        if self.restart_fails {
            bail!("browser binary vanished");
        }
        self.alive = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Ok(mut log) = self.log.lock() {
            log.closed = true;
        }
        Ok(())
    }
}
