use crate::calls::FunctionCall;
use crate::slides::{RenderedSlide, SlideContentUnit, SlideOutcome};

/// What the slide about to be processed knows about its predecessor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContinuityContext {
    pub previous_content: Option<SlideContentUnit>,
    pub previous_call: Option<FunctionCall>,
    pub previous_rendered: Option<RenderedSlide>,
}

impl ContinuityContext {
    pub fn previous_call_text(&self) -> String {
        self.previous_call
            .as_ref()
            .map(FunctionCall::to_payload)
            .unwrap_or_default()
    }

    pub fn previous_content_text(&self) -> &str {
        self.previous_content
            .as_ref()
            .map(|unit| unit.text.as_str())
            .unwrap_or("")
    }
}

/// Carries context from one slide to the next.
///
/// Content and call always move forward. The rendered image only moves
/// forward when the slide was accepted, so evaluation compares against the
/// most recent accepted slide.
#[derive(Debug, Default)]
pub struct ContinuityTracker {
    context: ContinuityContext,
    advanced: usize,
}

impl ContinuityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &ContinuityContext {
        &self.context
    }

    /// Number of slides recorded so far.
    pub fn advanced(&self) -> usize {
        self.advanced
    }

    pub fn advance(
        &mut self,
        content: SlideContentUnit,
        call: Option<FunctionCall>,
        rendered: &RenderedSlide,
        outcome: SlideOutcome,
    ) {
        self.context.previous_content = Some(content);
        if call.is_some() {
            self.context.previous_call = call;
        }
        if outcome == SlideOutcome::Accepted {
            self.context.previous_rendered = Some(rendered.clone());
        }
        self.advanced += 1;
    }
}
