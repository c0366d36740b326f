//! Prompt text sent to the call and verdict models.

pub const CALL_SYSTEM_PROMPT: &str = "You design presentation slides by choosing one slide template function and filling in its arguments. \
Answer with exactly one function call.";

/// Criteria the evaluator checks each rendered slide against.
pub const RUBRIC: &str = "1. The title must be clear and descriptive.
2. Text content should be readable with appropriate font size and color contrast.
3. Layout should be balanced, with no overlapping elements.
4. Images (if any) should be relevant and properly aligned.
5. Overall design should be visually appealing and professional.";

pub fn call_prompt(previous_content: &str, previous_call: &str, current_content: &str) -> String {
    format!(
        "Create a slide that matches the following content, choose a function when you think it is best suited with the content:
Previous slide content: {previous_content}
Previous function call: {previous_call}
Current slide content: {current_content}
Current function call:
"
    )
}

pub fn verdict_prompt(call_payload: &str, has_previous: bool) -> String {
    let continuity = if has_previous {
        "The first image is the previous accepted slide; keep the new slide visually consistent with it. The last image is the slide to evaluate.\n"
    } else {
        ""
    };
    format!(
        "Evaluate this slide based on the following criteria:
{RUBRIC}
{continuity}If the slide does not meet all requirements, provide feedback and an improved version of the tool call.
Keep the function name unchanged and only modify its parameters.
Current tool call: {call_payload}
Your response must follow this format:
<!-- accept/deny -->
<!-- reason -->
<tool_call>
[tool_call_output with updated parameters if deny]
</tool_call>
"
    )
}

#[cfg(test)]
mod tests {
    use super::{call_prompt, verdict_prompt};

    #[test]
    fn call_prompt_carries_previous_context() {
        let prompt = call_prompt("intro text", "<tool_call>{}</tool_call>", "body text");
        assert!(prompt.contains("Previous slide content: intro text\n"));
        assert!(prompt.contains("Previous function call: <tool_call>{}</tool_call>\n"));
        assert!(prompt.ends_with("Current function call:\n"));
    }

    #[test]
    fn verdict_prompt_mentions_previous_slide_only_when_present() {
        let first = verdict_prompt("payload", false);
        let later = verdict_prompt("payload", true);
        assert!(!first.contains("previous accepted slide"));
        assert!(later.contains("previous accepted slide"));
        assert!(later.contains("5. Overall design"));
        assert!(later.contains("Current tool call: payload"));
    }
}
