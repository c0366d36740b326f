mod parser;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub use parser::{parse_call, strip_end_markers, CallDiagnostic, CallParse, ParsedCall};

pub const CALL_OPEN: &str = "<tool_call>";
pub const CALL_CLOSE: &str = "</tool_call>";
pub const END_MARKERS: &[&str] = &["<|im_end|>", "<|endoftext|>"];

/// A template name plus the argument mapping chosen for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "arguments": Value::Object(self.arguments.clone()),
        })
    }

    /// Serializes the call in the tagged-payload form the models read and write.
    pub fn to_payload(&self) -> String {
        format!("{CALL_OPEN}\n{}\n{CALL_CLOSE}", self.to_json())
    }

    /// Argument keys whose values differ between `self` and `other`, sorted.
    pub fn changed_keys(&self, other: &FunctionCall) -> Vec<String> {
        let mut keys: Vec<String> = self
            .arguments
            .keys()
            .chain(other.arguments.keys())
            .filter(|key| self.arguments.get(*key) != other.arguments.get(*key))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::{parse_call, FunctionCall, ParsedCall};

    #[test]
    fn payload_reparses_to_the_same_call() {
        let mut arguments = Map::new();
        arguments.insert("title".to_string(), json!("Quarterly review"));
        arguments.insert("accent_color".to_string(), json!("#2C4B7D"));
        let call = FunctionCall::new("split_title", arguments);

        let parsed = parse_call(&call.to_payload());
        assert_eq!(parsed.outcome, ParsedCall::Call(call));
    }

    #[test]
    fn changed_keys_covers_added_removed_and_modified() {
        let before = FunctionCall::new(
            "body_bullets",
            json!({"title": "A", "bg_color": "#fff", "items": ["x"]})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        );
        let after = FunctionCall::new(
            "body_bullets",
            json!({"title": "A", "bg_color": "#000", "font_family": "Inter"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        );
        assert_eq!(
            before.changed_keys(&after),
            vec!["bg_color", "font_family", "items"]
        );
    }
}
