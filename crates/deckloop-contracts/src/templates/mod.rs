//! Closed set of slide templates: each has a parameter schema with full
//! defaults and a pure render function.

mod library;
mod registry;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use library::{builtin_templates, error_slide_template};
pub use registry::{is_invalid_html, TemplateRegistry, ERROR_TEMPLATE, INVALID_SLIDE_HTML};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    StringList,
}

impl ParamKind {
    pub fn json_type(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Integer => "integer",
            ParamKind::Boolean => "boolean",
            ParamKind::StringList => "array",
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::StringList => value
                .as_array()
                .map(|items| items.iter().all(Value::is_string))
                .unwrap_or(false),
        }
    }
}

/// `Content` parameters carry the slide's text; `Presentation` ones style it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamRole {
    Content,
    Presentation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub default: Value,
    pub description: String,
    pub role: ParamRole,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ParamSpec {
    pub fn content(name: &str, kind: ParamKind, default: Value, description: &str) -> Self {
        Self::build(name, kind, default, description, ParamRole::Content)
    }

    pub fn style(name: &str, kind: ParamKind, default: Value, description: &str) -> Self {
        Self::build(name, kind, default, description, ParamRole::Presentation)
    }

    pub fn bounded(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    fn build(name: &str, kind: ParamKind, default: Value, description: &str, role: ParamRole) -> Self {
        Self {
            name: name.to_string(),
            kind,
            default,
            description: description.to_string(),
            role,
            min: None,
            max: None,
        }
    }
}

pub type RenderFn = fn(&SlideArgs) -> String;

#[derive(Clone)]
pub struct TemplateSpec {
    pub name: String,
    pub description: String,
    pub parameters: IndexMap<String, ParamSpec>,
    pub render: RenderFn,
}

impl TemplateSpec {
    pub fn new(name: &str, description: &str, parameters: Vec<ParamSpec>, render: RenderFn) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: parameters
                .into_iter()
                .map(|param| (param.name.clone(), param))
                .collect(),
            render,
        }
    }

    pub fn content_parameters(&self) -> impl Iterator<Item = &ParamSpec> {
        self.parameters
            .values()
            .filter(|param| param.role == ParamRole::Content)
    }
}

impl std::fmt::Debug for TemplateSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateSpec")
            .field("name", &self.name)
            .field("parameters", &self.parameters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Fully resolved arguments handed to a render function. Every declared
/// parameter is present and already coerced to its kind.
#[derive(Debug, Clone, PartialEq)]
pub struct SlideArgs {
    values: IndexMap<String, Value>,
}

impl SlideArgs {
    pub fn new(values: IndexMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Content text; inline markup such as `<strong>` is kept as written.
    pub fn text(&self, key: &str) -> &str {
        self.values.get(key).and_then(Value::as_str).unwrap_or("")
    }

    /// A value interpolated into a stylesheet, stripped of characters that
    /// would end the declaration.
    pub fn css(&self, key: &str) -> String {
        self.text(key)
            .chars()
            .filter(|ch| !matches!(ch, ';' | '{' | '}' | '<' | '>'))
            .collect::<String>()
            .trim()
            .to_string()
    }

    pub fn number(&self, key: &str) -> f64 {
        self.values.get(key).and_then(Value::as_f64).unwrap_or(0.0)
    }

    pub fn integer(&self, key: &str) -> i64 {
        self.values.get(key).and_then(Value::as_i64).unwrap_or(0)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn list(&self, key: &str) -> Vec<&str> {
        self.values
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown template `{0}`")]
    UnknownTemplate(String),
    #[error("template `{template}` has no parameter `{argument}`")]
    UnknownArgument { template: String, argument: String },
    #[error("argument `{argument}` of `{template}`: {reason}")]
    InvalidArgument {
        template: String,
        argument: String,
        reason: String,
    },
    #[error("template `{0}` registered twice")]
    DuplicateTemplate(String),
    #[error("parameter `{parameter}` of `{template}` lacks a default of its declared kind")]
    MissingDefault { template: String, parameter: String },
    #[error("template `{0}` renders empty HTML with its defaults")]
    EmptyRender(String),
    #[error("registry has no `{0}` template")]
    MissingErrorTemplate(String),
}
