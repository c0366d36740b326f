use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use super::{
    builtin_templates, ParamKind, ParamRole, ParamSpec, SlideArgs, TemplateError, TemplateSpec,
};
use crate::calls::FunctionCall;

pub const ERROR_TEMPLATE: &str = "error_slide";

/// Document a render must never produce for a slide to be evaluated.
pub const INVALID_SLIDE_HTML: &str = "<html><body><h1>Slide generation failed</h1></body></html>";

pub fn is_invalid_html(html: &str) -> bool {
    html.trim() == INVALID_SLIDE_HTML || html.trim().is_empty()
}

#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: IndexMap<String, TemplateSpec>,
}

impl TemplateRegistry {
    /// Validates and freezes a template set.
    ///
    /// Rejects duplicate names, parameters without a default of their own
    /// kind, templates that render empty with defaults, and sets missing the
    /// error template.
    pub fn new(specs: Vec<TemplateSpec>) -> Result<Self, TemplateError> {
        let mut templates = IndexMap::new();
        for spec in specs {
            for param in spec.parameters.values() {
                if !param.kind.accepts(&param.default) {
                    return Err(TemplateError::MissingDefault {
                        template: spec.name.clone(),
                        parameter: param.name.clone(),
                    });
                }
            }
            if templates.contains_key(&spec.name) {
                return Err(TemplateError::DuplicateTemplate(spec.name));
            }
            templates.insert(spec.name.clone(), spec);
        }
        if !templates.contains_key(ERROR_TEMPLATE) {
            return Err(TemplateError::MissingErrorTemplate(
                ERROR_TEMPLATE.to_string(),
            ));
        }

        let registry = Self { templates };
        for name in registry.templates.keys() {
            let html = registry.render(name, &Map::new())?;
            if is_invalid_html(&html) {
                return Err(TemplateError::EmptyRender(name.clone()));
            }
        }
        Ok(registry)
    }

    pub fn builtin() -> Result<Self, TemplateError> {
        Self::new(builtin_templates())
    }

    pub fn resolve(&self, name: &str) -> Result<&TemplateSpec, TemplateError> {
        self.templates
            .get(name)
            .ok_or_else(|| TemplateError::UnknownTemplate(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TemplateSpec> {
        self.templates.values()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Merges `arguments` over the template defaults and coerces each value
    /// to its declared kind. Unknown keys are rejected; `null` means default.
    pub fn resolve_arguments(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<SlideArgs, TemplateError> {
        let spec = self.resolve(name)?;
        if let Some(unknown) = arguments
            .keys()
            .find(|key| !spec.parameters.contains_key(*key))
        {
            return Err(TemplateError::UnknownArgument {
                template: spec.name.clone(),
                argument: unknown.clone(),
            });
        }

        let mut values = IndexMap::new();
        for (key, param) in &spec.parameters {
            let value = match arguments.get(key) {
                None | Some(Value::Null) => param.default.clone(),
                Some(raw) => coerce(param, raw).map_err(|reason| TemplateError::InvalidArgument {
                    template: spec.name.clone(),
                    argument: key.clone(),
                    reason,
                })?,
            };
            values.insert(key.clone(), value);
        }
        Ok(SlideArgs::new(values))
    }

    pub fn render(&self, name: &str, arguments: &Map<String, Value>) -> Result<String, TemplateError> {
        let spec = self.resolve(name)?;
        let args = self.resolve_arguments(name, arguments)?;
        Ok((spec.render)(&args))
    }

    pub fn render_call(&self, call: &FunctionCall) -> Result<String, TemplateError> {
        self.render(&call.name, &call.arguments)
    }

    /// Call to the error template showing `title` and `detail`.
    pub fn error_call(&self, title: &str, detail: &str) -> FunctionCall {
        let mut arguments = Map::new();
        arguments.insert("title".to_string(), Value::String(title.to_string()));
        arguments.insert("detail".to_string(), Value::String(detail.to_string()));
        FunctionCall::new(ERROR_TEMPLATE, arguments)
    }

    /// The "available functions" list handed to the call model.
    pub fn schema(&self) -> Value {
        Value::Array(self.templates.values().map(template_schema).collect())
    }
}

fn template_schema(spec: &TemplateSpec) -> Value {
    let mut properties = Map::new();
    for param in spec.parameters.values() {
        let mut row = Map::new();
        row.insert("type".to_string(), json!(param.kind.json_type()));
        if param.kind == ParamKind::StringList {
            row.insert("items".to_string(), json!({"type": "string"}));
        }
        row.insert("description".to_string(), json!(param.description));
        row.insert("default".to_string(), param.default.clone());
        if let Some(min) = param.min {
            row.insert("minimum".to_string(), json!(min));
        }
        if let Some(max) = param.max {
            row.insert("maximum".to_string(), json!(max));
        }
        if param.role == ParamRole::Content {
            row.insert("x-role".to_string(), json!("content"));
        }
        properties.insert(param.name.clone(), Value::Object(row));
    }
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": [],
            }
        }
    })
}

fn coerce(param: &ParamSpec, raw: &Value) -> Result<Value, String> {
    match param.kind {
        ParamKind::String => match raw {
            Value::String(_) => Ok(raw.clone()),
            Value::Number(number) => Ok(Value::String(number.to_string())),
            Value::Bool(flag) => Ok(Value::String(flag.to_string())),
            _ => Err(format!("expected a string, got {}", kind_name(raw))),
        },
        ParamKind::Number => {
            let value = as_f64(raw).ok_or_else(|| format!("expected a number, got {raw}"))?;
            Ok(json!(clamp(param, value)))
        }
        ParamKind::Integer => {
            let value = as_f64(raw).ok_or_else(|| format!("expected an integer, got {raw}"))?;
            Ok(json!(clamp(param, value.round()) as i64))
        }
        ParamKind::Boolean => match raw {
            Value::Bool(_) => Ok(raw.clone()),
            Value::Number(number) if number.as_f64() == Some(0.0) => Ok(json!(false)),
            Value::Number(number) if number.as_f64() == Some(1.0) => Ok(json!(true)),
            Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(json!(true)),
                "false" | "no" | "0" => Ok(json!(false)),
                _ => Err(format!("expected a boolean, got {text:?}")),
            },
            _ => Err(format!("expected a boolean, got {}", kind_name(raw))),
        },
        ParamKind::StringList => match raw {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(_) => Ok(item.clone()),
                    Value::Number(number) => Ok(Value::String(number.to_string())),
                    Value::Bool(flag) => Ok(Value::String(flag.to_string())),
                    other => Err(format!("list item is {}", kind_name(other))),
                })
                .collect::<Result<Vec<Value>, String>>()
                .map(Value::Array),
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Array(items)) if items.iter().all(Value::is_string) => {
                    Ok(Value::Array(items))
                }
                _ => Ok(json!([text])),
            },
            _ => Err(format!("expected a list of strings, got {}", kind_name(raw))),
        },
    }
}

fn as_f64(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|value| value.is_finite())
}

fn clamp(param: &ParamSpec, value: f64) -> f64 {
    let value = param.min.map(|min| value.max(min)).unwrap_or(value);
    param.max.map(|max| value.min(max)).unwrap_or(value)
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{TemplateRegistry, ERROR_TEMPLATE};
    use crate::calls::FunctionCall;
    use crate::templates::{
        error_slide_template, ParamKind, ParamSpec, SlideArgs, TemplateError, TemplateSpec,
    };

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn echo_title(args: &SlideArgs) -> String {
        format!("<h1>{}</h1>", args.text("title"))
    }

    fn render_nothing(_: &SlideArgs) -> String {
        String::new()
    }

    #[test]
    fn every_builtin_template_renders_with_empty_arguments() -> anyhow::Result<()> {
        let registry = TemplateRegistry::builtin()?;
        assert!(registry.len() >= 6);
        for name in registry.names() {
            let html = registry.render(name, &Map::new())?;
            assert!(html.starts_with("<!DOCTYPE html>"), "{name}");
            assert!(html.len() > 200, "{name}");
        }
        Ok(())
    }

    #[test]
    fn rendering_is_idempotent() -> anyhow::Result<()> {
        let registry = TemplateRegistry::builtin()?;
        let call = FunctionCall::new(
            "body_bullets",
            args(json!({"slide_title": "Why", "items": ["a", "b"], "accent_color": "#004080"})),
        );
        assert_eq!(registry.render_call(&call)?, registry.render_call(&call)?);
        Ok(())
    }

    #[test]
    fn unknown_template_and_argument_are_errors() -> anyhow::Result<()> {
        let registry = TemplateRegistry::builtin()?;
        assert_eq!(
            registry.render("nope", &Map::new()),
            Err(TemplateError::UnknownTemplate("nope".to_string()))
        );
        assert!(matches!(
            registry.render("split_title", &args(json!({"colour": "red"}))),
            Err(TemplateError::UnknownArgument { argument, .. }) if argument == "colour"
        ));
        Ok(())
    }

    #[test]
    fn arguments_are_merged_over_defaults_and_coerced() -> anyhow::Result<()> {
        let registry = TemplateRegistry::builtin()?;
        let resolved = registry.resolve_arguments(
            "body_gradient",
            &args(json!({
                "header_text": 2024,
                "content_bg_opacity": "1.7",
                "background_gradient": "#000",
                "paragraph_text": null,
            })),
        )?;
        assert_eq!(resolved.text("header_text"), "2024");
        assert_eq!(resolved.number("content_bg_opacity"), 1.0);
        assert_eq!(resolved.list("background_gradient"), vec!["#000"]);
        let spec = registry.resolve("body_gradient")?;
        assert_eq!(
            resolved.get("paragraph_text"),
            Some(&spec.parameters["paragraph_text"].default)
        );

        let err = registry.render("body_gradient", &args(json!({"content_bg_opacity": "opaque"})));
        assert!(matches!(err, Err(TemplateError::InvalidArgument { .. })));
        Ok(())
    }

    #[test]
    fn construction_rejects_incomplete_templates() {
        let missing_default = TemplateSpec::new(
            "broken",
            "",
            vec![ParamSpec::content("title", ParamKind::String, Value::Null, "")],
            echo_title,
        );
        assert_eq!(
            TemplateRegistry::new(vec![error_slide_template(), missing_default]).err(),
            Some(TemplateError::MissingDefault {
                template: "broken".to_string(),
                parameter: "title".to_string(),
            })
        );

        let empty = TemplateSpec::new("blank", "", Vec::new(), render_nothing);
        assert_eq!(
            TemplateRegistry::new(vec![error_slide_template(), empty]).err(),
            Some(TemplateError::EmptyRender("blank".to_string()))
        );

        assert_eq!(
            TemplateRegistry::new(vec![error_slide_template(), error_slide_template()]).err(),
            Some(TemplateError::DuplicateTemplate(ERROR_TEMPLATE.to_string()))
        );

        let lone = TemplateSpec::new(
            "lone",
            "",
            vec![ParamSpec::content("title", ParamKind::String, json!("x"), "")],
            echo_title,
        );
        assert_eq!(
            TemplateRegistry::new(vec![lone]).err(),
            Some(TemplateError::MissingErrorTemplate(ERROR_TEMPLATE.to_string()))
        );
    }

    #[test]
    fn schema_lists_every_parameter_with_defaults() -> anyhow::Result<()> {
        let registry = TemplateRegistry::builtin()?;
        let schema = registry.schema();
        let tools = schema.as_array().cloned().unwrap_or_default();
        assert_eq!(tools.len(), registry.len());
        let first = &tools[0];
        assert_eq!(first["type"], json!("function"));
        assert_eq!(first["function"]["parameters"]["required"], json!([]));
        let spec = registry.resolve(first["function"]["name"].as_str().unwrap_or(""))?;
        let properties = first["function"]["parameters"]["properties"]
            .as_object()
            .cloned()
            .unwrap_or_default();
        assert_eq!(properties.len(), spec.parameters.len());
        for (key, param) in &spec.parameters {
            assert_eq!(properties[key]["default"], param.default);
        }
        Ok(())
    }

    #[test]
    fn error_call_renders_the_error_template() -> anyhow::Result<()> {
        let registry = TemplateRegistry::builtin()?;
        let call = registry.error_call("Model unavailable", "timed out");
        let html = registry.render_call(&call)?;
        assert!(html.contains("Model unavailable"));
        assert!(html.contains("timed out"));
        Ok(())
    }
}
