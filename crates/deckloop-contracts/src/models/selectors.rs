use thiserror::Error;

use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no models available for capability '{0}'")]
    NoCandidates(String),
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Picks `requested` when it supports `capability`; otherwise a
    /// case-insensitive name match, then the first capable model.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, SelectionError> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let candidates = self.registry.by_capability(capability);

        let Some(requested_value) = requested else {
            let model = candidates
                .first()
                .cloned()
                .ok_or_else(|| SelectionError::NoCandidates(capability.to_string()))?;
            return Ok(ModelSelection {
                model,
                requested: None,
                fallback_reason: Some("No model specified; using default.".to_string()),
            });
        };

        if let Some(model) = self.registry.ensure(requested_value, capability) {
            return Ok(ModelSelection {
                model,
                requested: Some(requested_value.to_string()),
                fallback_reason: None,
            });
        }

        if let Some(model) = candidates
            .iter()
            .find(|candidate| candidate.name.eq_ignore_ascii_case(requested_value))
        {
            return Ok(ModelSelection {
                model: model.clone(),
                requested: Some(requested_value.to_string()),
                fallback_reason: Some(format!(
                    "Requested model '{requested_value}' matched '{}' ignoring case.",
                    model.name
                )),
            });
        }

        let model = candidates
            .first()
            .cloned()
            .ok_or_else(|| SelectionError::NoCandidates(capability.to_string()))?;
        Ok(ModelSelection {
            fallback_reason: Some(format!(
                "Requested model '{requested_value}' unavailable for capability '{capability}'; using '{}'.",
                model.name
            )),
            model,
            requested: Some(requested_value.to_string()),
        })
    }
}
