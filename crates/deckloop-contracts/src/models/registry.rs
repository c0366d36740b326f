use indexmap::IndexMap;

pub const CALL_CAPABILITY: &str = "call";
pub const VISION_CAPABILITY: &str = "vision";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub context_window: Option<u64>,
    pub max_output_tokens: u64,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }

    pub fn is_dryrun(&self) -> bool {
        self.provider == "dryrun"
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }

    /// Adds or replaces a model, e.g. one served by a local OpenAI-compatible endpoint.
    pub fn register(&mut self, spec: ModelSpec) {
        self.models.insert(spec.name.clone(), spec);
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str,
                      provider: &str,
                      capabilities: &[&str],
                      context_window: Option<u64>,
                      max_output_tokens: u64| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                context_window,
                max_output_tokens,
            },
        );
    };

    insert("dryrun-call-1", "dryrun", &[CALL_CAPABILITY], Some(8192), 512);
    insert("dryrun-vision-1", "dryrun", &[VISION_CAPABILITY], Some(8192), 512);
    insert(
        "gpt-4o-mini",
        "openai",
        &[CALL_CAPABILITY, VISION_CAPABILITY],
        Some(128000),
        512,
    );
    insert(
        "gpt-4o",
        "openai",
        &[CALL_CAPABILITY, VISION_CAPABILITY],
        Some(128000),
        512,
    );
    insert(
        "Qwen/Qwen2.5-7B-Instruct",
        "openai",
        &[CALL_CAPABILITY],
        Some(32768),
        512,
    );
    insert(
        "Qwen/Qwen2.5-VL-7B-Instruct",
        "openai",
        &[VISION_CAPABILITY],
        Some(32768),
        512,
    );

    map
}
