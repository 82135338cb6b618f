use indexmap::IndexMap;

pub const DEFAULT_EDIT_MODEL: &str = "gemini-2.5-flash-image-preview";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub description: String,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Known models, in preference order. The first model supporting a
/// capability is that capability's default.
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
        self.models.get(normalize_model_name(name))
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
        self.get(name)
            .filter(|model| model.supports(capability))
            .cloned()
    }
}

/// Accepts both `gemini-x` and the API's `models/gemini-x` form.
pub fn normalize_model_name(name: &str) -> &str {
    let trimmed = name.trim();
    trimmed.strip_prefix("models/").unwrap_or(trimmed)
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, capabilities: &[&str], description: &str| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: "gemini".to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                description: description.to_string(),
            },
        );
    };

    insert(
        DEFAULT_EDIT_MODEL,
        &["image", "edit"],
        "Gemini 2.5 Flash image preview",
    );
    insert(
        "gemini-2.5-flash-image",
        &["image", "edit"],
        "Gemini 2.5 Flash image",
    );
    insert(
        "gemini-3-pro-image-preview",
        &["image", "edit"],
        "Gemini 3 Pro image preview",
    );
    insert("gemini-2.0-flash", &["text", "vision"], "Gemini 2.0 Flash");

    map
}
