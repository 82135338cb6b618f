use super::registry::{normalize_model_name, ModelRegistry, ModelSpec};

/// Capability every try-on model must have.
pub const EDIT_CAPABILITY: &str = "edit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
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

    /// Picks the requested model when it is known and supports `capability`,
    /// otherwise the capability's default together with the reason.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let requested = requested
            .map(normalize_model_name)
            .filter(|value| !value.is_empty());

        let fallback_reason = match requested {
            Some(name) => {
                if let Some(model) = self.registry.ensure(name, capability) {
                    return Ok(ModelSelection {
                        model,
                        requested: Some(name.to_string()),
                        fallback_reason: None,
                    });
                }
                let reason = match self.registry.get(name) {
                    Some(_) => format!("Model '{name}' does not support '{capability}'."),
                    None => format!("Unknown model '{name}'."),
                };
                Some(reason)
            }
            None => None,
        };

        let Some(model) = self.registry.by_capability(capability).into_iter().next() else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        let fallback_reason =
            fallback_reason.map(|reason| format!("{reason} Using '{}'.", model.name));
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason,
        })
    }
}
