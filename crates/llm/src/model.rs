#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

impl Model {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
        }
    }

    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

pub fn default_gemini_models() -> Vec<Model> {
    vec![
        Model::from_id("gemini-2.0-flash").with_description("Fast default for tutoring prompts"),
        Model::from_id("gemini-2.0-flash-lite").with_description("Lowest latency and cost"),
        Model::from_id("gemini-1.5-pro").with_description("Longer, more careful explanations"),
    ]
}

/// Resolves a configured model id, falling back to the default when blank.
pub fn resolve_model_id(configured: &str) -> String {
    let configured = configured.trim();
    if configured.is_empty() {
        DEFAULT_GEMINI_MODEL.to_string()
    } else {
        configured.to_string()
    }
}
