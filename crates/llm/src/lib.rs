use std::sync::Arc;

mod gemini_adapter;
mod model;
mod provider;

pub use gemini_adapter::{GEMINI_PROVIDER_ID, GeminiProviderAdapter};
pub use model::{DEFAULT_GEMINI_MODEL, Model, default_gemini_models, resolve_model_id};
pub use provider::{
    BoxFuture, LlmProvider, ProviderConfig, ProviderError, ProviderEventStream, ProviderResult,
    ProviderStreamHandle, ProviderWorker, StreamEvent, TextRequest,
};

pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = GEMINI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "gemini" | "google" | "rig-gemini" => {
            config.provider_id = GEMINI_PROVIDER_ID.to_string();
            Ok(Arc::new(GeminiProviderAdapter::new(config)?))
        }
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}
