use futures::StreamExt;
use rig::completion::{CompletionModel, CompletionRequestBuilder, Message as RigMessage};
use rig::message::AssistantContent;
use rig::prelude::CompletionClient;
use rig::providers::gemini;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::model::DEFAULT_GEMINI_MODEL;
use super::provider::{
    BoxFuture, CompletionsFailedSnafu, EmptyPromptSnafu, EmptyResponseSnafu, HttpClientSnafu,
    LlmProvider, MissingApiKeySnafu, ProviderConfig, ProviderError, ProviderResult,
    ProviderStreamHandle, ProviderWorker, StreamEvent, TextRequest, make_event_stream,
};

pub const GEMINI_PROVIDER_ID: &str = "gemini";

pub struct GeminiProviderAdapter {
    config: ProviderConfig,
}

impl GeminiProviderAdapter {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "gemini-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { config })
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<gemini::Client> {
        let mut builder = gemini::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn joined_text<'a>(contents: impl Iterator<Item = &'a AssistantContent>) -> String {
        contents
            .filter_map(|content| match content {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    fn request_builder<M>(model: &M, request: &TextRequest) -> CompletionRequestBuilder<M>
    where
        M: CompletionModel,
    {
        let mut builder = model.completion_request(RigMessage::user(request.prompt.clone()));
        if let Some(preamble) = &request.preamble
            && !preamble.trim().is_empty()
        {
            builder = builder.preamble(preamble.clone());
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        builder
    }

    async fn run_completion(config: ProviderConfig, request: TextRequest) -> ProviderResult<String> {
        ensure!(
            !request.prompt.trim().is_empty(),
            EmptyPromptSnafu {
                stage: "complete-validate-prompt",
            }
        );

        let client = Self::build_client(&config)?;
        let model = client.completion_model(request.model_id.clone());
        let response = Self::request_builder(&model, &request)
            .send()
            .await
            .context(CompletionsFailedSnafu {
                stage: "complete-send",
            })?;

        let text = Self::joined_text(response.choice.iter());
        if text.trim().is_empty() {
            tracing::warn!(model_id = %request.model_id, "completion returned no text content");
            return EmptyResponseSnafu {
                stage: "complete-extract-text",
                model_id: request.model_id,
            }
            .fail();
        }

        tracing::debug!(
            model_id = %request.model_id,
            response_chars = text.len(),
            "completion finished"
        );
        Ok(text)
    }

    fn emit_error_event(event_tx: &mpsc::UnboundedSender<StreamEvent>, error: ProviderError) {
        let _ = event_tx.send(StreamEvent::Error(error.to_string()));
    }

    fn map_stream_item<R>(item: StreamedAssistantContent<R>) -> Option<StreamEvent>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) if !text.text.is_empty() => {
                Some(StreamEvent::Delta(text.text))
            }
            // Explanations are rendered as plain text; reasoning and tool traffic is dropped.
            StreamedAssistantContent::Text(_)
            | StreamedAssistantContent::Reasoning(_)
            | StreamedAssistantContent::ReasoningDelta { .. }
            | StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => None,
        }
    }

    async fn run_stream_worker(
        config: ProviderConfig,
        request: TextRequest,
        event_tx: mpsc::UnboundedSender<StreamEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let client = match Self::build_client(&config) {
            Ok(client) => client,
            Err(error) => {
                tracing::error!(
                    provider_id = %config.provider_id,
                    error = %error,
                    "failed to build provider client"
                );
                Self::emit_error_event(&event_tx, error);
                return;
            }
        };

        let model = client.completion_model(request.model_id.clone());
        let mut stream = match Self::request_builder(&model, &request).stream().await {
            Ok(stream) => stream,
            Err(source) => {
                tracing::error!(
                    provider_id = %config.provider_id,
                    model_id = %request.model_id,
                    error = %source,
                    "failed to open provider stream"
                );
                Self::emit_error_event(
                    &event_tx,
                    ProviderError::CompletionsFailed {
                        stage: "open-stream",
                        source,
                    },
                );
                return;
            }
        };

        let mut cancelled = false;
        let mut stream_failed = false;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    tracing::debug!(model_id = %request.model_id, "provider stream cancelled");
                    stream.cancel();
                    break;
                }
                next_item = stream.next() => {
                    match next_item {
                        Some(Ok(item)) => {
                            if let Some(mapped) = Self::map_stream_item(item)
                                && event_tx.send(mapped).is_err()
                            {
                                return;
                            }
                        }
                        Some(Err(source)) => {
                            stream_failed = true;
                            tracing::warn!(
                                model_id = %request.model_id,
                                error = %source,
                                "provider stream emitted an error chunk"
                            );
                            let error = ProviderError::CompletionsFailed {
                                stage: "stream-chunk",
                                source,
                            };
                            Self::emit_error_event(&event_tx, error);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if !cancelled && !stream_failed {
            let _ = event_tx.send(StreamEvent::Done);
        }
    }
}

impl LlmProvider for GeminiProviderAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Rig Gemini"
    }

    fn default_model(&self) -> &str {
        DEFAULT_GEMINI_MODEL
    }

    fn complete<'a>(&'a self, request: TextRequest) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(Self::run_completion(self.config.clone(), request))
    }

    fn stream_text(&self, request: TextRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.prompt.trim().is_empty(),
            EmptyPromptSnafu {
                stage: "stream-text",
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream();
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            self.config.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }
}
