use auralis_dispatch::TransportError;
use auralis_llm::ProviderError;
use snafu::Snafu;

use crate::settings::SettingsError;
use crate::tutor::{TopicError, TutorError};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("no API key configured; set GEMINI_API_KEY or `api_key` in {path}"))]
    MissingApiKey { stage: &'static str, path: String },
    #[snafu(display("failed to create provider on `{stage}`: {source}"))]
    Provider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("invalid topic on `{stage}`: {source}"))]
    Topic {
        stage: &'static str,
        source: TopicError,
    },
    #[snafu(display("{source}"))]
    Tutor {
        stage: &'static str,
        source: TutorError,
    },
    #[snafu(display("backend request failed on `{stage}`: {source}"))]
    Backend {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("failed to save settings on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("subtopic {index} is out of range, only {available} available"))]
    ExplainIndex {
        stage: &'static str,
        index: usize,
        available: usize,
    },
    #[snafu(display("explanation stream failed: {message}"))]
    Stream { stage: &'static str, message: String },
    #[snafu(display("terminal i/o failed on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("session task ended abnormally: {source}"))]
    SessionTask {
        stage: &'static str,
        source: tokio::task::JoinError,
    },
}

pub type AppResult<T> = Result<T, AppError>;
