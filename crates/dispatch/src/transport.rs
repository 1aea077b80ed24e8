use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type TransportResult<T> = Result<T, TransportError>;

/// Placeholder shown when the chunk endpoint answers without usable text.
pub const NO_RESPONSE_TEXT: &str = "No response";

/// Reply of the chunk endpoint, already unwrapped to display text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReply {
    pub response_text: String,
}

impl ChunkReply {
    pub fn new(response_text: impl Into<String>) -> Self {
        Self {
            response_text: response_text.into(),
        }
    }
}

#[derive(Debug, Clone, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum TransportError {
    #[snafu(display("request to {endpoint} failed on `{stage}`: {message}"))]
    Request {
        stage: &'static str,
        endpoint: String,
        message: String,
    },
    #[snafu(display("{endpoint} returned status {status}: {body}"))]
    Status {
        stage: &'static str,
        endpoint: String,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode reply from {endpoint}: {details}"))]
    Decode {
        stage: &'static str,
        endpoint: String,
        details: String,
    },
}

/// Performs the network call for one dispatched chunk.
pub trait ChunkTransport: Send + Sync {
    fn dispatch_chunk<'a>(&'a self, text: &'a str) -> BoxFuture<'a, TransportResult<ChunkReply>>;
}
