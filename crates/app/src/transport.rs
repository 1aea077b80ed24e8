use auralis_dispatch::{
    BoxFuture, ChunkReply, ChunkTransport, NO_RESPONSE_TEXT, TransportError, TransportResult,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reply fields the chunk endpoint has been seen to use, in lookup order.
const REPLY_FIELDS: [&str; 3] = ["response", "responseText", "text"];

#[derive(Debug, Serialize)]
struct ChunkPayload<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct RetrievePayload<'a> {
    model_name: &'a str,
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    context: String,
}

#[derive(Debug, Serialize)]
struct SplitPayload<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SplitResponse {
    #[serde(default)]
    groups: Vec<Vec<String>>,
}

/// Sends dispatched chunks to the backend chunk endpoint.
#[derive(Debug, Clone)]
pub struct HttpChunkTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpChunkTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_chunk(&self, text: &str) -> TransportResult<ChunkReply> {
        tracing::debug!(endpoint = %self.endpoint, chars = text.len(), "sending chunk");
        let body = post_for_text(
            &self.client,
            &self.endpoint,
            &ChunkPayload { text },
            "send-chunk",
        )
        .await?;
        Ok(ChunkReply::new(parse_chunk_reply(&body)))
    }
}

impl ChunkTransport for HttpChunkTransport {
    fn dispatch_chunk<'a>(&'a self, text: &'a str) -> BoxFuture<'a, TransportResult<ChunkReply>> {
        Box::pin(self.send_chunk(text))
    }
}

/// Extracts display text from a chunk endpoint reply body.
///
/// The reply field may hold a JSON-encoded string that needs a second parse. Anything
/// that is not JSON is shown verbatim.
pub fn parse_chunk_reply(body: &str) -> String {
    let trimmed = body.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(fields)) => match reply_field(&fields) {
            Some(Value::String(text)) => unwrap_nested_reply(text),
            Some(Value::Null) | None => NO_RESPONSE_TEXT.to_string(),
            Some(other) => other.to_string(),
        },
        Ok(Value::String(text)) => unwrap_nested_reply(&text),
        Ok(_) | Err(_) if trimmed.is_empty() => NO_RESPONSE_TEXT.to_string(),
        Ok(_) | Err(_) => trimmed.to_string(),
    }
}

fn reply_field(fields: &serde_json::Map<String, Value>) -> Option<&Value> {
    REPLY_FIELDS.iter().find_map(|key| fields.get(*key))
}

fn unwrap_nested_reply(text: &str) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::String(inner)) => inner,
        Ok(Value::Object(fields)) => match reply_field(&fields) {
            Some(Value::String(inner)) => inner.clone(),
            _ => text.to_string(),
        },
        _ if text.trim().is_empty() => NO_RESPONSE_TEXT.to_string(),
        _ => text.to_string(),
    }
}

/// Two-stage retrieve-then-split pipeline over the knowledge services.
#[derive(Debug, Clone)]
pub struct KnowledgeClient {
    client: reqwest::Client,
    rag_url: String,
    split_url: String,
}

impl KnowledgeClient {
    pub fn new(rag_url: impl Into<String>, split_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            rag_url: rag_url.into(),
            split_url: split_url.into(),
        }
    }

    /// Retrieves context for `query` and returns it split into paragraph groups.
    pub async fn retrieve_and_split(
        &self,
        model_name: &str,
        query: &str,
    ) -> TransportResult<Vec<Vec<String>>> {
        let retrieve_url = join_url(&self.rag_url, "retrieve");
        let retrieved: RetrieveResponse = post_for_json(
            &self.client,
            &retrieve_url,
            &RetrievePayload { model_name, query },
            "retrieve",
        )
        .await?;

        if retrieved.context.trim().is_empty() {
            tracing::info!(model_name, "retrieval returned no context");
            return Ok(Vec::new());
        }

        let split_url = join_url(&self.split_url, "split");
        let split: SplitResponse = post_for_json(
            &self.client,
            &split_url,
            &SplitPayload {
                text: &retrieved.context,
            },
            "split",
        )
        .await?;

        Ok(split
            .groups
            .into_iter()
            .map(|group| {
                group
                    .into_iter()
                    .map(|paragraph| paragraph.trim().to_string())
                    .filter(|paragraph| !paragraph.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|group| !group.is_empty())
            .collect())
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

async fn post_for_text<B: Serialize + ?Sized>(
    client: &reqwest::Client,
    endpoint: &str,
    payload: &B,
    stage: &'static str,
) -> TransportResult<String> {
    let response = client
        .post(endpoint)
        .json(payload)
        .send()
        .await
        .map_err(|source| TransportError::Request {
            stage,
            endpoint: endpoint.to_string(),
            message: source.to_string(),
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| TransportError::Decode {
            stage,
            endpoint: endpoint.to_string(),
            details: source.to_string(),
        })?;

    if !status.is_success() {
        tracing::warn!(endpoint, status = status.as_u16(), "backend returned an error status");
        return Err(TransportError::Status {
            stage,
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    Ok(body)
}

async fn post_for_json<B, T>(
    client: &reqwest::Client,
    endpoint: &str,
    payload: &B,
    stage: &'static str,
) -> TransportResult<T>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let body = post_for_text(client, endpoint, payload, stage).await?;
    serde_json::from_str(&body).map_err(|source| TransportError::Decode {
        stage,
        endpoint: endpoint.to_string(),
        details: source.to_string(),
    })
}
