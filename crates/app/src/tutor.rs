use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use auralis_llm::{LlmProvider, ProviderError, ProviderStreamHandle, TextRequest};
use regex::Regex;
use snafu::{ResultExt, Snafu, ensure};

const SUBTOPIC_COUNT: usize = 10;
const SUBTOPIC_TEMPERATURE: f64 = 0.2;
const SUBTOPIC_MAX_TOKENS: u64 = 1024;
const EXPLANATION_TEMPERATURE: f64 = 0.2;
const EXPLANATION_MAX_TOKENS: u64 = 2048;
const TUTOR_PREAMBLE: &str = "You are a patient tutor. Answer for a student meeting the topic \
     for the first time, in plain language.";

static BRACKETED_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[(.*)\]").expect("bracketed list pattern is valid"));
static LEADING_NUMBERING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+[.)\-]\s*").expect("numbering pattern is valid"));

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TopicError {
    #[snafu(display("please enter a topic name"))]
    EmptyTopic { stage: &'static str },
    #[snafu(display("'{tag}' is not a valid http(s) link"))]
    InvalidTag { stage: &'static str, tag: String },
    #[snafu(display("attachment {path:?} does not exist"))]
    MissingAttachment { stage: &'static str, path: PathBuf },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TutorError {
    #[snafu(display("invalid topic request: {source}"))]
    Topic {
        stage: &'static str,
        source: TopicError,
    },
    #[snafu(display("failed to fetch subtopics for '{topic}': {source}"))]
    Subtopics {
        stage: &'static str,
        topic: String,
        source: ProviderError,
    },
    #[snafu(display("model returned no subtopics for '{topic}'"))]
    NoSubtopics { stage: &'static str, topic: String },
    #[snafu(display("failed to fetch explanation for '{subtopic}': {source}"))]
    Explanation {
        stage: &'static str,
        subtopic: String,
        source: ProviderError,
    },
    #[snafu(display("please pick a subtopic to explain"))]
    EmptySubtopic { stage: &'static str },
}

/// Form state of the "AI teaches" topic picker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicRequest {
    pub topic: String,
    pub tags: Vec<String>,
    pub auto_search: bool,
    pub attachment: Option<PathBuf>,
}

impl TopicRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Adds a reference link. Blank input and duplicates are ignored.
    ///
    /// Returns whether the tag list changed.
    pub fn add_tag(&mut self, tag: &str) -> Result<bool, TopicError> {
        let tag = tag.trim();
        if tag.is_empty() || self.tags.iter().any(|existing| existing == tag) {
            return Ok(false);
        }

        ensure!(
            is_web_link(tag),
            InvalidTagSnafu {
                stage: "add-tag",
                tag: tag.to_string(),
            }
        );

        self.tags.push(tag.to_string());
        Ok(true)
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|existing| existing != tag.trim());
        self.tags.len() != before
    }

    pub fn validate(&self) -> Result<(), TopicError> {
        ensure!(
            !self.topic.trim().is_empty(),
            EmptyTopicSnafu {
                stage: "validate-topic",
            }
        );

        if let Some(path) = &self.attachment {
            ensure!(
                path.exists(),
                MissingAttachmentSnafu {
                    stage: "validate-attachment",
                    path: path.clone(),
                }
            );
        }

        Ok(())
    }

    fn subtopic_prompt(&self) -> String {
        let topic = self.topic.trim();
        let mut prompt = format!(
            "Generate a list of {SUBTOPIC_COUNT} educational subtopics for the main topic: \"{topic}\".\n\
             Format the response as a plain array of strings with no numbering or bullets.\n\
             For example, if the topic is \"DBMS\", return subtopics like \
             [\"Introduction to DBMS\", \"Database Architecture\", \"Normalization in DBMS\", etc.]"
        );

        if !self.tags.is_empty() {
            prompt.push_str("\nPrefer material covered by these references: ");
            prompt.push_str(&self.tags.join(", "));
        }
        if let Some(name) = self
            .attachment
            .as_ref()
            .and_then(|path| path.file_name())
            .and_then(|name| name.to_str())
        {
            prompt.push_str(&format!("\nThe student supplied a document named \"{name}\"."));
        }
        if self.auto_search {
            prompt.push_str("\nYou may draw on up-to-date public sources.");
        }

        prompt
    }
}

fn is_web_link(tag: &str) -> bool {
    reqwest::Url::parse(tag)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

fn explanation_prompt(subtopic: &str) -> String {
    format!(
        "Provide a detailed explanation of the subtopic: \"{subtopic}\".\n\
         The explanation should be comprehensive and educational, suitable for a student."
    )
}

/// Turns a model reply into a subtopic list.
///
/// A bracketed JSON array anywhere in the reply wins. Otherwise every non-blank line
/// becomes a subtopic with any leading `1.`, `2)` or `3-` numbering removed.
pub fn parse_subtopics(reply: &str) -> Vec<String> {
    if let Some(inner) = BRACKETED_LIST
        .captures(reply)
        .and_then(|captures| captures.get(1))
    {
        match serde_json::from_str::<Vec<String>>(&format!("[{}]", inner.as_str())) {
            Ok(items) => {
                return items
                    .into_iter()
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect();
            }
            Err(error) => {
                tracing::debug!(error = %error, "bracketed subtopic list is not valid JSON");
            }
        }
    }

    reply
        .lines()
        .map(|line| LEADING_NUMBERING.replace(line.trim(), "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// "AI teaches student" flow over a generative-language provider.
pub struct Tutor {
    provider: Arc<dyn LlmProvider>,
    model_id: String,
}

impl Tutor {
    pub fn new(provider: Arc<dyn LlmProvider>, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub async fn request_subtopics(&self, request: &TopicRequest) -> Result<Vec<String>, TutorError> {
        request.validate().context(TopicSnafu {
            stage: "request-subtopics-validate",
        })?;

        let topic = request.topic.trim().to_string();
        let text_request = TextRequest::new(&self.model_id, request.subtopic_prompt())
            .with_preamble(TUTOR_PREAMBLE)
            .with_temperature(SUBTOPIC_TEMPERATURE)
            .with_max_tokens(SUBTOPIC_MAX_TOKENS);

        let reply = self
            .provider
            .complete(text_request)
            .await
            .context(SubtopicsSnafu {
                stage: "request-subtopics-complete",
                topic: topic.clone(),
            })?;

        let subtopics = parse_subtopics(&reply);
        tracing::info!(topic = %topic, count = subtopics.len(), "subtopics received");
        ensure!(
            !subtopics.is_empty(),
            NoSubtopicsSnafu {
                stage: "request-subtopics-parse",
                topic,
            }
        );
        Ok(subtopics)
    }

    pub async fn request_explanation(&self, subtopic: &str) -> Result<String, TutorError> {
        let text_request = self.explanation_request(subtopic)?;
        self.provider
            .complete(text_request)
            .await
            .context(ExplanationSnafu {
                stage: "request-explanation-complete",
                subtopic: subtopic.trim().to_string(),
            })
    }

    /// Streams the explanation as text deltas. Dropping the stream cancels it.
    pub fn stream_explanation(&self, subtopic: &str) -> Result<ProviderStreamHandle, TutorError> {
        let text_request = self.explanation_request(subtopic)?;
        self.provider
            .stream_text(text_request)
            .context(ExplanationSnafu {
                stage: "stream-explanation-open",
                subtopic: subtopic.trim().to_string(),
            })
    }

    fn explanation_request(&self, subtopic: &str) -> Result<TextRequest, TutorError> {
        let subtopic = subtopic.trim();
        ensure!(
            !subtopic.is_empty(),
            EmptySubtopicSnafu {
                stage: "explanation-request",
            }
        );

        Ok(TextRequest::new(&self.model_id, explanation_prompt(subtopic))
            .with_preamble(TUTOR_PREAMBLE)
            .with_temperature(EXPLANATION_TEMPERATURE)
            .with_max_tokens(EXPLANATION_MAX_TOKENS))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use auralis_llm::{BoxFuture, ProviderResult};

    use super::*;

    struct CannedProvider {
        reply: Result<String, &'static str>,
        requests: Mutex<Vec<TextRequest>>,
    }

    impl CannedProvider {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err("quota exceeded"),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    impl LlmProvider for CannedProvider {
        fn id(&self) -> &str {
            "canned"
        }

        fn name(&self) -> &str {
            "Canned"
        }

        fn default_model(&self) -> &str {
            "canned-model"
        }

        fn complete<'a>(&'a self, request: TextRequest) -> BoxFuture<'a, ProviderResult<String>> {
            self.requests.lock().unwrap().push(request.clone());
            let reply = self.reply.clone();
            Box::pin(async move {
                reply.map_err(|provider_id| ProviderError::UnsupportedProvider {
                    stage: "canned",
                    provider_id: provider_id.to_string(),
                })
            })
        }

        fn stream_text(&self, _request: TextRequest) -> ProviderResult<ProviderStreamHandle> {
            Err(ProviderError::UnsupportedProvider {
                stage: "canned",
                provider_id: "canned".to_string(),
            })
        }
    }

    #[test]
    fn bracketed_reply_is_parsed_as_json_array() {
        let reply = "Here you go:\n```json\n[\"Introduction to DBMS\", \"Normalization\", \" \"]\n```";
        assert_eq!(
            parse_subtopics(reply),
            vec!["Introduction to DBMS".to_string(), "Normalization".to_string()]
        );
    }

    #[test]
    fn numbered_lines_are_the_fallback() {
        let reply = "1. Cell structure\n2) Mitosis\n\n3- Meiosis\nGenetics";
        assert_eq!(
            parse_subtopics(reply),
            vec!["Cell structure", "Mitosis", "Meiosis", "Genetics"]
        );
    }

    #[test]
    fn malformed_brackets_fall_back_to_lines() {
        let reply = "[Cells, Tissues]\n1. Organs";
        assert_eq!(parse_subtopics(reply), vec!["[Cells, Tissues]", "Organs"]);
    }

    #[test]
    fn tags_must_be_distinct_web_links() {
        let mut request = TopicRequest::new("Databases");
        assert!(request.add_tag(" https://example.com/dbms ").unwrap());
        assert!(!request.add_tag("https://example.com/dbms").unwrap());
        assert!(!request.add_tag("   ").unwrap());
        assert!(matches!(
            request.add_tag("not a link"),
            Err(TopicError::InvalidTag { .. })
        ));
        assert!(matches!(
            request.add_tag("ftp://example.com/file"),
            Err(TopicError::InvalidTag { .. })
        ));
        assert_eq!(request.tags, vec!["https://example.com/dbms".to_string()]);

        assert!(request.remove_tag("https://example.com/dbms"));
        assert!(!request.remove_tag("https://example.com/dbms"));
    }

    #[test]
    fn missing_attachment_is_rejected() {
        let request = TopicRequest {
            attachment: Some(PathBuf::from("/definitely/not/here.pdf")),
            ..TopicRequest::new("Biology")
        };
        assert!(matches!(
            request.validate(),
            Err(TopicError::MissingAttachment { .. })
        ));
    }

    #[tokio::test]
    async fn empty_topic_never_reaches_the_provider() {
        let provider = CannedProvider::replying("[\"unused\"]");
        let tutor = Tutor::new(provider.clone(), "canned-model");

        let result = tutor.request_subtopics(&TopicRequest::new("   ")).await;
        assert!(matches!(
            result,
            Err(TutorError::Topic {
                source: TopicError::EmptyTopic { .. },
                ..
            })
        ));
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn subtopic_request_carries_form_context() {
        let provider = CannedProvider::replying("[\"Relational model\", \"SQL\"]");
        let tutor = Tutor::new(provider.clone(), "canned-model");

        let mut request = TopicRequest::new("DBMS");
        request.add_tag("https://db-book.com").unwrap();
        request.auto_search = true;

        let subtopics = tutor.request_subtopics(&request).await.unwrap();
        assert_eq!(subtopics, vec!["Relational model", "SQL"]);

        let sent = provider.requests.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].model_id, "canned-model");
        assert_eq!(sent[0].temperature, Some(SUBTOPIC_TEMPERATURE));
        assert_eq!(sent[0].max_tokens, Some(SUBTOPIC_MAX_TOKENS));
        assert_eq!(sent[0].preamble.as_deref(), Some(TUTOR_PREAMBLE));
        assert!(sent[0].prompt.contains("\"DBMS\""));
        assert!(sent[0].prompt.contains("https://db-book.com"));
        assert!(sent[0].prompt.contains("up-to-date"));
    }

    #[tokio::test]
    async fn blank_reply_reports_no_subtopics() {
        let tutor = Tutor::new(CannedProvider::replying("\n  \n"), "canned-model");
        let result = tutor.request_subtopics(&TopicRequest::new("Physics")).await;
        assert!(matches!(result, Err(TutorError::NoSubtopics { .. })));
    }

    #[tokio::test]
    async fn explanation_errors_are_wrapped() {
        let tutor = Tutor::new(CannedProvider::failing(), "canned-model");
        let error = tutor.request_explanation("Mitosis").await.unwrap_err();
        assert!(error.to_string().contains("Mitosis"));

        let provider = CannedProvider::replying("Mitosis is...");
        let tutor = Tutor::new(provider.clone(), "canned-model");
        assert_eq!(tutor.request_explanation("Mitosis").await.unwrap(), "Mitosis is...");
        {
            let sent = provider.requests.lock().unwrap();
            assert_eq!(sent[0].max_tokens, Some(EXPLANATION_MAX_TOKENS));
            assert_eq!(sent[0].preamble.as_deref(), Some(TUTOR_PREAMBLE));
        }
        assert!(matches!(
            tutor.request_explanation("  ").await,
            Err(TutorError::EmptySubtopic { .. })
        ));
    }
}
