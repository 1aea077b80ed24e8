#![deny(unsafe_code)]

//! Auralis tutoring client: settings, backend transports, the topic tutor and the CLI.

pub mod cli;
mod error;
pub mod settings;
pub mod transport;
pub mod tutor;

pub use error::{AppError, AppResult};
pub use settings::{InputSurface, Settings, SettingsError, SettingsStore};
pub use transport::{HttpChunkTransport, KnowledgeClient, parse_chunk_reply};
pub use tutor::{TopicError, TopicRequest, Tutor, TutorError, parse_subtopics};
