#![deny(unsafe_code)]

//! Incremental chunked-input dispatch for the "student teaches" flow.
//!
//! Typed or transcribed words accumulate in a buffer. They are sent as soon as a word
//! threshold is reached, or once the input has been quiet for a configured interval.
//! A sent boundary guarantees no word is dispatched twice.

/// Count of leading words already dispatched.
pub mod boundary;
/// State machine deciding when accumulated words are sent.
pub mod gate;
/// Chat history entities.
pub mod message;
/// Actor that owns one session's gate, timer and history.
pub mod session;
/// Single-slot cancelable delayed task.
pub mod timer;
/// Whitespace word splitting.
pub mod tokenizer;
/// Transport adapter seam.
pub mod transport;

pub use boundary::SentBoundary;
pub use gate::{
    DEFAULT_THRESHOLD_WORDS, DispatchEvent, DispatchGate, DispatchId, DispatchTrigger,
    FULL_SCREEN_QUIET, GateConfig, GateRejection, GateState, GateStep, TimerDirective,
    WIDGET_QUIET,
};
pub use message::{ChatHistory, ChatMessage, MessageId, Sender};
pub use session::{
    DISPATCH_ERROR_TEXT, SessionEvent, SessionHandle, SessionParts, SessionUpdate, SessionWorker,
    spawn_session,
};
pub use timer::{DebounceTimer, TimerTicket};
pub use tokenizer::{join_tokens, tokenize, word_count};
pub use transport::{
    BoxFuture, ChunkReply, ChunkTransport, NO_RESPONSE_TEXT, TransportError, TransportResult,
};
