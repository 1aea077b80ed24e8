use std::time::Duration;

use crate::boundary::SentBoundary;
use crate::tokenizer::{join_tokens, tokenize};

pub const DEFAULT_THRESHOLD_WORDS: usize = 10;
/// Quiet interval of the lightweight floating input widget.
pub const WIDGET_QUIET: Duration = Duration::from_millis(3_000);
/// Quiet interval of the full-screen teaching view.
pub const FULL_SCREEN_QUIET: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    pub threshold_words: usize,
    pub quiet: Duration,
}

impl GateConfig {
    /// A zero threshold would dispatch empty payloads, so it is raised to one word.
    pub fn new(threshold_words: usize, quiet: Duration) -> Self {
        Self {
            threshold_words: threshold_words.max(1),
            quiet,
        }
    }

    pub fn widget() -> Self {
        Self::new(DEFAULT_THRESHOLD_WORDS, WIDGET_QUIET)
    }

    pub fn full_screen() -> Self {
        Self::new(DEFAULT_THRESHOLD_WORDS, FULL_SCREEN_QUIET)
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::widget()
    }
}

/// Identifier of one dispatch, unique within a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DispatchId(pub u64);

/// What caused a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchTrigger {
    Threshold,
    Timeout,
    ManualSubmit,
    ManualStop,
}

/// One decision to send text, consumed once by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchEvent {
    pub id: DispatchId,
    pub text: String,
    pub trigger: DispatchTrigger,
}

/// Input-side lifecycle of the current speaking turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    /// No unsent words and nothing in flight.
    #[default]
    Idle,
    /// Unsent words below the threshold, waiting for the quiet timer.
    Accumulating,
    /// Everything typed has been handed off; at least one dispatch is in flight.
    Flushing,
    /// The turn was ended with a stop; input is refused until a new turn starts.
    Closed,
}

/// What the owner of the gate must do with its debounce timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerDirective {
    Keep,
    Arm(Duration),
    Cancel,
}

/// Outcome of feeding one event into the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateStep {
    /// Dispatches in token order.
    pub dispatches: Vec<DispatchEvent>,
    pub timer: TimerDirective,
    /// User-authored text to append to the chat history.
    pub transcript: Option<String>,
}

impl GateStep {
    fn keep() -> Self {
        Self {
            dispatches: Vec::new(),
            timer: TimerDirective::Keep,
            transcript: None,
        }
    }

    fn with_timer(timer: TimerDirective) -> Self {
        Self {
            timer,
            ..Self::keep()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    TurnClosed,
}

/// Decides when accumulated words are sent.
///
/// The gate never truncates its buffer while a turn segment is open: the sent boundary
/// alone keeps already-dispatched words from being sent twice. Both are reset together
/// by a submit or a stop.
///
/// The boundary counts words, not characters. When the threshold is reached while a
/// word is still being typed (`"... nine t"`), the partial word is sent as it stands,
/// and later edits completing it (`"ten"`) stay behind the boundary and are not sent.
#[derive(Debug, Clone)]
pub struct DispatchGate {
    config: GateConfig,
    buffer: String,
    boundary: SentBoundary,
    // Highest token count seen in the current segment.
    observed_words: usize,
    state: GateState,
    in_flight: Vec<DispatchId>,
    next_dispatch_id: u64,
}

impl DispatchGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            boundary: SentBoundary::new(),
            observed_words: 0,
            state: GateState::Idle,
            in_flight: Vec::new(),
            next_dispatch_id: 1,
        }
    }

    pub fn config(&self) -> GateConfig {
        self.config
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn sent_words(&self) -> usize {
        self.boundary.sent()
    }

    pub fn observed_words(&self) -> usize {
        self.observed_words
    }

    pub fn unsent_words(&self) -> usize {
        self.boundary.unsent(&tokenize(&self.buffer)).len()
    }

    pub fn in_flight(&self) -> &[DispatchId] {
        &self.in_flight
    }

    /// Replaces the buffer with the full current text of the turn.
    pub fn on_input(&mut self, text: impl Into<String>) -> Result<GateStep, GateRejection> {
        self.ensure_open()?;
        self.buffer = text.into();
        Ok(self.evaluate_input())
    }

    /// Extends the buffer with a transcribed fragment.
    pub fn on_append(&mut self, fragment: &str) -> Result<GateStep, GateRejection> {
        self.ensure_open()?;
        if !self.buffer.is_empty() && !fragment.is_empty() {
            self.buffer.push(' ');
        }
        self.buffer.push_str(fragment);
        Ok(self.evaluate_input())
    }

    /// Flushes the words left after the quiet interval.
    ///
    /// Complete threshold-sized chunks (only possible after a large paste) go out first
    /// as `Threshold` dispatches, then the remainder as one `Timeout` dispatch.
    pub fn on_timer(&mut self) -> GateStep {
        if self.state == GateState::Closed {
            return GateStep::keep();
        }

        let threshold = self.config.threshold_words;
        let mut dispatches = Vec::new();
        loop {
            let tokens = tokenize(&self.buffer);
            let unsent = self.boundary.unsent(&tokens);
            if unsent.is_empty() {
                break;
            }

            let (take, trigger) = if unsent.len() >= threshold {
                (threshold, DispatchTrigger::Threshold)
            } else {
                (unsent.len(), DispatchTrigger::Timeout)
            };
            let payload = join_tokens(&unsent[..take]);
            self.boundary.advance(take);
            dispatches.push(self.issue(payload, trigger));
        }

        self.settle();
        GateStep {
            dispatches,
            timer: TimerDirective::Keep,
            transcript: None,
        }
    }

    /// Sends every unsent word now and starts a fresh segment.
    pub fn on_submit(&mut self) -> Result<GateStep, GateRejection> {
        self.ensure_open()?;
        let mut step = self.close_segment(DispatchTrigger::ManualSubmit);
        step.timer = TimerDirective::Cancel;
        self.settle();
        Ok(step)
    }

    /// Ends the speaking turn.
    pub fn on_stop(&mut self) -> Result<GateStep, GateRejection> {
        self.ensure_open()?;
        let mut step = self.close_segment(DispatchTrigger::ManualStop);
        step.timer = TimerDirective::Cancel;
        self.state = GateState::Closed;
        Ok(step)
    }

    /// Reopens a closed turn. No-op for an open one.
    pub fn start_turn(&mut self) {
        if self.state == GateState::Closed {
            self.state = GateState::Idle;
            self.settle();
        }
    }

    /// Records the completion of a dispatch, whatever the transport outcome.
    ///
    /// Returns `false` for ids that are not in flight.
    pub fn on_dispatch_settled(&mut self, id: DispatchId) -> bool {
        let Some(position) = self.in_flight.iter().position(|pending| *pending == id) else {
            return false;
        };
        self.in_flight.swap_remove(position);
        self.settle();
        true
    }

    fn ensure_open(&self) -> Result<(), GateRejection> {
        if self.state == GateState::Closed {
            Err(GateRejection::TurnClosed)
        } else {
            Ok(())
        }
    }

    fn evaluate_input(&mut self) -> GateStep {
        let threshold = self.config.threshold_words;
        let tokens = tokenize(&self.buffer);
        self.observed_words = self.observed_words.max(tokens.len());
        let unsent = self.boundary.unsent(&tokens);

        let step = if unsent.len() >= threshold {
            let payload = join_tokens(&unsent[..threshold]);
            let remainder = unsent.len() - threshold;
            self.boundary.advance(threshold);
            let dispatch = self.issue(payload, DispatchTrigger::Threshold);

            // Evaluated once per input event: leftover words wait for the next
            // keystroke or the quiet timer.
            let timer = if remainder > 0 {
                TimerDirective::Arm(self.config.quiet)
            } else {
                TimerDirective::Cancel
            };
            GateStep {
                dispatches: vec![dispatch],
                timer,
                transcript: None,
            }
        } else if unsent.is_empty() {
            GateStep::with_timer(TimerDirective::Cancel)
        } else {
            GateStep::with_timer(TimerDirective::Arm(self.config.quiet))
        };

        self.settle();
        step
    }

    fn close_segment(&mut self, trigger: DispatchTrigger) -> GateStep {
        let tokens = tokenize(&self.buffer);
        let unsent = self.boundary.unsent(&tokens);
        let payload = (!unsent.is_empty()).then(|| join_tokens(unsent));

        let mut step = GateStep::keep();
        if !tokens.is_empty() {
            step.transcript = Some(join_tokens(&tokens));
        }
        if let Some(payload) = payload {
            step.dispatches.push(self.issue(payload, trigger));
        }

        self.buffer.clear();
        self.boundary.reset();
        self.observed_words = 0;
        step
    }

    fn issue(&mut self, text: String, trigger: DispatchTrigger) -> DispatchEvent {
        let id = DispatchId(self.next_dispatch_id);
        self.next_dispatch_id = self.next_dispatch_id.saturating_add(1);
        self.in_flight.push(id);

        tracing::debug!(
            dispatch_id = id.0,
            trigger = ?trigger,
            words = text.split(' ').count(),
            "dispatch issued"
        );

        DispatchEvent { id, text, trigger }
    }

    fn settle(&mut self) {
        debug_assert!(self.boundary.sent() <= self.observed_words);

        if self.state == GateState::Closed {
            return;
        }

        self.state = if self.unsent_words() > 0 {
            GateState::Accumulating
        } else if !self.in_flight.is_empty() {
            GateState::Flushing
        } else {
            GateState::Idle
        };
    }
}
