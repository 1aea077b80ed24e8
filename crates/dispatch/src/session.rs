use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::gate::{
    DispatchEvent, DispatchGate, DispatchId, GateConfig, GateRejection, GateStep, TimerDirective,
};
use crate::message::{ChatHistory, ChatMessage};
use crate::timer::{DebounceTimer, TimerTicket};
use crate::transport::{ChunkTransport, TransportResult};

/// Chat text shown when a dispatch fails.
pub const DISPATCH_ERROR_TEXT: &str = "error";

pub type SessionWorker = Pin<Box<dyn Future<Output = ChatHistory> + Send + 'static>>;

/// Everything the session loop reacts to, processed one at a time.
#[derive(Debug)]
pub enum SessionEvent {
    /// Full current text of the input box.
    Input(String),
    /// Fragment produced by a transcriber.
    Append(String),
    Submit,
    Stop,
    StartTurn,
    TimerFired(TimerTicket),
    DispatchCompleted {
        id: DispatchId,
        result: TransportResult<String>,
    },
    Shutdown,
}

/// Notifications for whoever renders the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Dispatched(DispatchEvent),
    MessageAppended(ChatMessage),
    InputRejected(GateRejection),
}

/// Cloneable front door of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    pub fn input(&self, text: impl Into<String>) -> bool {
        self.send(SessionEvent::Input(text.into()))
    }

    pub fn append(&self, fragment: impl Into<String>) -> bool {
        self.send(SessionEvent::Append(fragment.into()))
    }

    pub fn submit(&self) -> bool {
        self.send(SessionEvent::Submit)
    }

    pub fn stop(&self) -> bool {
        self.send(SessionEvent::Stop)
    }

    pub fn start_turn(&self) -> bool {
        self.send(SessionEvent::StartTurn)
    }

    pub fn shutdown(&self) -> bool {
        self.send(SessionEvent::Shutdown)
    }

    fn send(&self, event: SessionEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

pub struct SessionParts {
    pub handle: SessionHandle,
    pub updates: mpsc::UnboundedReceiver<SessionUpdate>,
    /// Drives the session until shutdown and yields the final history. Spawn it on tokio.
    pub worker: SessionWorker,
}

/// Builds a "student teaches" session over `transport`.
pub fn spawn_session(config: GateConfig, transport: Arc<dyn ChunkTransport>) -> SessionParts {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();

    let session = Session {
        gate: DispatchGate::new(config),
        timer: DebounceTimer::new(),
        history: ChatHistory::new(),
        transport,
        events_tx: events_tx.downgrade(),
        completions_tx,
        updates_tx,
    };

    SessionParts {
        handle: SessionHandle { events: events_tx },
        updates: updates_rx,
        worker: Box::pin(session.run(events_rx, completions_rx)),
    }
}

struct Session {
    gate: DispatchGate,
    timer: DebounceTimer,
    history: ChatHistory,
    transport: Arc<dyn ChunkTransport>,
    // Weak so the loop ends once every handle is gone.
    events_tx: mpsc::WeakUnboundedSender<SessionEvent>,
    completions_tx: mpsc::UnboundedSender<SessionEvent>,
    updates_tx: mpsc::UnboundedSender<SessionUpdate>,
}

impl Session {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        mut completions: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> ChatHistory {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SessionEvent::Shutdown) => {
                        tracing::debug!("session shutdown requested");
                        break;
                    }
                    Some(event) => self.handle(event),
                    None => {
                        tracing::debug!("all session handles dropped");
                        break;
                    }
                },
                Some(event) = completions.recv() => self.handle(event),
            }
        }

        self.finish(&mut completions).await;
        self.history
    }

    /// Sends the words still waiting for the quiet interval, then collects every
    /// outstanding reply.
    async fn finish(&mut self, completions: &mut mpsc::UnboundedReceiver<SessionEvent>) {
        self.timer.cancel();
        let step = self.gate.on_timer();
        self.apply(step);

        while !self.gate.in_flight().is_empty() {
            tracing::debug!(
                in_flight = self.gate.in_flight().len(),
                "waiting for dispatches before shutdown"
            );
            let Some(event) = completions.recv().await else {
                break;
            };
            self.handle(event);
        }
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Input(text) => {
                let result = self.gate.on_input(text);
                self.apply_result(result);
            }
            SessionEvent::Append(fragment) => {
                let result = self.gate.on_append(&fragment);
                self.apply_result(result);
            }
            SessionEvent::Submit => {
                let result = self.gate.on_submit();
                self.apply_result(result);
            }
            SessionEvent::Stop => {
                let result = self.gate.on_stop();
                self.apply_result(result);
            }
            SessionEvent::StartTurn => self.gate.start_turn(),
            SessionEvent::TimerFired(ticket) => {
                if !self.timer.settle(ticket) {
                    tracing::trace!(ticket = ticket.0, "ignoring stale timer fire");
                    return;
                }
                let step = self.gate.on_timer();
                self.apply(step);
            }
            SessionEvent::DispatchCompleted { id, result } => {
                self.gate.on_dispatch_settled(id);
                let text = match result {
                    Ok(text) => text,
                    Err(error) => {
                        tracing::warn!(dispatch_id = id.0, error = %error, "chunk dispatch failed");
                        DISPATCH_ERROR_TEXT.to_string()
                    }
                };
                let message = self.history.push_ai(text).clone();
                self.notify(SessionUpdate::MessageAppended(message));
            }
            SessionEvent::Shutdown => {}
        }
    }

    fn apply_result(&mut self, result: Result<GateStep, GateRejection>) {
        match result {
            Ok(step) => self.apply(step),
            Err(rejection) => {
                tracing::debug!(?rejection, "input rejected");
                self.notify(SessionUpdate::InputRejected(rejection));
            }
        }
    }

    fn apply(&mut self, step: GateStep) {
        match step.timer {
            TimerDirective::Keep => {}
            TimerDirective::Cancel => {
                self.timer.cancel();
            }
            TimerDirective::Arm(delay) => {
                let events_tx = self.events_tx.clone();
                self.timer.arm(delay, move |ticket| {
                    if let Some(events_tx) = events_tx.upgrade() {
                        let _ = events_tx.send(SessionEvent::TimerFired(ticket));
                    }
                });
            }
        }

        if let Some(transcript) = step.transcript {
            let message = self.history.push_user(transcript).clone();
            self.notify(SessionUpdate::MessageAppended(message));
        }

        for dispatch in step.dispatches {
            self.start_dispatch(dispatch);
        }
    }

    fn start_dispatch(&mut self, dispatch: DispatchEvent) {
        let completions_tx = self.completions_tx.clone();
        let transport = self.transport.clone();
        let id = dispatch.id;
        let text = dispatch.text.clone();
        self.notify(SessionUpdate::Dispatched(dispatch));

        // Dispatches are independent; completions may arrive in any order.
        tokio::spawn(async move {
            let result = transport
                .dispatch_chunk(&text)
                .await
                .map(|reply| reply.response_text);
            let _ = completions_tx.send(SessionEvent::DispatchCompleted { id, result });
        });
    }

    fn notify(&self, update: SessionUpdate) {
        let _ = self.updates_tx.send(update);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::gate::{DispatchTrigger, WIDGET_QUIET};
    use crate::message::Sender;
    use crate::transport::{BoxFuture, ChunkReply, TransportError};

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
        fail: bool,
        delay: Duration,
    }

    impl RecordingTransport {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ChunkTransport for RecordingTransport {
        fn dispatch_chunk<'a>(
            &'a self,
            text: &'a str,
        ) -> BoxFuture<'a, TransportResult<ChunkReply>> {
            Box::pin(async move {
                self.sent.lock().unwrap().push(text.to_string());
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if self.fail {
                    Err(TransportError::Request {
                        stage: "test",
                        endpoint: "memory".to_string(),
                        message: "connection refused".to_string(),
                    })
                } else {
                    Ok(ChunkReply::new(format!("ack: {text}")))
                }
            })
        }
    }

    fn start(
        transport: Arc<RecordingTransport>,
    ) -> (
        SessionHandle,
        mpsc::UnboundedReceiver<SessionUpdate>,
        tokio::task::JoinHandle<ChatHistory>,
    ) {
        let parts = spawn_session(GateConfig::widget(), transport);
        let worker = tokio::spawn(parts.worker);
        (parts.handle, parts.updates, worker)
    }

    fn dispatched(updates: &mut mpsc::UnboundedReceiver<SessionUpdate>) -> Vec<DispatchEvent> {
        let mut out = Vec::new();
        while let Ok(update) = updates.try_recv() {
            if let SessionUpdate::Dispatched(event) = update {
                out.push(event);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_interval_flushes_short_input_once() {
        let transport = Arc::new(RecordingTransport::default());
        let (handle, mut updates, worker) = start(transport.clone());

        handle.input("hello");
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.input("hello world");

        // Three seconds after the first input but not after the last one.
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(dispatched(&mut updates).is_empty());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let events = dispatched(&mut updates);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text, "hello world");
        assert_eq!(events[0].trigger, DispatchTrigger::Timeout);

        tokio::time::sleep(WIDGET_QUIET * 2).await;
        assert!(dispatched(&mut updates).is_empty());

        handle.shutdown();
        let history = worker.await.unwrap();
        assert_eq!(transport.sent(), vec!["hello world".to_string()]);
        assert_eq!(history.len(), 1);
        assert_eq!(history.messages()[0].sender, Sender::Ai);
        assert_eq!(history.messages()[0].text, "ack: hello world");
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_dispatch_is_not_repeated_by_timer() {
        let transport = Arc::new(RecordingTransport::default());
        let (handle, mut updates, worker) = start(transport.clone());

        handle.input("the quick brown fox");
        handle.input("the quick brown fox jumps over the lazy dog now");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let events = dispatched(&mut updates);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].trigger, DispatchTrigger::Threshold);

        tokio::time::sleep(WIDGET_QUIET * 3).await;
        assert!(dispatched(&mut updates).is_empty());

        handle.shutdown();
        worker.await.unwrap();
        assert_eq!(
            transport.sent(),
            vec!["the quick brown fox jumps over the lazy dog now".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dispatch_appends_one_error_message() {
        let transport = Arc::new(RecordingTransport::failing());
        let (handle, _updates, worker) = start(transport.clone());

        handle.input("hello world");
        tokio::time::sleep(WIDGET_QUIET + Duration::from_millis(100)).await;
        // The boundary already covers the failed words, so nothing is retried.
        handle.input("hello world again");
        tokio::time::sleep(WIDGET_QUIET + Duration::from_millis(100)).await;

        handle.shutdown();
        let history = worker.await.unwrap();
        assert_eq!(
            transport.sent(),
            vec!["hello world".to_string(), "again".to_string()]
        );
        assert_eq!(history.len(), 2);
        assert!(
            history
                .messages()
                .iter()
                .all(|message| message.sender == Sender::Ai && message.text == DISPATCH_ERROR_TEXT)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_flushes_and_records_the_whole_turn() {
        let transport = Arc::new(RecordingTransport::default());
        let (handle, mut updates, worker) = start(transport.clone());

        handle.input("a b c d e f g h i j k l");
        handle.stop();
        handle.input("ignored while closed");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut rejected = 0;
        let mut user_messages = Vec::new();
        while let Ok(update) = updates.try_recv() {
            match update {
                SessionUpdate::InputRejected(GateRejection::TurnClosed) => rejected += 1,
                SessionUpdate::MessageAppended(message) if message.sender == Sender::User => {
                    user_messages.push(message.text)
                }
                _ => {}
            }
        }
        assert_eq!(rejected, 1);
        assert_eq!(user_messages, vec!["a b c d e f g h i j k l".to_string()]);

        handle.start_turn();
        handle.input("new turn");
        handle.submit();
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.shutdown();
        let history = worker.await.unwrap();
        assert_eq!(
            transport.sent(),
            vec![
                "a b c d e f g h i j".to_string(),
                "k l".to_string(),
                "new turn".to_string(),
            ]
        );
        assert_eq!(history.from_sender(Sender::User).count(), 2);
        assert_eq!(history.from_sender(Sender::Ai).count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_sends_words_still_waiting_for_the_timer() {
        let transport = Arc::new(RecordingTransport::default());
        let (handle, _updates, worker) = start(transport.clone());

        handle.append("hello");
        handle.append("world");
        handle.shutdown();

        let history = worker.await.unwrap();
        assert_eq!(transport.sent(), vec!["hello world".to_string()]);
        assert_eq!(history.len(), 1);
        assert_eq!(history.messages()[0].text, "ack: hello world");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_replies_in_flight() {
        let transport = Arc::new(RecordingTransport::slow(Duration::from_secs(2)));
        let (handle, _updates, worker) = start(transport.clone());

        handle.input("a b c d e f g h i j");
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.shutdown();

        let history = worker.await.unwrap();
        assert_eq!(transport.sent(), vec!["a b c d e f g h i j".to_string()]);
        assert_eq!(history.len(), 1);
        assert_eq!(history.messages()[0].sender, Sender::Ai);
        assert_eq!(history.messages()[0].text, "ack: a b c d e f g h i j");
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_also_flushes() {
        let transport = Arc::new(RecordingTransport::slow(Duration::from_millis(500)));
        let (handle, _updates, worker) = start(transport.clone());

        handle.input("last words");
        drop(handle);

        let history = worker.await.unwrap();
        assert_eq!(transport.sent(), vec!["last words".to_string()]);
        assert_eq!(history.len(), 1);
    }
}
