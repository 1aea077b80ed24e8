/// Stable identifier for one chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    User,
    Ai,
}

/// Immutable entry of a conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: Sender,
    pub text: String,
}

/// Append-only conversation history ordered by arrival.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
    next_id: u64,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sender: Sender, text: impl Into<String>) -> &ChatMessage {
        self.next_id = self.next_id.saturating_add(1);
        self.messages.push(ChatMessage {
            id: MessageId::new(self.next_id),
            sender,
            text: text.into(),
        });

        let last = self.messages.len() - 1;
        &self.messages[last]
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> &ChatMessage {
        self.push(Sender::User, text)
    }

    pub fn push_ai(&mut self, text: impl Into<String>) -> &ChatMessage {
        self.push(Sender::Ai, text)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn from_sender(&self, sender: Sender) -> impl Iterator<Item = &ChatMessage> {
        self.messages
            .iter()
            .filter(move |message| message.sender == sender)
    }
}
