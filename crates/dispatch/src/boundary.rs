/// Marks how many leading tokens of the current turn have already been dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SentBoundary {
    sent: usize,
}

impl SentBoundary {
    pub const fn new() -> Self {
        Self { sent: 0 }
    }

    pub const fn sent(&self) -> usize {
        self.sent
    }

    /// Returns the suffix of `tokens` that has not been dispatched yet.
    ///
    /// When the boundary lies past the end of `tokens` (the user deleted words that
    /// were already sent) the suffix is empty.
    pub fn unsent<'a, T>(&self, tokens: &'a [T]) -> &'a [T] {
        tokens.get(self.sent..).unwrap_or(&[])
    }

    /// Moves the boundary forward after a dispatch decision.
    pub fn advance(&mut self, by: usize) {
        self.sent = self.sent.saturating_add(by);
    }

    pub fn reset(&mut self) {
        self.sent = 0;
    }
}
