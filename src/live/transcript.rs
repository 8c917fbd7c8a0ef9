//! Running transcript of the current conversational turn.
//!
//! Both sides accumulate by plain concatenation of the deltas the endpoint sends.
//! A completed turn resets both strings.

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranscriptState {
    pub user: String,
    pub assistant: String,
}

impl TranscriptState {
    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.assistant.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    state: TranscriptState,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_user(&mut self, delta: &str) {
        self.state.user.push_str(delta);
    }

    pub fn append_assistant(&mut self, delta: &str) {
        self.state.assistant.push_str(delta);
    }

    /// Close the turn, returning what was said during it.
    pub fn complete_turn(&mut self) -> TranscriptState {
        std::mem::take(&mut self.state)
    }

    pub fn clear(&mut self) {
        self.state = TranscriptState::default();
    }

    pub fn state(&self) -> &TranscriptState {
        &self.state
    }
}
