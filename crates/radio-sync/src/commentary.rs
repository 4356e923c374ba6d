//! Live DJ commentary transcript.
//!
//! ```text
//!  Idle ──token──▶ Streaming ──token──▶ Streaming (append)
//!                      │
//!                    ready
//!                      ▼
//!  Idle ◀──clear──── Ready ──token──▶ Streaming (buffer reset to the token)
//! ```
//!
//! The last edge matters: a finished transcript from the previous track must
//! never be extended by the next track's tokens.

use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentaryBuffer {
    pub text: String,
    pub is_streaming: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommentaryPhase {
    #[default]
    Idle,
    Streaming,
    Ready,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentaryState {
    pub phase: CommentaryPhase,
    pub buffer: CommentaryBuffer,
    /// Bumped every time a new transcript starts streaming.  Watchers that
    /// miss intermediate updates use it to tell a continued stream from a
    /// fresh one.
    pub cycle: u64,
}

/// Owns the commentary buffer.  Every transition is applied in place under the
/// watch channel's lock, so readers see either the old or the new buffer.
pub struct CommentaryStreamAccumulator {
    tx: watch::Sender<CommentaryState>,
}

impl Default for CommentaryStreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl CommentaryStreamAccumulator {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CommentaryState::default());
        Self { tx }
    }

    pub fn append_token(&self, token: &str) {
        self.tx.send_modify(|state| {
            match state.phase {
                CommentaryPhase::Streaming => state.buffer.text.push_str(token),
                CommentaryPhase::Idle | CommentaryPhase::Ready => {
                    state.buffer.text.clear();
                    state.buffer.text.push_str(token);
                    state.cycle += 1;
                }
            }
            state.phase = CommentaryPhase::Streaming;
            state.buffer.is_streaming = true;
        });
    }

    /// Replace whatever was streamed with the final transcript.
    pub fn set_ready(&self, transcript: &str) {
        self.tx.send_modify(|state| {
            state.phase = CommentaryPhase::Ready;
            state.buffer.text = transcript.to_string();
            state.buffer.is_streaming = false;
        });
    }

    /// Ready signal without a transcript: keep the streamed text as final.
    pub fn finish(&self) {
        self.tx.send_modify(|state| {
            state.phase = CommentaryPhase::Ready;
            state.buffer.is_streaming = false;
        });
    }

    pub fn clear(&self) {
        self.tx.send_if_modified(|state| {
            let idle = state.phase == CommentaryPhase::Idle;
            if idle && state.buffer == CommentaryBuffer::default() {
                return false;
            }
            state.phase = CommentaryPhase::Idle;
            state.buffer = CommentaryBuffer::default();
            true
        });
    }

    pub fn phase(&self) -> CommentaryPhase {
        self.tx.borrow().phase
    }

    pub fn buffer(&self) -> CommentaryBuffer {
        self.tx.borrow().buffer.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CommentaryState> {
        self.tx.subscribe()
    }
}
