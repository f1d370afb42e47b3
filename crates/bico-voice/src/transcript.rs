//! Transcript types and the sink finalized utterances are appended into.
//!
//! The session manager accumulates per-turn partial text for both directions
//! and, on turn completion, pushes immutable `TranscriptEntry` values into a
//! `TranscriptSink` owned by the surrounding chat feature. The sink is
//! write-only from this crate's perspective.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Who said a finalized utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    /// The human on the microphone.
    User,
    /// The assistant's synthesized voice.
    Assistant,
}

/// An immutable finalized utterance, pushed once per turn and not retained.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    /// When the entry was finalized (turn completion, not speech onset).
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The not-yet-finalized text pair for the current turn.
///
/// The UI overwrites this in place (subtitle overlay); it is never appended
/// to history. Reset to empty on turn completion and on session stop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialTranscript {
    /// Incremental transcription of the user's microphone audio.
    pub user_input: String,
    /// Incremental transcription of the assistant's synthesized audio.
    pub model_input: String,
}

impl PartialTranscript {
    pub fn is_empty(&self) -> bool {
        self.user_input.is_empty() && self.model_input.is_empty()
    }
}

/// Write-only sink for finalized entries (the shared chat message list).
pub trait TranscriptSink: Send + Sync {
    /// Append one finalized entry. Must not block the caller.
    fn push(&self, entry: TranscriptEntry);
}

/// A sink that forwards entries over an unbounded channel. Dropped receivers
/// silently discard entries; the session never depends on delivery.
impl TranscriptSink for mpsc::UnboundedSender<TranscriptEntry> {
    fn push(&self, entry: TranscriptEntry) {
        let _ = self.send(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_starts_empty() {
        let p = PartialTranscript::default();
        assert!(p.is_empty());
    }

    #[test]
    fn channel_sink_forwards_entries() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.push(TranscriptEntry::new(Speaker::User, "preciso de um encanador"));
        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.speaker, Speaker::User);
        assert_eq!(entry.text, "preciso de um encanador");
    }
}
