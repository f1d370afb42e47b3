//! # bico-voice — live voice conversations with the bico assistant
//!
//! Real-time duplex audio between the user's microphone and the
//! conversational endpoint: capture frames stream out while synthesized
//! audio and live transcription stream back in, played gaplessly and
//! finalized into the shared chat transcript turn by turn.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     LiveVoiceManager                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐        │
//! │  │  Capture     │→ │ Frame codec  │→ │   Duplex     │        │
//! │  │  (16kHz mono)│  │ (PCM16/b64)  │  │   session    │        │
//! │  └──────────────┘  └──────────────┘  └──────┬───────┘        │
//! │         ↑                                   │ events          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────▼───────┐        │
//! │  │  Playback    │← │ Gapless      │← │  Dispatch    │→ sink  │
//! │  │  (24kHz mono)│  │ scheduling   │  │  (per tag)   │        │
//! │  └──────────────┘  └──────────────┘  └──────────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Capture, playback, and the remote session sit behind small traits so the
//! whole pipeline runs hardware-free in tests; production backends are CPAL,
//! Rodio, and a Gemini Live WebSocket client.

pub mod audio;
pub mod capture;
pub mod codec;
pub mod error;
pub mod live;
pub mod playback;
pub mod session;
pub mod transcript;
pub mod wire;

pub use audio::{
    AudioCapture, AudioPlayback, BufferId, CaptureConfig, CaptureHandle, DeniedCapture,
    ManualPlayback, PlaybackConfig, PlaybackHandle, ScheduledSpan, ScriptedCapture,
};
pub use capture::CpalCapture;
pub use codec::{decode_wire_audio, encode_frame, AudioFrame, PlaybackBuffer};
pub use error::{VoiceError, VoiceResult};
pub use live::{
    DuplexSession, GeminiLive, InboundEvent, LiveConfig, ScriptedConnector, SessionConnector,
};
pub use playback::RodioPlayback;
pub use session::{LiveVoiceManager, ManagerConfig, SessionState};
pub use transcript::{PartialTranscript, Speaker, TranscriptEntry, TranscriptSink};
