//! Wire envelope for the live endpoint (`BidiGenerateContent` over WebSocket).
//!
//! Message shapes follow the Gemini Live API: a `setup` message opens the
//! session (response modality, voice, transcription of both directions),
//! `realtimeInput` carries microphone frames up, and `serverContent` carries
//! transcription deltas, the turn-complete marker, and inline synthesized
//! audio down. Everything is camelCase JSON.

use crate::codec::AudioFrame;
use crate::live::InboundEvent;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// First client message on a fresh connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    /// Presence requests live transcription of microphone audio.
    pub input_audio_transcription: TranscriptionConfig,
    /// Presence requests live transcription of synthesized audio.
    pub output_audio_transcription: TranscriptionConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Empty marker object; presence in `setup` is what matters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptionConfig {}

impl SetupMessage {
    pub fn new(model: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            setup: Setup {
                model: model.into(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice.into(),
                            },
                        },
                    },
                },
                input_audio_transcription: TranscriptionConfig {},
                output_audio_transcription: TranscriptionConfig {},
            },
        }
    }
}

/// Per-frame client message: one captured block of microphone audio.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl RealtimeInputMessage {
    pub fn from_frame(frame: AudioFrame) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: frame.mime_type,
                    data: frame.data,
                }],
            },
        }
    }
}

/// Any message the endpoint sends. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<SetupComplete>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupComplete {}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub input_transcription: Option<TranscriptionDelta>,
    pub output_transcription: Option<TranscriptionDelta>,
    pub turn_complete: Option<bool>,
    pub interrupted: Option<bool>,
    pub model_turn: Option<ModelTurn>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscriptionDelta {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelTurn {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Part {
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InlineData {
    pub mime_type: Option<String>,
    pub data: Option<String>,
}

/// Server notice that the connection will be dropped shortly. Informational;
/// the actual close still arrives as a close frame.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoAway {
    pub time_left: Option<String>,
}

impl ServerMessage {
    /// Parse one text frame off the socket.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Flatten this message into session events, in dispatch order: user
    /// delta, model delta, audio parts, then the turn-complete marker. A
    /// base64 payload that fails to decode becomes an `Error` event.
    pub fn into_events(self) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        let Some(content) = self.server_content else {
            return events;
        };
        if let Some(text) = content.input_transcription.and_then(|t| t.text) {
            if !text.is_empty() {
                events.push(InboundEvent::UserTranscriptDelta(text));
            }
        }
        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            if !text.is_empty() {
                events.push(InboundEvent::ModelTranscriptDelta(text));
            }
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                let Some(data) = part.inline_data.and_then(|d| d.data) else {
                    continue;
                };
                match B64.decode(&data) {
                    Ok(bytes) => events.push(InboundEvent::AudioChunk(bytes)),
                    Err(e) => {
                        events.push(InboundEvent::Error(format!("bad audio payload: {e}")));
                        return events;
                    }
                }
            }
        }
        if content.turn_complete.unwrap_or(false) {
            events.push(InboundEvent::TurnComplete);
        }
        events
    }
}
