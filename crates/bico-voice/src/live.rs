//! **Duplex live session** — the bidirectional stream to the conversational
//! endpoint.
//!
//! `SessionConnector` opens a session; `DuplexSession` is the opaque handle
//! the manager drives: fire-and-forget `send` for outbound frames, an
//! ordered inbound event stream, and an async `close`. The production
//! implementation (`GeminiLive`) speaks the Live API over tokio-tungstenite;
//! `ScriptedConnector` replays a fixed event sequence for tests.

use crate::codec::AudioFrame;
use crate::error::{VoiceError, VoiceResult};
use crate::wire::{RealtimeInputMessage, ServerMessage, SetupMessage};
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Live endpoint WebSocket URL (API key appended as a query parameter).
pub const DEFAULT_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default live model.
pub const DEFAULT_MODEL: &str = "models/gemini-live-2.5-flash-native-audio";

/// Default prebuilt voice for the assistant.
pub const DEFAULT_VOICE: &str = "Aoede";

/// Session open configuration: which model answers and with which voice.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub model: String,
    pub voice: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
        }
    }
}

impl LiveConfig {
    /// Build from environment: `BICO_LIVE_MODEL` and `BICO_LIVE_VOICE`,
    /// falling back to the defaults.
    pub fn from_env() -> Self {
        Self {
            model: std::env::var("BICO_LIVE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            voice: std::env::var("BICO_LIVE_VOICE").unwrap_or_else(|_| DEFAULT_VOICE.to_string()),
        }
    }
}

/// Everything the duplex session can deliver, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Incremental transcription of the user's microphone audio.
    UserTranscriptDelta(String),
    /// Incremental transcription of the assistant's synthesized audio.
    ModelTranscriptDelta(String),
    /// The current turn is finished; partials should be finalized.
    TurnComplete,
    /// Raw PCM16LE synthesized audio bytes.
    AudioChunk(Vec<u8>),
    /// Endpoint-reported or protocol failure. Terminates the session.
    Error(String),
    /// Graceful remote close. Terminates the session silently.
    Closed,
}

/// An open duplex session.
#[async_trait::async_trait]
pub trait DuplexSession: Send {
    /// Transmit one captured frame. Fire-and-forget: frames sent after the
    /// session has gone away are silently dropped, by design — the capture
    /// path must never block on the network.
    fn send(&self, frame: AudioFrame);

    /// Next inbound event; `None` once the stream is finished and drained.
    async fn next_event(&mut self) -> Option<InboundEvent>;

    /// Close the session and release the connection. Idempotent.
    async fn close(&mut self) -> VoiceResult<()>;
}

/// Opens duplex sessions against a live endpoint.
#[async_trait::async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(&self, config: &LiveConfig) -> VoiceResult<Box<dyn DuplexSession>>;
}

/// Production connector for the Gemini Live endpoint.
pub struct GeminiLive {
    endpoint: String,
    api_key: String,
}

impl GeminiLive {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Build from environment: requires `GEMINI_API_KEY`.
    pub fn from_env() -> VoiceResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| VoiceError::Config("GEMINI_API_KEY is not set".to_string()))?;
        Ok(Self::new(api_key))
    }

    /// Point at a non-default endpoint (tests, proxies).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait::async_trait]
impl SessionConnector for GeminiLive {
    async fn open(&self, config: &LiveConfig) -> VoiceResult<Box<dyn DuplexSession>> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| VoiceError::SessionOpen(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        let setup = SetupMessage::new(&config.model, &config.voice);
        let setup_json = serde_json::to_string(&setup)
            .map_err(|e| VoiceError::SessionOpen(e.to_string()))?;
        ws_tx
            .send(Message::Text(setup_json))
            .await
            .map_err(|e| VoiceError::SessionOpen(e.to_string()))?;

        // Handshake: nothing is a session until the endpoint acknowledges setup.
        loop {
            let frame = ws_rx
                .next()
                .await
                .ok_or_else(|| VoiceError::SessionOpen("connection closed during handshake".to_string()))?
                .map_err(|e| VoiceError::SessionOpen(e.to_string()))?;
            let Some(text) = message_text(frame) else {
                continue;
            };
            match ServerMessage::parse(&text) {
                Ok(msg) if msg.setup_complete.is_some() => break,
                Ok(_) => continue,
                Err(e) => return Err(VoiceError::SessionOpen(format!("bad handshake reply: {e}"))),
            }
        }
        debug!(model = %config.model, voice = %config.voice, "live session handshake complete");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<AudioFrame>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<InboundEvent>();
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = out_rx.recv() => match maybe {
                        Some(frame) => {
                            let msg = RealtimeInputMessage::from_frame(frame);
                            let json = match serde_json::to_string(&msg) {
                                Ok(j) => j,
                                Err(e) => {
                                    warn!("dropping unserializable frame: {e}");
                                    continue;
                                }
                            };
                            if ws_tx.send(Message::Text(json)).await.is_err() {
                                // Socket gone; the inbound half reports Closed/Error.
                                debug!("outbound frame dropped, socket is down");
                            }
                        }
                        None => break,
                    },
                    maybe = ws_rx.next() => match maybe {
                        Some(Ok(frame)) => {
                            if matches!(frame, Message::Close(_)) {
                                let _ = event_tx.send(InboundEvent::Closed);
                                break;
                            }
                            let Some(text) = message_text(frame) else {
                                continue;
                            };
                            match ServerMessage::parse(&text) {
                                Ok(msg) => {
                                    if let Some(ref away) = msg.go_away {
                                        debug!(time_left = ?away.time_left, "endpoint announced disconnect");
                                    }
                                    for event in msg.into_events() {
                                        if event_tx.send(event).is_err() {
                                            return;
                                        }
                                    }
                                }
                                Err(e) => {
                                    let _ = event_tx.send(InboundEvent::Error(format!(
                                        "unparseable server message: {e}"
                                    )));
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            let _ = event_tx.send(InboundEvent::Error(e.to_string()));
                            break;
                        }
                        None => {
                            let _ = event_tx.send(InboundEvent::Closed);
                            break;
                        }
                    },
                    _ = &mut close_rx => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        Ok(Box::new(GeminiSession {
            out_tx,
            events: event_rx,
            close_tx: Some(close_tx),
            pump: Some(pump),
        }))
    }
}

/// Extract the JSON text of a frame; the endpoint sends both text and binary
/// frames carrying UTF-8 JSON.
fn message_text(frame: Message) -> Option<String> {
    match frame {
        Message::Text(t) => Some(t),
        Message::Binary(b) => String::from_utf8(b).ok(),
        _ => None,
    }
}

struct GeminiSession {
    out_tx: mpsc::UnboundedSender<AudioFrame>,
    events: mpsc::UnboundedReceiver<InboundEvent>,
    close_tx: Option<oneshot::Sender<()>>,
    pump: Option<tokio::task::JoinHandle<()>>,
}

#[async_trait::async_trait]
impl DuplexSession for GeminiSession {
    fn send(&self, frame: AudioFrame) {
        let _ = self.out_tx.send(frame);
    }

    async fn next_event(&mut self) -> Option<InboundEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) -> VoiceResult<()> {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted implementation (no network)
// ---------------------------------------------------------------------------

/// Connector that replays a fixed inbound script and records every frame
/// sent. After the script drains the session stays open until closed, like a
/// quiet remote endpoint.
pub struct ScriptedConnector {
    script: Mutex<VecDeque<InboundEvent>>,
    opens: AtomicUsize,
    sent: Arc<Mutex<Vec<AudioFrame>>>,
    fail_open: bool,
}

impl ScriptedConnector {
    pub fn new(script: Vec<InboundEvent>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            opens: AtomicUsize::new(0),
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_open: false,
        }
    }

    /// A connector whose handshake always fails.
    pub fn failing() -> Self {
        let mut c = Self::new(Vec::new());
        c.fail_open = true;
        c
    }

    /// How many times `open` was attempted.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Every frame sent over sessions from this connector, in order.
    pub fn sent(&self) -> Vec<AudioFrame> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SessionConnector for ScriptedConnector {
    async fn open(&self, _config: &LiveConfig) -> VoiceResult<Box<dyn DuplexSession>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(VoiceError::SessionOpen("scripted handshake failure".to_string()));
        }
        let (event_tx, events) = mpsc::unbounded_channel();
        for event in self.script.lock().unwrap().drain(..) {
            let _ = event_tx.send(event);
        }
        Ok(Box::new(ScriptedSession {
            events,
            _keepalive: event_tx,
            sent: Arc::clone(&self.sent),
            closed: false,
        }))
    }
}

struct ScriptedSession {
    events: mpsc::UnboundedReceiver<InboundEvent>,
    // Keeps the event channel open so a drained script pends instead of
    // reading as a remote close.
    _keepalive: mpsc::UnboundedSender<InboundEvent>,
    sent: Arc<Mutex<Vec<AudioFrame>>>,
    closed: bool,
}

#[async_trait::async_trait]
impl DuplexSession for ScriptedSession {
    fn send(&self, frame: AudioFrame) {
        if !self.closed {
            self.sent.lock().unwrap().push(frame);
        }
    }

    async fn next_event(&mut self) -> Option<InboundEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) -> VoiceResult<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_config_defaults() {
        let c = LiveConfig::default();
        assert_eq!(c.model, DEFAULT_MODEL);
        assert_eq!(c.voice, DEFAULT_VOICE);
    }

    #[tokio::test]
    async fn scripted_connector_replays_events_in_order() {
        let connector = ScriptedConnector::new(vec![
            InboundEvent::UserTranscriptDelta("oi".into()),
            InboundEvent::TurnComplete,
        ]);
        let mut session = connector.open(&LiveConfig::default()).await.unwrap();
        assert_eq!(
            session.next_event().await,
            Some(InboundEvent::UserTranscriptDelta("oi".into()))
        );
        assert_eq!(session.next_event().await, Some(InboundEvent::TurnComplete));
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test]
    async fn failing_connector_rejects_open() {
        let connector = ScriptedConnector::failing();
        let result = connector.open(&LiveConfig::default()).await;
        assert!(matches!(result, Err(VoiceError::SessionOpen(_))));
        assert_eq!(connector.open_count(), 1);
    }
}
