//! **Live voice session manager** — the lifecycle of one real-time
//! conversation.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  LiveVoiceManager (driver task)               │
//! │  ┌───────────┐   encode    ┌─────────────┐                   │
//! │  │  Capture  │────────────▶│   Duplex    │                   │
//! │  │  (frames) │             │   session   │                   │
//! │  └───────────┘             └──────┬──────┘                   │
//! │                                   │ events                    │
//! │  ┌───────────┐   schedule  ┌──────▼──────┐   finalize        │
//! │  │ Playback  │◀────────────│  Dispatch   │──────────────▶ sink│
//! │  │  (24kHz)  │   (cursor)  │ (per event) │   (turns)          │
//! │  └───────────┘             └─────────────┘                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! One driver task multiplexes captured frames, inbound session events,
//! playback completions, and the stop signal, so dispatch is effectively
//! single-threaded: partials only append, buffers schedule in arrival order
//! on a monotonic cursor, and teardown runs exactly once per session.

use crate::audio::{
    AudioCapture, AudioPlayback, BufferId, CaptureConfig, CaptureHandle, PlaybackConfig,
    PlaybackHandle,
};
use crate::codec::{self, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};
use crate::live::{DuplexSession, InboundEvent, LiveConfig, SessionConnector};
use crate::transcript::{PartialTranscript, Speaker, TranscriptEntry, TranscriptSink};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shown when the microphone cannot be acquired.
const MIC_UNAVAILABLE_TEXT: &str =
    "I couldn't access your microphone. Check your device permissions and try again.";

/// Shown on any failure once a conversation was attempted. Provider detail
/// stays in the logs.
const CONVERSATION_ERROR_TEXT: &str =
    "Something went wrong with the voice connection. Please try again.";

/// Lifecycle states of the live session. Exhaustive; there is no other
/// session condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session. Initial and final state.
    Idle,
    /// Requesting the capture device.
    Acquiring,
    /// Device held; duplex handshake in progress.
    Connecting,
    /// Both streaming loops running.
    Active,
    /// Teardown in progress.
    Closing,
}

/// Manager configuration: the three capability configs in one place.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub live: LiveConfig,
}

impl ManagerConfig {
    /// Defaults with the live section read from the environment.
    pub fn from_env() -> Self {
        Self {
            live: LiveConfig::from_env(),
            ..Default::default()
        }
    }
}

/// Why the active loop ended.
enum CloseReason {
    Stopped,
    Remote,
    Errored,
}

/// What the driver multiplexes over on each loop tick.
enum Step {
    Stop,
    Frame(Option<Vec<f32>>),
    Completed(Option<BufferId>),
    Inbound(Option<InboundEvent>),
}

/// Owns the lifecycle of one live voice conversation.
///
/// The UI layer sees exactly four things: `start` / `stop`, the
/// [`SessionState`] projection, the live [`PartialTranscript`] pair, and the
/// finalized entries appearing in the injected [`TranscriptSink`]. Errors
/// never escape this type; they surface as state transitions and transcript
/// entries.
pub struct LiveVoiceManager {
    capture: Arc<dyn AudioCapture>,
    playback: Arc<dyn AudioPlayback>,
    connector: Arc<dyn SessionConnector>,
    sink: Arc<dyn TranscriptSink>,
    config: ManagerConfig,
    shared: Arc<Shared>,
    stop_tx: Option<mpsc::Sender<()>>,
    driver: Option<JoinHandle<()>>,
}

impl LiveVoiceManager {
    pub fn new(
        capture: Arc<dyn AudioCapture>,
        playback: Arc<dyn AudioPlayback>,
        connector: Arc<dyn SessionConnector>,
        sink: Arc<dyn TranscriptSink>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            capture,
            playback,
            connector,
            sink,
            config,
            shared: Arc::new(Shared::new()),
            stop_tx: None,
            driver: None,
        }
    }

    /// Begin a live conversation. Safe to call repeatedly: a session that is
    /// already running is stopped completely before the new one starts.
    ///
    /// Returns once the driver is launched; acquisition and the handshake
    /// proceed asynchronously and report through state and the sink.
    pub async fn start(&mut self) {
        if self.driver.is_some() {
            info!("start requested while a session is live, stopping the previous one");
            self.stop().await;
        }
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let driver = tokio::spawn(drive(
            Arc::clone(&self.capture),
            Arc::clone(&self.playback),
            Arc::clone(&self.connector),
            Arc::clone(&self.sink),
            self.config.clone(),
            Arc::clone(&self.shared),
            stop_rx,
        ));
        self.stop_tx = Some(stop_tx);
        self.driver = Some(driver);
    }

    /// End the conversation and release every resource. Idempotent: calling
    /// on an idle manager is a no-op. When this resolves the state is
    /// [`SessionState::Idle`] and no device, context, or scheduled buffer
    /// remains referenced.
    pub async fn stop(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };
        if let Some(tx) = self.stop_tx.take() {
            // Fails when the driver already finished on its own; fine.
            let _ = tx.send(()).await;
        }
        if driver.await.is_err() {
            warn!("session driver panicked during shutdown");
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Whether a conversation is running (button affordance projection).
    pub fn is_active(&self) -> bool {
        self.shared.state() == SessionState::Active
    }

    /// The live, overwrite-in-place partial pair for the current turn.
    pub fn live_partial(&self) -> PartialTranscript {
        self.shared.partial()
    }
}

impl Drop for LiveVoiceManager {
    fn drop(&mut self) {
        // The detached driver still tears down once it sees the signal.
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

/// Observable session state shared between the manager handle and the driver.
struct Shared {
    state: RwLock<SessionState>,
    partial: RwLock<PartialTranscript>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: RwLock::new(SessionState::Idle),
            partial: RwLock::new(PartialTranscript::default()),
        }
    }

    fn state(&self) -> SessionState {
        *self.state.read().unwrap()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().unwrap();
        if *state != next {
            debug!(from = ?*state, to = ?next, "session state");
            *state = next;
        }
    }

    fn partial(&self) -> PartialTranscript {
        self.partial.read().unwrap().clone()
    }

    fn append_user_partial(&self, text: &str) {
        self.partial.write().unwrap().user_input.push_str(text);
    }

    fn append_model_partial(&self, text: &str) {
        self.partial.write().unwrap().model_input.push_str(text);
    }

    fn take_partial(&self) -> PartialTranscript {
        std::mem::take(&mut *self.partial.write().unwrap())
    }

    fn clear_partial(&self) {
        *self.partial.write().unwrap() = PartialTranscript::default();
    }
}

/// Everything one session exclusively owns, as optional fields so teardown
/// handles every partially-constructed shape the same way.
struct Session {
    mic: Option<CaptureHandle>,
    playback: Option<PlaybackHandle>,
    live: Option<Box<dyn DuplexSession>>,
    in_flight: HashSet<BufferId>,
    cursor: f64,
}

impl Session {
    fn empty() -> Self {
        Self {
            mic: None,
            playback: None,
            live: None,
            in_flight: HashSet::new(),
            cursor: 0.0,
        }
    }

    /// Release everything in fixed order. Every step is guarded: one failing
    /// release must not stop the ones after it.
    async fn teardown(&mut self) {
        if let Some(mic) = self.mic.as_mut() {
            if let Err(e) = mic.stop() {
                warn!("teardown: capture stop failed: {e}");
            }
        }
        if let Some(mut mic) = self.mic.take() {
            if let Err(e) = mic.release() {
                warn!("teardown: capture release failed: {e}");
            }
        }
        if let Some(pb) = self.playback.as_mut() {
            if let Err(e) = pb.stop_all() {
                warn!("teardown: playback stop failed: {e}");
            }
        }
        self.in_flight.clear();
        self.cursor = 0.0;
        if let Some(mut pb) = self.playback.take() {
            if let Err(e) = pb.close() {
                warn!("teardown: playback close failed: {e}");
            }
        }
        if let Some(mut live) = self.live.take() {
            if let Err(e) = live.close().await {
                warn!("teardown: session close failed: {e}");
            }
        }
    }
}

/// Tear down and return to idle; the single exit path of the driver.
async fn finish(mut session: Session, shared: &Shared) {
    shared.set_state(SessionState::Closing);
    session.teardown().await;
    shared.clear_partial();
    shared.set_state(SessionState::Idle);
}

async fn drive(
    capture: Arc<dyn AudioCapture>,
    playback: Arc<dyn AudioPlayback>,
    connector: Arc<dyn SessionConnector>,
    sink: Arc<dyn TranscriptSink>,
    config: ManagerConfig,
    shared: Arc<Shared>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    shared.set_state(SessionState::Acquiring);
    let mut mic = match capture.acquire(config.capture.clone()).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!("microphone acquisition failed: {e}");
            sink.push(TranscriptEntry::new(Speaker::Assistant, MIC_UNAVAILABLE_TEXT));
            finish(Session::empty(), &shared).await;
            return;
        }
    };

    shared.set_state(SessionState::Connecting);
    let mut live = match connector.open(&config.live).await {
        Ok(session) => session,
        Err(e) => {
            error!("live session open failed: {e}");
            sink.push(TranscriptEntry::new(Speaker::Assistant, CONVERSATION_ERROR_TEXT));
            let session = Session {
                mic: Some(mic),
                ..Session::empty()
            };
            finish(session, &shared).await;
            return;
        }
    };

    let mut pb = match playback.open(config.playback.clone()).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("playback open failed: {e}");
            sink.push(TranscriptEntry::new(Speaker::Assistant, CONVERSATION_ERROR_TEXT));
            let session = Session {
                mic: Some(mic),
                live: Some(live),
                ..Session::empty()
            };
            finish(session, &shared).await;
            return;
        }
    };

    // Frames captured before the session opened are never transmitted.
    let dropped = mic.drain_backlog();
    if dropped > 0 {
        debug!(frames = dropped, "discarded frames captured before the session opened");
    }

    shared.set_state(SessionState::Active);
    info!("🎙️ live voice session active");

    let mut in_flight: HashSet<BufferId> = HashSet::new();
    let mut cursor: f64 = 0.0;
    let mut next_id: BufferId = 0;
    let mut mic_live = true;
    let mut pb_live = true;

    let reason = loop {
        let step = tokio::select! {
            _ = stop_rx.recv() => Step::Stop,
            frame = mic.next_frame(), if mic_live => Step::Frame(frame),
            done = pb.next_completion(), if pb_live => Step::Completed(done),
            event = live.next_event() => Step::Inbound(event),
        };
        match step {
            Step::Stop => break CloseReason::Stopped,
            Step::Frame(Some(samples)) => {
                // Fire-and-forget: the capture path never waits on the network.
                live.send(codec::encode_frame(&samples));
            }
            Step::Frame(None) => {
                warn!("capture stream ended while active");
                mic_live = false;
            }
            Step::Completed(Some(id)) => {
                in_flight.remove(&id);
            }
            Step::Completed(None) => {
                pb_live = false;
            }
            Step::Inbound(Some(event)) => {
                if let Some(reason) = dispatch(
                    event,
                    &mut pb,
                    &mut in_flight,
                    &mut cursor,
                    &mut next_id,
                    shared.as_ref(),
                    sink.as_ref(),
                ) {
                    break reason;
                }
            }
            Step::Inbound(None) => break CloseReason::Remote,
        }
    };

    match reason {
        CloseReason::Stopped => info!("live voice session stopped"),
        CloseReason::Remote => info!("remote endpoint closed the session"),
        CloseReason::Errored => warn!("live voice session terminated on error"),
    }

    let session = Session {
        mic: Some(mic),
        playback: Some(pb),
        live: Some(live),
        in_flight,
        cursor,
    };
    finish(session, &shared).await;
}

/// Handle one inbound event while `Active`. Returns the close reason when the
/// event ends the session.
fn dispatch(
    event: InboundEvent,
    pb: &mut PlaybackHandle,
    in_flight: &mut HashSet<BufferId>,
    cursor: &mut f64,
    next_id: &mut BufferId,
    shared: &Shared,
    sink: &dyn TranscriptSink,
) -> Option<CloseReason> {
    match event {
        InboundEvent::UserTranscriptDelta(text) => {
            shared.append_user_partial(&text);
            None
        }
        InboundEvent::ModelTranscriptDelta(text) => {
            shared.append_model_partial(&text);
            None
        }
        InboundEvent::TurnComplete => {
            let partial = shared.take_partial();
            // User entry before assistant entry when both are present.
            if !partial.user_input.is_empty() {
                sink.push(TranscriptEntry::new(Speaker::User, partial.user_input));
            }
            if !partial.model_input.is_empty() {
                sink.push(TranscriptEntry::new(Speaker::Assistant, partial.model_input));
            }
            None
        }
        InboundEvent::AudioChunk(bytes) => {
            let buffer = match codec::decode_wire_audio(&bytes, OUTPUT_SAMPLE_RATE, OUTPUT_CHANNELS) {
                Ok(buffer) => buffer,
                Err(e) => {
                    // A stream that corrupted once is not trusted to realign.
                    error!("inbound audio decode failed: {e}");
                    sink.push(TranscriptEntry::new(Speaker::Assistant, CONVERSATION_ERROR_TEXT));
                    return Some(CloseReason::Errored);
                }
            };
            let start_at = cursor.max(pb.clock_now());
            let duration = buffer.duration_secs();
            let id = *next_id;
            *next_id += 1;
            // Inserted before scheduling; completion may fire immediately.
            in_flight.insert(id);
            if let Err(e) = pb.schedule(id, buffer, start_at) {
                warn!("playback scheduling failed, dropping chunk: {e}");
                in_flight.remove(&id);
                return None;
            }
            *cursor = start_at + duration;
            None
        }
        InboundEvent::Error(detail) => {
            error!(%detail, "remote endpoint reported an error");
            sink.push(TranscriptEntry::new(Speaker::Assistant, CONVERSATION_ERROR_TEXT));
            Some(CloseReason::Errored)
        }
        InboundEvent::Closed => Some(CloseReason::Remote),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ManualPlayback, ScriptedCapture};
    use crate::live::ScriptedConnector;
    use tokio::sync::mpsc;

    fn manager_with(connector: ScriptedConnector) -> (LiveVoiceManager, mpsc::UnboundedReceiver<TranscriptEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = LiveVoiceManager::new(
            Arc::new(ScriptedCapture::new()),
            Arc::new(ManualPlayback::new()),
            Arc::new(connector),
            Arc::new(tx),
            ManagerConfig::default(),
        );
        (manager, rx)
    }

    #[test]
    fn manager_starts_idle() {
        let (manager, _rx) = manager_with(ScriptedConnector::new(Vec::new()));
        assert_eq!(manager.state(), SessionState::Idle);
        assert!(!manager.is_active());
        assert!(manager.live_partial().is_empty());
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let (mut manager, _rx) = manager_with(ScriptedConnector::new(Vec::new()));
        manager.stop().await;
        manager.stop().await;
        assert_eq!(manager.state(), SessionState::Idle);
    }
}
