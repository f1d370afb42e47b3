//! Integration tests for the live voice session pipeline.
//!
//! Everything runs against the scripted capability backends — no microphone,
//! speaker, or network. The scripted connector replays inbound events, the
//! manual playback records the schedule on a hand-advanced clock, and the
//! scripted capture grants (or denies) the device synchronously.

use bico_voice::{
    encode_frame, DeniedCapture, InboundEvent, LiveVoiceManager, ManagerConfig, ManualPlayback,
    ScriptedCapture, ScriptedConnector, SessionState, Speaker, TranscriptEntry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const EPS: f64 = 1e-9;

struct Fixture {
    capture: Arc<ScriptedCapture>,
    playback: Arc<ManualPlayback>,
    connector: Arc<ScriptedConnector>,
    entries: mpsc::UnboundedReceiver<TranscriptEntry>,
    manager: LiveVoiceManager,
}

fn fixture(script: Vec<InboundEvent>) -> Fixture {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let capture = Arc::new(ScriptedCapture::new());
    let playback = Arc::new(ManualPlayback::new());
    let connector = Arc::new(ScriptedConnector::new(script));
    let (tx, entries) = mpsc::unbounded_channel();
    let manager = LiveVoiceManager::new(
        capture.clone(),
        playback.clone(),
        connector.clone(),
        Arc::new(tx),
        ManagerConfig::default(),
    );
    Fixture {
        capture,
        playback,
        connector,
        entries,
        manager,
    }
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let result = timeout(Duration::from_secs(2), async {
        while !cond() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

async fn next_entry(entries: &mut mpsc::UnboundedReceiver<TranscriptEntry>) -> TranscriptEntry {
    timeout(Duration::from_secs(2), entries.recv())
        .await
        .expect("timed out waiting for a transcript entry")
        .expect("transcript channel closed")
}

/// PCM16 bytes worth `secs` of 24kHz mono audio.
fn chunk_of(secs: f64) -> Vec<u8> {
    vec![0u8; (secs * 24_000.0) as usize * 2]
}

#[tokio::test]
async fn audio_chunks_schedule_as_a_non_overlapping_partition() {
    let mut fx = fixture(vec![
        InboundEvent::AudioChunk(chunk_of(0.5)),
        InboundEvent::AudioChunk(chunk_of(0.25)),
        InboundEvent::AudioChunk(chunk_of(1.0)),
    ]);

    fx.manager.start().await;
    let playback = Arc::clone(&fx.playback);
    wait_for("three scheduled buffers", || playback.schedules().len() == 3).await;

    let spans = fx.playback.schedules();
    // Arrival order, back to back: each start is exactly the previous end,
    // and never before the output clock.
    for window in spans.windows(2) {
        let (a, b) = (&window[0], &window[1]);
        assert!(b.start_at >= a.start_at, "start times must be non-decreasing");
        assert!(
            b.start_at >= a.start_at + a.duration - EPS,
            "buffer {} would overlap its predecessor",
            b.id
        );
    }
    assert!((spans[0].start_at - 0.0).abs() < EPS);
    assert!((spans[1].start_at - 0.5).abs() < EPS);
    assert!((spans[2].start_at - 0.75).abs() < EPS);

    fx.manager.stop().await;
}

#[tokio::test]
async fn schedule_never_starts_before_the_output_clock() {
    let mut fx = fixture(vec![InboundEvent::AudioChunk(chunk_of(0.25))]);
    // The clock has already advanced when the first chunk arrives.
    fx.playback.advance_clock(3.0);

    fx.manager.start().await;
    let playback = Arc::clone(&fx.playback);
    wait_for("one scheduled buffer", || playback.schedules().len() == 1).await;

    let spans = fx.playback.schedules();
    assert!((spans[0].start_at - 3.0).abs() < EPS);

    fx.manager.stop().await;
}

#[tokio::test]
async fn turn_complete_finalizes_user_before_assistant() {
    let mut fx = fixture(vec![
        InboundEvent::UserTranscriptDelta("Preciso".into()),
        InboundEvent::UserTranscriptDelta(" de um eletricista".into()),
        InboundEvent::ModelTranscriptDelta("Buscando...".into()),
        InboundEvent::TurnComplete,
    ]);

    fx.manager.start().await;

    let first = next_entry(&mut fx.entries).await;
    assert_eq!(first.speaker, Speaker::User);
    assert_eq!(first.text, "Preciso de um eletricista");

    let second = next_entry(&mut fx.entries).await;
    assert_eq!(second.speaker, Speaker::Assistant);
    assert_eq!(second.text, "Buscando...");

    fx.manager.stop().await;
    assert!(fx.entries.try_recv().is_err(), "no further entries expected");
}

#[tokio::test]
async fn empty_user_partial_is_suppressed() {
    let mut fx = fixture(vec![
        InboundEvent::ModelTranscriptDelta("Buscando...".into()),
        InboundEvent::TurnComplete,
    ]);

    fx.manager.start().await;

    let only = next_entry(&mut fx.entries).await;
    assert_eq!(only.speaker, Speaker::Assistant);
    assert_eq!(only.text, "Buscando...");

    fx.manager.stop().await;
    assert!(fx.entries.try_recv().is_err(), "no empty user entry expected");
}

#[tokio::test]
async fn partials_are_published_while_the_turn_is_open() {
    let mut fx = fixture(vec![
        InboundEvent::UserTranscriptDelta("Preciso".into()),
        InboundEvent::UserTranscriptDelta(" de ajuda".into()),
    ]);

    fx.manager.start().await;
    let shared = &fx.manager;
    wait_for("user partial to accumulate", || {
        shared.live_partial().user_input == "Preciso de ajuda"
    })
    .await;
    assert!(fx.manager.live_partial().model_input.is_empty());

    fx.manager.stop().await;
    assert!(fx.manager.live_partial().is_empty());
}

#[tokio::test]
async fn stop_is_idempotent() {
    let mut fx = fixture(Vec::new());

    fx.manager.start().await;
    let connector = Arc::clone(&fx.connector);
    wait_for("session to open", || connector.open_count() == 1).await;

    fx.manager.stop().await;
    fx.manager.stop().await;

    assert_eq!(fx.manager.state(), SessionState::Idle);
    assert_eq!(fx.capture.stop_count(), 1, "capture stopped exactly once");
    assert_eq!(fx.capture.release_count(), 1, "device released exactly once");
    assert_eq!(fx.playback.stop_all_count(), 1, "playback stopped exactly once");
    assert_eq!(fx.playback.close_count(), 1, "playback closed exactly once");
}

#[tokio::test]
async fn teardown_leaves_nothing_behind() {
    let mut fx = fixture(vec![
        InboundEvent::UserTranscriptDelta("Preciso".into()),
        InboundEvent::AudioChunk(chunk_of(0.5)),
    ]);

    fx.manager.start().await;
    let playback = Arc::clone(&fx.playback);
    wait_for("the chunk to schedule", || playback.schedules().len() == 1).await;

    fx.manager.stop().await;

    assert_eq!(fx.manager.state(), SessionState::Idle);
    assert!(fx.manager.live_partial().is_empty(), "partials reset on stop");
    assert_eq!(fx.playback.stop_all_count(), 1);
    assert!(
        fx.playback.stopped_ids().contains(&0),
        "the in-flight buffer was force-stopped"
    );
    assert_eq!(fx.capture.release_count(), 1);
    assert_eq!(fx.playback.close_count(), 1);
}

#[tokio::test]
async fn device_denial_never_reaches_the_endpoint() {
    let playback = Arc::new(ManualPlayback::new());
    let connector = Arc::new(ScriptedConnector::new(Vec::new()));
    let (tx, mut entries) = mpsc::unbounded_channel();
    let mut manager = LiveVoiceManager::new(
        Arc::new(DeniedCapture),
        playback.clone(),
        connector.clone(),
        Arc::new(tx),
        ManagerConfig::default(),
    );

    manager.start().await;

    let entry = next_entry(&mut entries).await;
    assert_eq!(entry.speaker, Speaker::Assistant);
    assert!(entry.text.contains("microphone"));

    wait_for("return to idle", || manager.state() == SessionState::Idle).await;
    assert_eq!(connector.open_count(), 0, "no handshake was attempted");
    assert!(entries.try_recv().is_err(), "exactly one error entry");
    assert!(playback.schedules().is_empty());
}

#[tokio::test]
async fn session_open_failure_releases_the_device() {
    let capture = Arc::new(ScriptedCapture::new());
    let (tx, mut entries) = mpsc::unbounded_channel();
    let mut manager = LiveVoiceManager::new(
        capture.clone(),
        Arc::new(ManualPlayback::new()),
        Arc::new(ScriptedConnector::failing()),
        Arc::new(tx),
        ManagerConfig::default(),
    );

    manager.start().await;

    let entry = next_entry(&mut entries).await;
    assert_eq!(entry.speaker, Speaker::Assistant);

    wait_for("return to idle", || manager.state() == SessionState::Idle).await;
    assert_eq!(capture.release_count(), 1, "no partial device leak");
    assert!(entries.try_recv().is_err());
}

#[tokio::test]
async fn captured_frames_are_encoded_and_sent_in_order() {
    let mut fx = fixture(Vec::new());

    fx.manager.start().await;
    let manager = &fx.manager;
    wait_for("session to go active", || manager.is_active()).await;

    let first = vec![0.1f32; 8];
    let second = vec![-0.2f32; 8];
    fx.capture.feed(first.clone());
    fx.capture.feed(second.clone());

    let connector = Arc::clone(&fx.connector);
    wait_for("both frames to transmit", || connector.sent().len() == 2).await;

    let sent = fx.connector.sent();
    assert_eq!(sent[0], encode_frame(&first));
    assert_eq!(sent[1], encode_frame(&second));

    fx.manager.stop().await;
}

#[tokio::test]
async fn restart_while_active_replaces_the_session() {
    let mut fx = fixture(Vec::new());

    fx.manager.start().await;
    let manager = &fx.manager;
    wait_for("first session active", || manager.is_active()).await;

    fx.manager.start().await;
    let connector = Arc::clone(&fx.connector);
    wait_for("second session opened", || connector.open_count() == 2).await;
    assert_eq!(fx.capture.release_count(), 1, "first device was released");

    fx.manager.stop().await;
    assert_eq!(fx.capture.release_count(), 2);
    assert_eq!(fx.manager.state(), SessionState::Idle);
}

#[tokio::test]
async fn remote_close_tears_down_silently() {
    let mut fx = fixture(vec![InboundEvent::Closed]);

    fx.manager.start().await;
    let connector = Arc::clone(&fx.connector);
    wait_for("session to open", || connector.open_count() == 1).await;
    let manager = &fx.manager;
    wait_for("return to idle", || manager.state() == SessionState::Idle).await;

    assert!(fx.entries.try_recv().is_err(), "a clean close produces no entry");
    assert_eq!(fx.capture.release_count(), 1);
}

#[tokio::test]
async fn remote_error_surfaces_a_generic_entry() {
    let mut fx = fixture(vec![InboundEvent::Error("quota exceeded (project 42)".into())]);

    fx.manager.start().await;

    let entry = next_entry(&mut fx.entries).await;
    assert_eq!(entry.speaker, Speaker::Assistant);
    assert!(
        !entry.text.contains("quota"),
        "provider detail must not reach the user"
    );

    let manager = &fx.manager;
    wait_for("return to idle", || manager.state() == SessionState::Idle).await;
    assert!(fx.entries.try_recv().is_err());
}

#[tokio::test]
async fn corrupt_audio_terminates_the_session() {
    // Three bytes is not a whole number of PCM16 samples.
    let mut fx = fixture(vec![InboundEvent::AudioChunk(vec![0, 1, 2])]);

    fx.manager.start().await;

    let entry = next_entry(&mut fx.entries).await;
    assert_eq!(entry.speaker, Speaker::Assistant);

    let manager = &fx.manager;
    wait_for("return to idle", || manager.state() == SessionState::Idle).await;
    assert!(fx.playback.schedules().is_empty(), "nothing was scheduled");
}

#[tokio::test]
async fn completion_shrinks_the_in_flight_set_without_stopping() {
    let mut fx = fixture(vec![
        InboundEvent::AudioChunk(chunk_of(0.25)),
        InboundEvent::AudioChunk(chunk_of(0.25)),
    ]);

    fx.manager.start().await;
    let playback = Arc::clone(&fx.playback);
    wait_for("both chunks to schedule", || playback.schedules().len() == 2).await;

    // First buffer finishes naturally; the session keeps running.
    fx.playback.complete(0);
    sleep(Duration::from_millis(20)).await;
    assert!(fx.manager.is_active());

    fx.manager.stop().await;
    assert_eq!(fx.manager.state(), SessionState::Idle);
}
