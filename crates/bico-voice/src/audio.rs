//! **Audio capability seams** — capture and playback behind small traits.
//!
//! The session manager never touches platform audio APIs directly: device
//! acquisition, frame delivery, and buffer scheduling go through
//! `AudioCapture` / `AudioPlayback`. Production backends (CPAL capture,
//! Rodio playback) live in `capture` and `playback`; the scripted
//! implementations here let tests run the full pipeline with no hardware,
//! granting or denying the device synchronously and recording every
//! scheduled buffer.

use crate::codec::{PlaybackBuffer, INPUT_SAMPLE_RATE, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};
use crate::error::{VoiceError, VoiceResult};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Capture-side configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate in Hz (default: 16000, what the endpoint ingests).
    pub sample_rate: u32,

    /// Number of channels (default: 1 for mono).
    pub channels: u16,

    /// Samples per delivered frame (default: 4096, one processing tick).
    pub frame_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: INPUT_SAMPLE_RATE,
            channels: 1,
            frame_size: 4096,
        }
    }
}

/// Playback-side configuration.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Sample rate in Hz (default: 24000, the endpoint's synthesis rate).
    pub sample_rate: u32,

    /// Number of channels (default: 1 for mono).
    pub channels: u16,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: OUTPUT_CHANNELS,
        }
    }
}

/// Identifier of one scheduled buffer in the session's in-flight set.
pub type BufferId = u64;

/// Grants exclusive access to the default capture device.
#[async_trait::async_trait]
pub trait AudioCapture: Send + Sync {
    /// Request the device and start delivering frame-sized sample blocks.
    /// A denied or missing device fails with `VoiceError::DeviceAcquisition`.
    async fn acquire(&self, config: CaptureConfig) -> VoiceResult<CaptureHandle>;
}

/// Backend control half of an acquired capture device.
///
/// Both operations are part of the guarded teardown order: `stop` halts the
/// stream, `release` closes the device/context. Each must be idempotent.
pub trait CaptureControl: Send {
    fn stop(&mut self) -> VoiceResult<()>;
    fn release(&mut self) -> VoiceResult<()>;
}

/// A live microphone: frames arrive in capture order on an unbounded channel.
pub struct CaptureHandle {
    frames: mpsc::UnboundedReceiver<Vec<f32>>,
    control: Box<dyn CaptureControl>,
}

impl CaptureHandle {
    pub fn new(frames: mpsc::UnboundedReceiver<Vec<f32>>, control: Box<dyn CaptureControl>) -> Self {
        Self { frames, control }
    }

    /// Next captured frame; `None` once the capture side has shut down.
    pub async fn next_frame(&mut self) -> Option<Vec<f32>> {
        self.frames.recv().await
    }

    /// Discard frames buffered before the session went live. Returns how
    /// many were dropped.
    pub fn drain_backlog(&mut self) -> usize {
        let mut dropped = 0;
        while self.frames.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Stop the capture stream (teardown step; guarded by the caller).
    pub fn stop(&mut self) -> VoiceResult<()> {
        self.control.stop()
    }

    /// Release the device and close the capture context.
    pub fn release(&mut self) -> VoiceResult<()> {
        self.control.release()
    }
}

/// Opens the output side for scheduled, gapless playback.
#[async_trait::async_trait]
pub trait AudioPlayback: Send + Sync {
    async fn open(&self, config: PlaybackConfig) -> VoiceResult<PlaybackHandle>;
}

/// Backend scheduling half of an open output context.
pub trait PlaybackSink: Send {
    /// Current position of the output clock, in seconds since open.
    fn clock_now(&self) -> f64;

    /// Schedule a decoded buffer to begin at `start_at` (output-clock
    /// seconds). Natural completion is reported on the handle's completion
    /// channel with the same `id`.
    fn schedule(&mut self, id: BufferId, buffer: PlaybackBuffer, start_at: f64) -> VoiceResult<()>;

    /// Force-stop everything scheduled and queued. Stopped buffers do not
    /// report completion.
    fn stop_all(&mut self) -> VoiceResult<()>;

    /// Close the output device/context. Idempotent.
    fn close(&mut self) -> VoiceResult<()>;
}

/// An open output context: scheduling plus natural-completion notifications.
pub struct PlaybackHandle {
    sink: Box<dyn PlaybackSink>,
    completions: mpsc::UnboundedReceiver<BufferId>,
}

impl PlaybackHandle {
    pub fn new(sink: Box<dyn PlaybackSink>, completions: mpsc::UnboundedReceiver<BufferId>) -> Self {
        Self { sink, completions }
    }

    pub fn clock_now(&self) -> f64 {
        self.sink.clock_now()
    }

    pub fn schedule(&mut self, id: BufferId, buffer: PlaybackBuffer, start_at: f64) -> VoiceResult<()> {
        self.sink.schedule(id, buffer, start_at)
    }

    pub fn stop_all(&mut self) -> VoiceResult<()> {
        self.sink.stop_all()
    }

    pub fn close(&mut self) -> VoiceResult<()> {
        self.sink.close()
    }

    /// Next naturally-completed buffer id; `None` once the backend is gone.
    pub async fn next_completion(&mut self) -> Option<BufferId> {
        self.completions.recv().await
    }
}

// ---------------------------------------------------------------------------
// Scripted implementations (no hardware). Used by the integration tests and
// usable by downstream consumers that need a headless build.
// ---------------------------------------------------------------------------

/// Capture that grants synchronously and delivers whatever the test feeds it.
///
/// The device channel stays open until `release`, so a session keeps running
/// after the fed frames are consumed.
pub struct ScriptedCapture {
    feeder: Mutex<Option<mpsc::UnboundedSender<Vec<f32>>>>,
    stops: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl ScriptedCapture {
    pub fn new() -> Self {
        Self {
            feeder: Mutex::new(None),
            stops: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Deliver one frame to the currently-acquired device.
    pub fn feed(&self, frame: Vec<f32>) {
        if let Some(tx) = self.feeder.lock().unwrap().as_ref() {
            let _ = tx.send(frame);
        }
    }

    /// How many times a handle's `stop` ran.
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// How many times a handle's `release` ran.
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AudioCapture for ScriptedCapture {
    async fn acquire(&self, _config: CaptureConfig) -> VoiceResult<CaptureHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.feeder.lock().unwrap() = Some(tx.clone());
        let control = ScriptedControl {
            keepalive: Some(tx),
            stops: Arc::clone(&self.stops),
            releases: Arc::clone(&self.releases),
        };
        Ok(CaptureHandle::new(rx, Box::new(control)))
    }
}

struct ScriptedControl {
    keepalive: Option<mpsc::UnboundedSender<Vec<f32>>>,
    stops: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl CaptureControl for ScriptedControl {
    fn stop(&mut self) -> VoiceResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) -> VoiceResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.keepalive = None;
        Ok(())
    }
}

/// Capture that denies the device synchronously, as a revoked microphone
/// permission does.
#[derive(Debug, Default)]
pub struct DeniedCapture;

#[async_trait::async_trait]
impl AudioCapture for DeniedCapture {
    async fn acquire(&self, _config: CaptureConfig) -> VoiceResult<CaptureHandle> {
        Err(VoiceError::DeviceAcquisition("permission denied".to_string()))
    }
}

/// One recorded call to `schedule` on a [`ManualPlayback`] sink.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSpan {
    pub id: BufferId,
    pub start_at: f64,
    pub duration: f64,
}

/// Playback with a manually-advanced clock that records every schedule.
///
/// Buffers never complete on their own; tests call `complete(id)` to fire a
/// natural-completion notification.
pub struct ManualPlayback {
    clock: Arc<Mutex<f64>>,
    schedules: Arc<Mutex<Vec<ScheduledSpan>>>,
    stopped: Arc<Mutex<HashSet<BufferId>>>,
    stop_alls: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    completion_tx: Mutex<Option<mpsc::UnboundedSender<BufferId>>>,
}

impl ManualPlayback {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(Mutex::new(0.0)),
            schedules: Arc::new(Mutex::new(Vec::new())),
            stopped: Arc::new(Mutex::new(HashSet::new())),
            stop_alls: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            completion_tx: Mutex::new(None),
        }
    }

    /// Move the output clock forward.
    pub fn advance_clock(&self, secs: f64) {
        *self.clock.lock().unwrap() += secs;
    }

    /// Everything scheduled so far, in call order.
    pub fn schedules(&self) -> Vec<ScheduledSpan> {
        self.schedules.lock().unwrap().clone()
    }

    /// Report natural completion of a scheduled buffer.
    pub fn complete(&self, id: BufferId) {
        if let Some(tx) = self.completion_tx.lock().unwrap().as_ref() {
            let _ = tx.send(id);
        }
    }

    /// Ids force-stopped by `stop_all`.
    pub fn stopped_ids(&self) -> HashSet<BufferId> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn stop_all_count(&self) -> usize {
        self.stop_alls.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Default for ManualPlayback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AudioPlayback for ManualPlayback {
    async fn open(&self, _config: PlaybackConfig) -> VoiceResult<PlaybackHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.completion_tx.lock().unwrap() = Some(tx);
        let sink = ManualSink {
            clock: Arc::clone(&self.clock),
            schedules: Arc::clone(&self.schedules),
            stopped: Arc::clone(&self.stopped),
            stop_alls: Arc::clone(&self.stop_alls),
            closes: Arc::clone(&self.closes),
        };
        Ok(PlaybackHandle::new(Box::new(sink), rx))
    }
}

struct ManualSink {
    clock: Arc<Mutex<f64>>,
    schedules: Arc<Mutex<Vec<ScheduledSpan>>>,
    stopped: Arc<Mutex<HashSet<BufferId>>>,
    stop_alls: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl PlaybackSink for ManualSink {
    fn clock_now(&self) -> f64 {
        *self.clock.lock().unwrap()
    }

    fn schedule(&mut self, id: BufferId, buffer: PlaybackBuffer, start_at: f64) -> VoiceResult<()> {
        self.schedules.lock().unwrap().push(ScheduledSpan {
            id,
            start_at,
            duration: buffer.duration_secs(),
        });
        Ok(())
    }

    fn stop_all(&mut self) -> VoiceResult<()> {
        self.stop_alls.fetch_add(1, Ordering::SeqCst);
        let mut stopped = self.stopped.lock().unwrap();
        for span in self.schedules.lock().unwrap().iter() {
            stopped.insert(span.id);
        }
        Ok(())
    }

    fn close(&mut self) -> VoiceResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_config_defaults() {
        let c = CaptureConfig::default();
        assert_eq!(c.sample_rate, 16000);
        assert_eq!(c.channels, 1);
        assert_eq!(c.frame_size, 4096);
    }

    #[test]
    fn playback_config_defaults() {
        let c = PlaybackConfig::default();
        assert_eq!(c.sample_rate, 24000);
        assert_eq!(c.channels, 1);
    }

    #[tokio::test]
    async fn scripted_capture_delivers_fed_frames() {
        let capture = ScriptedCapture::new();
        let mut handle = capture.acquire(CaptureConfig::default()).await.unwrap();
        capture.feed(vec![0.1, 0.2]);
        let frame = handle.next_frame().await.unwrap();
        assert_eq!(frame, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn denied_capture_fails_acquisition() {
        let result = DeniedCapture.acquire(CaptureConfig::default()).await;
        assert!(matches!(result, Err(VoiceError::DeviceAcquisition(_))));
    }
}
