//! Synthesized-audio playback backed by Rodio.
//!
//! A rodio sink plays appended sources back to back, which is exactly the
//! gapless queue the scheduling cursor describes: a chunk scheduled at the
//! cursor lands right behind the previous one, and a chunk scheduled in the
//! future (empty queue, fresh turn) is padded with leading silence. The
//! `OutputStream` is not `Send`, so the sink lives on a dedicated thread;
//! natural completions are timed off the shared output clock.

use crate::audio::{AudioPlayback, BufferId, PlaybackConfig, PlaybackHandle, PlaybackSink};
use crate::codec::PlaybackBuffer;
use crate::error::{VoiceError, VoiceResult};
use rodio::buffer::SamplesBuffer;
use rodio::source::Zero;
use rodio::{OutputStream, Sink, Source};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Production playback: the default output device.
#[derive(Debug, Default)]
pub struct RodioPlayback;

enum Command {
    Schedule {
        id: BufferId,
        buffer: PlaybackBuffer,
        start_at: f64,
    },
    StopAll,
    Close,
}

#[async_trait::async_trait]
impl AudioPlayback for RodioPlayback {
    async fn open(&self, config: PlaybackConfig) -> VoiceResult<PlaybackHandle> {
        let (ready_tx, ready_rx) = oneshot::channel::<VoiceResult<()>>();
        let (cmd_tx, cmd_rx) = std_mpsc::channel::<Command>();
        let (done_tx, done_rx) = mpsc::unbounded_channel::<BufferId>();
        let opened = Instant::now();

        debug!(rate = config.sample_rate, channels = config.channels, "opening playback");

        thread::Builder::new()
            .name("bico-playback".into())
            .spawn(move || playback_thread(opened, ready_tx, cmd_rx, done_tx))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(PlaybackHandle::new(
                Box::new(RodioSink {
                    commands: Some(cmd_tx),
                    opened,
                }),
                done_rx,
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VoiceError::Playback(
                "playback thread died during setup".to_string(),
            )),
        }
    }
}

fn playback_thread(
    opened: Instant,
    ready_tx: oneshot::Sender<VoiceResult<()>>,
    cmd_rx: std_mpsc::Receiver<Command>,
    done_tx: mpsc::UnboundedSender<BufferId>,
) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
            return;
        }
    };
    let sink = match Sink::try_new(&handle) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));
    info!("🔊 playback sink ready");

    // Min-heap of (end-time-in-micros, id) for natural-completion reporting.
    let mut due: BinaryHeap<Reverse<(u64, BufferId)>> = BinaryHeap::new();

    loop {
        let now_us = micros(opened);
        let wait = due
            .peek()
            .map(|Reverse((end_us, _))| Duration::from_micros(end_us.saturating_sub(now_us)))
            .unwrap_or(Duration::from_millis(200));

        match cmd_rx.recv_timeout(wait) {
            Ok(Command::Schedule { id, buffer, start_at }) => {
                let now = opened.elapsed().as_secs_f64();
                // An empty queue with a future start gets leading silence;
                // otherwise the sequential queue already lands the chunk at
                // the cursor.
                if sink.empty() && start_at > now + 1e-3 {
                    let silence = Zero::<f32>::new(buffer.channels, buffer.sample_rate)
                        .take_duration(Duration::from_secs_f64(start_at - now));
                    sink.append(silence);
                }
                let duration = buffer.duration_secs();
                sink.append(SamplesBuffer::new(
                    buffer.channels,
                    buffer.sample_rate,
                    buffer.samples,
                ));
                due.push(Reverse((((start_at + duration) * 1e6) as u64, id)));
            }
            Ok(Command::StopAll) => {
                sink.stop();
                // Force-stopped buffers do not report completion.
                due.clear();
            }
            Ok(Command::Close) | Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
        }

        let now_us = micros(opened);
        while let Some(&Reverse((end_us, id))) = due.peek() {
            if end_us > now_us {
                break;
            }
            due.pop();
            if done_tx.send(id).is_err() {
                warn!("completion receiver gone");
                due.clear();
                break;
            }
        }
    }
    debug!("playback thread exiting");
}

fn micros(opened: Instant) -> u64 {
    (opened.elapsed().as_secs_f64() * 1e6) as u64
}

struct RodioSink {
    commands: Option<std_mpsc::Sender<Command>>,
    opened: Instant,
}

impl RodioSink {
    fn send(&self, command: Command) -> VoiceResult<()> {
        let tx = self
            .commands
            .as_ref()
            .ok_or_else(|| VoiceError::Playback("playback already closed".to_string()))?;
        tx.send(command)
            .map_err(|e| VoiceError::ChannelSend(e.to_string()))
    }
}

impl PlaybackSink for RodioSink {
    fn clock_now(&self) -> f64 {
        self.opened.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, id: BufferId, buffer: PlaybackBuffer, start_at: f64) -> VoiceResult<()> {
        self.send(Command::Schedule { id, buffer, start_at })
    }

    fn stop_all(&mut self) -> VoiceResult<()> {
        self.send(Command::StopAll)
    }

    fn close(&mut self) -> VoiceResult<()> {
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(Command::Close);
        }
        Ok(())
    }
}
