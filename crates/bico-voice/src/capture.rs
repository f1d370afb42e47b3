//! Microphone capture backed by CPAL.
//!
//! The `cpal::Stream` is not `Send` on every platform, so each acquisition
//! spawns a dedicated thread that owns the stream; the handle returned to
//! the session only holds channels into that thread.

use crate::audio::{AudioCapture, CaptureConfig, CaptureControl, CaptureHandle};
use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Production capture: the default input device.
#[derive(Debug, Default)]
pub struct CpalCapture;

enum Command {
    Stop,
    Release,
}

#[async_trait::async_trait]
impl AudioCapture for CpalCapture {
    async fn acquire(&self, config: CaptureConfig) -> VoiceResult<CaptureHandle> {
        let (ready_tx, ready_rx) = oneshot::channel::<VoiceResult<()>>();
        let (cmd_tx, cmd_rx) = std_mpsc::channel::<Command>();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Vec<f32>>();

        thread::Builder::new()
            .name("bico-capture".into())
            .spawn(move || capture_thread(config, frame_tx, ready_tx, cmd_rx))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(CaptureHandle::new(
                frame_rx,
                Box::new(CpalControl { commands: Some(cmd_tx) }),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VoiceError::DeviceAcquisition(
                "capture thread died during setup".to_string(),
            )),
        }
    }
}

fn capture_thread(
    config: CaptureConfig,
    frame_tx: mpsc::UnboundedSender<Vec<f32>>,
    ready_tx: oneshot::Sender<VoiceResult<()>>,
    cmd_rx: std_mpsc::Receiver<Command>,
) {
    let stream = match build_stream(&config, frame_tx) {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    // Park until told otherwise; dropping the stream releases the device.
    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            Command::Stop => {
                if let Err(e) = stream.pause() {
                    warn!("capture pause failed: {e}");
                }
            }
            Command::Release => break,
        }
    }
    drop(stream);
    info!("capture device released");
}

fn build_stream(
    config: &CaptureConfig,
    frame_tx: mpsc::UnboundedSender<Vec<f32>>,
) -> VoiceResult<cpal::Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::DeviceAcquisition("no input device available".to_string()))?;

    info!(
        "🎤 capturing from {} ({}Hz, {} ch)",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        config.sample_rate,
        config.channels
    );

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let frame_size = config.frame_size;
    let mut pending: Vec<f32> = Vec::with_capacity(frame_size);

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            for &sample in data {
                pending.push(sample);
                if pending.len() >= frame_size {
                    // Receiver gone means the session is over; keep draining
                    // quietly until the device is released.
                    let _ = frame_tx.send(pending.clone());
                    pending.clear();
                }
            }
        },
        move |err| {
            warn!("capture stream error: {err}");
        },
        None,
    )?;

    stream.play()?;
    Ok(stream)
}

struct CpalControl {
    commands: Option<std_mpsc::Sender<Command>>,
}

impl CaptureControl for CpalControl {
    fn stop(&mut self) -> VoiceResult<()> {
        if let Some(tx) = &self.commands {
            tx.send(Command::Stop)
                .map_err(|e| VoiceError::ChannelSend(e.to_string()))?;
        }
        Ok(())
    }

    fn release(&mut self) -> VoiceResult<()> {
        if let Some(tx) = self.commands.take() {
            tx.send(Command::Release)
                .map_err(|e| VoiceError::ChannelSend(e.to_string()))?;
        }
        Ok(())
    }
}

/// List available input devices by name.
pub fn list_input_devices() -> VoiceResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices()?;

    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            names.push(name);
        }
    }
    Ok(names)
}
