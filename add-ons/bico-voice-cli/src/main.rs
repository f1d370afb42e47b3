//! Terminal front-end for a live voice conversation.
//!
//! Starts one session against the real microphone, speaker, and live
//! endpoint, renders the in-progress partial transcripts as a status line,
//! and prints finalized turns as chat history. Ctrl-C ends the session.

use bico_voice::{
    CpalCapture, GeminiLive, LiveVoiceManager, ManagerConfig, RodioPlayback, Speaker,
    TranscriptEntry,
};
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[bico-voice-cli] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let connector = match GeminiLive::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[bico-voice-cli] {e}");
            std::process::exit(1);
        }
    };

    let config = ManagerConfig::from_env();
    tracing::info!(model = %config.live.model, voice = %config.live.voice, "bico voice front-end starting");

    let (entries_tx, mut entries_rx) = mpsc::unbounded_channel::<TranscriptEntry>();
    let mut manager = LiveVoiceManager::new(
        Arc::new(CpalCapture),
        Arc::new(RodioPlayback),
        Arc::new(connector),
        Arc::new(entries_tx),
        config,
    );

    println!("🎙️  Starting live voice session — speak naturally, Ctrl-C to hang up.\n");
    manager.start().await;

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let mut status_len = 0usize;
    let mut seen_live = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                clear_status(status_len);
                println!("hanging up...");
                break;
            }
            Some(entry) = entries_rx.recv() => {
                clear_status(status_len);
                status_len = 0;
                print_entry(&entry);
            }
            _ = ticker.tick() => {
                let state = manager.state();
                if state != bico_voice::SessionState::Idle {
                    seen_live = true;
                } else if seen_live {
                    // The session ended on its own (error or remote close).
                    clear_status(status_len);
                    break;
                }
                let partial = manager.live_partial();
                let line = if partial.is_empty() {
                    String::new()
                } else {
                    format!("… you: {} | bico: {}", partial.user_input, partial.model_input)
                };
                status_len = redraw_status(&line, status_len);
            }
        }
    }

    manager.stop().await;

    // Anything finalized during teardown still belongs in the history.
    while let Ok(entry) = entries_rx.try_recv() {
        print_entry(&entry);
    }
    println!("session ended.");
}

fn print_entry(entry: &TranscriptEntry) {
    let who = match entry.speaker {
        Speaker::User => "you",
        Speaker::Assistant => "bico",
    };
    println!("[{}] {}: {}", entry.timestamp.format("%H:%M:%S"), who, entry.text);
}

/// Overwrite the in-place status line; returns the new rendered width.
fn redraw_status(line: &str, previous_len: usize) -> usize {
    let width = previous_len.max(line.chars().count());
    print!("\r{line:<width$}");
    let _ = std::io::stdout().flush();
    line.chars().count()
}

fn clear_status(previous_len: usize) {
    if previous_len > 0 {
        print!("\r{:<width$}\r", "", width = previous_len);
        let _ = std::io::stdout().flush();
    }
}
