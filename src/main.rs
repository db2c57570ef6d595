//! CLI harness for the speech pipeline.
//!
//! Stands in for the chat UI shell: wires the real platform backends to
//! the pipeline and drives it from stdin commands. Recognized speech is
//! narrated back through the speech queue so the whole loop can be
//! exercised from a terminal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use fablevoice::recording::{CpalCapture, RecordingController, StopOutcome};
use fablevoice::settings::{self, AppSettings};
use fablevoice::speech::{CpalPlayer, HttpSynthesisClient, SpeechQueue};
use fablevoice::transcription::TranscriptionClient;

const HELP: &str = "\
commands:
  start         begin recording
  stop          stop recording, transcribe, narrate the transcript
  cancel        stop recording and discard it
  say <text>    enqueue narration for <text>
  replay <id>   replay a narrated message by id
  skip          skip the current narration
  clear         stop narration and empty the queue
  status        print the current queue snapshot
  quit          exit";

#[tokio::main]
async fn main() {
    // Load .env if present; production uses real environment variables.
    let _ = dotenvy::dotenv();
    env_logger::init();

    let settings_path = settings::default_settings_path()
        .unwrap_or_else(|| PathBuf::from("settings.json"));
    let settings = settings::load_settings(&settings_path);
    log::info!("Settings loaded from {:?}", settings_path);

    let capture = Arc::new(CpalCapture::new());
    let mut recorder = RecordingController::new(
        capture,
        Duration::from_millis(settings.min_recording_ms),
    );

    let transcriber = TranscriptionClient::new(
        settings.stt_endpoint.clone(),
        settings.transcription_model.clone(),
        Duration::from_secs(settings.transcription_timeout_secs),
    );

    let synthesis = Arc::new(HttpSynthesisClient::new(settings.tts_endpoint.clone()));
    let player = Arc::new(CpalPlayer::new());
    let (queue, snapshots, mut notices) =
        SpeechQueue::spawn(synthesis, player, settings.cache_capacity);

    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            println!("! {}", notice.message);
        }
    });

    println!("fablevoice harness ready");
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut message_counter: u64 = 0;
    let max_recording = Duration::from_secs(settings.max_recording_secs);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => break,
            },
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                if recorder.elapsed().map(|e| e >= max_recording).unwrap_or(false) {
                    println!("max recording duration reached, stopping");
                    stop_and_narrate(&mut recorder, &transcriber, &queue, &settings, &mut message_counter).await;
                }
                continue;
            }
        };

        let line = line.trim();
        let (command, rest) = match line.split_once(' ') {
            Some((c, r)) => (c, r.trim()),
            None => (line, ""),
        };

        match command {
            "" => {}
            "help" => println!("{}", HELP),
            "start" => match recorder.start().await {
                Ok(outcome) => println!("recording: {:?}", outcome),
                Err(e) => println!("! {}", e),
            },
            "stop" => {
                stop_and_narrate(&mut recorder, &transcriber, &queue, &settings, &mut message_counter).await;
            }
            "cancel" => {
                if let Err(e) = recorder.cancel().await {
                    println!("! {}", e);
                } else {
                    println!("recording cancelled");
                }
            }
            "say" if !rest.is_empty() => {
                message_counter += 1;
                let id = format!("msg-{}", message_counter);
                queue
                    .enqueue(id.clone(), rest.to_string(), settings.synthesis_options())
                    .await;
                println!("queued {}", id);
            }
            "replay" if !rest.is_empty() => {
                queue
                    .play_message(rest.to_string(), None, settings.synthesis_options())
                    .await;
            }
            "skip" => queue.skip_to_next().await,
            "clear" => queue.clear().await,
            "status" => {
                let snapshot = snapshots.borrow().clone();
                match serde_json::to_string_pretty(&snapshot) {
                    Ok(json) => println!("{}", json),
                    Err(e) => println!("! {}", e),
                }
            }
            "quit" | "exit" => break,
            other => println!("unknown command: {} (try 'help')", other),
        }
    }

    queue.shutdown().await;
    println!("bye");
}

/// Stop the recording, transcribe it, and narrate the transcript.
async fn stop_and_narrate(
    recorder: &mut RecordingController,
    transcriber: &TranscriptionClient,
    queue: &SpeechQueue,
    settings: &AppSettings,
    message_counter: &mut u64,
) {
    let captured = match recorder.stop().await {
        Ok(StopOutcome::Captured(captured)) => captured,
        Ok(StopOutcome::TooShort { duration }) => {
            println!("! recording too short ({}ms), discarded", duration.as_millis());
            return;
        }
        Ok(StopOutcome::Ignored) => {
            println!("nothing to stop");
            return;
        }
        Err(e) => {
            println!("! {}", e);
            return;
        }
    };

    println!("transcribing {} bytes...", captured.size_bytes);
    let cancel = CancellationToken::new();
    match transcriber
        .transcribe(&captured.wav_path, settings.language.as_deref(), &cancel)
        .await
    {
        Ok(text) => {
            println!("you said: {}", text);
            *message_counter += 1;
            let id = format!("msg-{}", message_counter);
            queue
                .enqueue(id.clone(), text, settings.synthesis_options())
                .await;
            println!("narrating as {}", id);
        }
        Err(e) => println!("! {}", e),
    }

    if let Ok(cleaned) = fablevoice::recording::cleanup_old_recordings() {
        if cleaned > 0 {
            log::info!("Cleaned up {} old recordings", cleaned);
        }
    }
}
