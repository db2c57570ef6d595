//! FIFO narration queue.
//!
//! A single control-loop task owns the queue, the playback state, and the
//! audio cache. Everything else talks to it through messages: commands
//! from the shell, synthesis results from spawned tasks, completion events
//! from the playback backend. Single writer, no locks.
//!
//! Two guards protect the loop from stale asynchrony:
//! - playback tokens: a `Finished` event for a playback the loop already
//!   stopped is dropped silently;
//! - generations: `clear()` bumps a counter, so a synthesis result issued
//!   before the clear may still populate the cache but never starts
//!   playback.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use super::cache::AudioCache;
use super::playback::{PlaybackBackend, PlayerEvent};
use super::synthesis::{SynthesisBackend, SynthesisOptions};
use super::{AudioClip, SpeechError};

const CMD_CHANNEL_CAPACITY: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 8;
const NOTICE_CHANNEL_CAPACITY: usize = 16;

/// A unit of narration: one chat message to speak aloud.
///
/// Ids are chat message ids, not unique within the queue — enqueuing the
/// same id twice deliberately produces two playback events.
#[derive(Debug, Clone)]
pub struct SpeechQueueItem {
    pub id: String,
    pub text: String,
    pub options: SynthesisOptions,
}

/// Snapshot of queue state published to the shell after every change.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub is_synthesizing: bool,
    pub is_playing: bool,
    /// Message id of the item currently playing.
    pub current: Option<String>,
    /// Message ids still waiting in FIFO order.
    pub queued: Vec<String>,
}

/// One user-visible notification. Every failure path emits exactly one.
#[derive(Debug, Clone)]
pub struct Notice {
    pub message: String,
}

enum Command {
    Enqueue {
        item: SpeechQueueItem,
    },
    PlayMessage {
        id: String,
        text: Option<String>,
        options: SynthesisOptions,
    },
    Clear,
    SkipToNext,
    Shutdown,
}

struct SynthesisDone {
    generation: u64,
    id: String,
    result: Result<AudioClip, SpeechError>,
}

/// Handle to the speech queue control loop.
#[derive(Clone)]
pub struct SpeechQueue {
    cmd_tx: mpsc::Sender<Command>,
}

impl SpeechQueue {
    /// Spawn the control loop. Returns the handle, a watch receiver for
    /// state snapshots, and the notice channel.
    pub fn spawn(
        synthesis: Arc<dyn SynthesisBackend>,
        player: Arc<dyn PlaybackBackend>,
        cache_capacity: usize,
    ) -> (
        Self,
        watch::Receiver<QueueSnapshot>,
        mpsc::Receiver<Notice>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (synth_tx, synth_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (player_tx, player_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (notice_tx, notice_rx) = mpsc::channel(NOTICE_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(QueueSnapshot::default());

        let worker = Worker {
            synthesis,
            player,
            queue: VecDeque::new(),
            cache: AudioCache::new(cache_capacity),
            current: None,
            in_flight: None,
            generation: 0,
            next_token: 0,
            synth_tx,
            player_tx,
            snapshot_tx,
            notice_tx,
        };
        tokio::spawn(worker.run(cmd_rx, synth_rx, player_rx));

        (Self { cmd_tx }, snapshot_rx, notice_rx)
    }

    /// Append a narration item to the tail of the queue.
    pub async fn enqueue(&self, id: impl Into<String>, text: impl Into<String>, options: SynthesisOptions) {
        self.send(Command::Enqueue {
            item: SpeechQueueItem {
                id: id.into(),
                text: text.into(),
                options,
            },
        })
        .await;
    }

    /// Out-of-band replay request. If the id is cached this preempts the
    /// current playback; otherwise, with text supplied, it falls back to
    /// the normal FIFO path.
    pub async fn play_message(
        &self,
        id: impl Into<String>,
        text: Option<String>,
        options: SynthesisOptions,
    ) {
        self.send(Command::PlayMessage {
            id: id.into(),
            text,
            options,
        })
        .await;
    }

    /// Stop current playback and drop all pending items. The audio cache
    /// is left intact.
    pub async fn clear(&self) {
        self.send(Command::Clear).await;
    }

    /// Stop current playback and let the processor advance to the next item.
    pub async fn skip_to_next(&self) {
        self.send(Command::SkipToNext).await;
    }

    pub async fn shutdown(&self) {
        self.send(Command::Shutdown).await;
    }

    async fn send(&self, command: Command) {
        if self.cmd_tx.send(command).await.is_err() {
            log::warn!("Speech queue is gone; command dropped");
        }
    }
}

struct CurrentPlayback {
    id: String,
    token: u64,
}

struct InFlightSynthesis {
    id: String,
}

struct Worker {
    synthesis: Arc<dyn SynthesisBackend>,
    player: Arc<dyn PlaybackBackend>,
    queue: VecDeque<SpeechQueueItem>,
    cache: AudioCache,
    current: Option<CurrentPlayback>,
    in_flight: Option<InFlightSynthesis>,
    generation: u64,
    next_token: u64,
    synth_tx: mpsc::Sender<SynthesisDone>,
    player_tx: mpsc::Sender<PlayerEvent>,
    snapshot_tx: watch::Sender<QueueSnapshot>,
    notice_tx: mpsc::Sender<Notice>,
}

impl Worker {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut synth_rx: mpsc::Receiver<SynthesisDone>,
        mut player_rx: mpsc::Receiver<PlayerEvent>,
    ) {
        log::info!("Speech queue started");
        self.publish();

        loop {
            tokio::select! {
                Some(command) = cmd_rx.recv() => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Some(done) = synth_rx.recv() => self.handle_synthesis_done(done),
                Some(event) = player_rx.recv() => self.handle_player_event(event),
                else => break,
            }

            self.pump().await;
            self.publish();
        }

        log::info!("Speech queue ended");
    }

    /// Returns false on shutdown.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Enqueue { item } => {
                log::debug!("Enqueued narration for message {}", item.id);
                self.queue.push_back(item);
            }

            Command::PlayMessage { id, text, options } => {
                if let Some(clip) = self.cache.get(&id) {
                    // Preemption: the one path that does not wait its turn.
                    // The interrupted item is dropped, not resumed.
                    self.player.stop().await;
                    if let Some(preempted) = self.current.take() {
                        log::debug!(
                            "Preempting playback of {} for replay of {}",
                            preempted.id,
                            id
                        );
                    }
                    self.start_playback(id, clip).await;
                } else if let Some(text) = text {
                    log::debug!("Replay of {} not cached; falling back to enqueue", id);
                    self.queue.push_back(SpeechQueueItem { id, text, options });
                } else {
                    self.notify(SpeechError::AudioUnavailable.to_string());
                }
            }

            Command::Clear => {
                self.player.stop().await;
                self.current = None;
                self.queue.clear();
                // Orphan any in-flight synthesis: its result may still
                // populate the cache, but must not revive the queue.
                self.generation += 1;
                self.in_flight = None;
                log::info!("Speech queue cleared");
            }

            Command::SkipToNext => {
                if self.current.is_some() {
                    self.player.stop().await;
                    self.current = None;
                } else if let Some(skipped) = self.queue.pop_front() {
                    if self
                        .in_flight
                        .as_ref()
                        .map(|f| f.id == skipped.id)
                        .unwrap_or(false)
                    {
                        self.generation += 1;
                        self.in_flight = None;
                    }
                    log::debug!("Skipped pending narration for {}", skipped.id);
                }
            }

            Command::Shutdown => {
                self.player.stop().await;
                return false;
            }
        }
        true
    }

    fn handle_synthesis_done(&mut self, done: SynthesisDone) {
        if done.generation != self.generation {
            // The queue was cleared (or the head skipped) while this
            // synthesis was in flight. Cache the audio for later reuse,
            // but never start playback from it.
            if let Ok(clip) = done.result {
                log::debug!("Orphaned synthesis for {} cached", done.id);
                self.cache.insert(done.id, Arc::new(clip));
            }
            return;
        }

        self.in_flight = None;
        match done.result {
            Ok(clip) => {
                // The head is still in the queue; the next pump pass will
                // hit the cache and start playback in FIFO position.
                self.cache.insert(done.id, Arc::new(clip));
            }
            Err(e) => {
                // Drop only the offending item; the queue keeps going.
                if self.queue.front().map(|i| i.id == done.id).unwrap_or(false) {
                    self.queue.pop_front();
                }
                self.notify(format!("Narration for message {} failed: {}", done.id, e));
            }
        }
    }

    fn handle_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Finished { token } => match &self.current {
                Some(current) if current.token == token => {
                    log::debug!("Playback of {} finished", current.id);
                    self.current = None;
                }
                _ => log::debug!("Stale finished event for token {}", token),
            },
            PlayerEvent::Failed { token, message } => match &self.current {
                Some(current) if current.token == token => {
                    let id = current.id.clone();
                    self.current = None;
                    self.notify(format!("Narration playback for {} failed: {}", id, message));
                }
                _ => log::debug!("Stale failure event for token {}", token),
            },
        }
    }

    /// Advance the queue: whenever nothing is playing and no synthesis is
    /// pending, take the head, reuse cached audio or synthesize, and play.
    async fn pump(&mut self) {
        while self.current.is_none() && self.in_flight.is_none() {
            let Some(head_id) = self.queue.front().map(|i| i.id.clone()) else {
                break;
            };

            if let Some(clip) = self.cache.get(&head_id) {
                if let Some(item) = self.queue.pop_front() {
                    self.start_playback(item.id, clip).await;
                }
            } else if let Some(head) = self.queue.front().cloned() {
                self.spawn_synthesis(head);
            }
        }
    }

    fn spawn_synthesis(&mut self, item: SpeechQueueItem) {
        log::debug!("Synthesizing narration for message {}", item.id);
        self.in_flight = Some(InFlightSynthesis {
            id: item.id.clone(),
        });

        let synthesis = self.synthesis.clone();
        let tx = self.synth_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = synthesis.synthesize(&item.text, &item.options).await;
            let _ = tx
                .send(SynthesisDone {
                    generation,
                    id: item.id,
                    result,
                })
                .await;
        });
    }

    async fn start_playback(&mut self, id: String, clip: Arc<AudioClip>) {
        let token = self.next_token;
        self.next_token += 1;

        match self
            .player
            .start(clip, token, self.player_tx.clone())
            .await
        {
            Ok(()) => {
                log::debug!("Playing narration for message {} (token {})", id, token);
                self.current = Some(CurrentPlayback { id, token });
            }
            Err(e) => {
                // Item already left the queue; one notice, then move on.
                self.notify(format!("Narration playback for {} failed: {}", id, e));
            }
        }
    }

    fn notify(&self, message: String) {
        log::warn!("{}", message);
        if self.notice_tx.try_send(Notice { message }).is_err() {
            log::warn!("Notice channel full; notice dropped");
        }
    }

    fn publish(&self) {
        let snapshot = QueueSnapshot {
            is_synthesizing: self.in_flight.is_some(),
            is_playing: self.current.is_some(),
            current: self.current.as_ref().map(|c| c.id.clone()),
            queued: self.queue.iter().map(|i| i.id.clone()).collect(),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}
