//! Speech queue integration tests with mock synthesis and playback
//! backends: FIFO order, cache reuse, preemption, failure isolation, and
//! the clear-vs-synthesis race.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Semaphore};

use fablevoice::speech::{
    AudioClip, Notice, PlaybackBackend, PlayerEvent, QueueSnapshot, SpeechError, SpeechQueue,
    SynthesisBackend, SynthesisOptions,
};

// ============================================================================
// Mock backends
// ============================================================================

/// Synthesis mock: records every call, optionally gated on a semaphore so
/// tests can hold a synthesis in flight, optionally failing chosen texts.
struct MockSynthesis {
    calls: StdMutex<Vec<String>>,
    fail_texts: HashSet<String>,
    gate: Option<Arc<Semaphore>>,
}

impl MockSynthesis {
    fn new() -> Self {
        Self {
            calls: StdMutex::new(Vec::new()),
            fail_texts: HashSet::new(),
            gate: None,
        }
    }

    fn failing(texts: &[&str]) -> Self {
        Self {
            fail_texts: texts.iter().map(|t| t.to_string()).collect(),
            ..Self::new()
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SynthesisBackend for MockSynthesis {
    async fn synthesize(
        &self,
        text: &str,
        _options: &SynthesisOptions,
    ) -> Result<AudioClip, SpeechError> {
        self.calls.lock().unwrap().push(text.to_string());
        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.expect("gate closed");
            permit.forget();
        }
        if self.fail_texts.contains(text) {
            return Err(SpeechError::SynthesisFailed("mock failure".into()));
        }
        Ok(AudioClip {
            data: text.as_bytes().to_vec(),
        })
    }
}

struct StartedPlayback {
    token: u64,
    data: Vec<u8>,
    events: mpsc::Sender<PlayerEvent>,
}

/// Playback mock: records starts and lets tests report completion for any
/// token, including stale ones.
struct MockPlayer {
    started: StdMutex<Vec<StartedPlayback>>,
    stops: AtomicUsize,
}

impl MockPlayer {
    fn new() -> Self {
        Self {
            started: StdMutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        }
    }

    fn start_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    fn started_data(&self, index: usize) -> Vec<u8> {
        self.started.lock().unwrap()[index].data.clone()
    }

    async fn finish(&self, index: usize) {
        let (token, events) = {
            let started = self.started.lock().unwrap();
            (started[index].token, started[index].events.clone())
        };
        events
            .send(PlayerEvent::Finished { token })
            .await
            .expect("queue gone");
    }
}

#[async_trait]
impl PlaybackBackend for MockPlayer {
    async fn start(
        &self,
        clip: Arc<AudioClip>,
        token: u64,
        events: mpsc::Sender<PlayerEvent>,
    ) -> Result<(), SpeechError> {
        self.started.lock().unwrap().push(StartedPlayback {
            token,
            data: clip.data.clone(),
            events,
        });
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn spawn_queue(
    synthesis: Arc<MockSynthesis>,
    player: Arc<MockPlayer>,
) -> (
    SpeechQueue,
    watch::Receiver<QueueSnapshot>,
    mpsc::Receiver<Notice>,
) {
    SpeechQueue::spawn(synthesis, player, 8)
}

async fn wait_for(
    rx: &mut watch::Receiver<QueueSnapshot>,
    what: &str,
    pred: impl Fn(&QueueSnapshot) -> bool,
) -> QueueSnapshot {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            {
                let snapshot = rx.borrow();
                if pred(&snapshot) {
                    return snapshot.clone();
                }
            }
            rx.changed().await.expect("queue ended");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for: {}", what))
}

fn opts() -> SynthesisOptions {
    SynthesisOptions::default()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn items_play_in_fifo_order() {
    let synthesis = Arc::new(MockSynthesis::new());
    let player = Arc::new(MockPlayer::new());
    let (queue, mut snapshots, _notices) = spawn_queue(synthesis.clone(), player.clone());

    queue.enqueue("m1", "alpha", opts()).await;
    queue.enqueue("m2", "beta", opts()).await;

    let snap = wait_for(&mut snapshots, "m1 playing with m2 queued", |s| {
        s.current.as_deref() == Some("m1") && !s.queued.is_empty()
    })
    .await;
    // m2 must wait its turn while m1 plays.
    assert_eq!(snap.queued, vec!["m2".to_string()]);
    assert_eq!(player.start_count(), 1);
    assert_eq!(player.started_data(0), b"alpha");

    player.finish(0).await;
    wait_for(&mut snapshots, "m2 playing", |s| {
        s.current.as_deref() == Some("m2")
    })
    .await;
    assert_eq!(player.started_data(1), b"beta");

    player.finish(1).await;
    wait_for(&mut snapshots, "queue idle", |s| {
        !s.is_playing && s.queued.is_empty()
    })
    .await;
}

#[tokio::test]
async fn replay_reuses_cached_audio() {
    let synthesis = Arc::new(MockSynthesis::new());
    let player = Arc::new(MockPlayer::new());
    let (queue, mut snapshots, _notices) = spawn_queue(synthesis.clone(), player.clone());

    queue.enqueue("m1", "hello", opts()).await;
    wait_for(&mut snapshots, "m1 playing", |s| {
        s.current.as_deref() == Some("m1")
    })
    .await;
    player.finish(0).await;
    wait_for(&mut snapshots, "idle", |s| !s.is_playing).await;

    queue.play_message("m1", None, opts()).await;
    wait_for(&mut snapshots, "m1 replaying", |s| {
        s.current.as_deref() == Some("m1")
    })
    .await;

    // Second playback, but only one synthesis call.
    assert_eq!(player.start_count(), 2);
    assert_eq!(synthesis.call_count(), 1);
}

#[tokio::test]
async fn cached_replay_preempts_current_playback() {
    let synthesis = Arc::new(MockSynthesis::new());
    let player = Arc::new(MockPlayer::new());
    let (queue, mut snapshots, _notices) = spawn_queue(synthesis.clone(), player.clone());

    // Get m2 into the cache.
    queue.enqueue("m2", "second", opts()).await;
    wait_for(&mut snapshots, "m2 playing", |s| {
        s.current.as_deref() == Some("m2")
    })
    .await;
    player.finish(0).await;
    wait_for(&mut snapshots, "idle", |s| !s.is_playing).await;

    // Now play m1 and preempt it with the cached m2.
    queue.enqueue("m1", "first", opts()).await;
    wait_for(&mut snapshots, "m1 playing", |s| {
        s.current.as_deref() == Some("m1")
    })
    .await;

    let stops_before = player.stops.load(Ordering::SeqCst);
    queue.play_message("m2", None, opts()).await;
    let snap = wait_for(&mut snapshots, "m2 preempting", |s| {
        s.current.as_deref() == Some("m2")
    })
    .await;

    assert!(player.stops.load(Ordering::SeqCst) > stops_before);
    assert_eq!(player.started_data(player.start_count() - 1), b"second");
    // The preempted item is dropped, not requeued.
    assert!(snap.queued.is_empty());

    // A finished event for the preempted playback must not disturb the
    // replay: its token is stale.
    player.finish(1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(snapshots.borrow().current.as_deref(), Some("m2"));
}

#[tokio::test]
async fn synthesis_failure_drops_item_and_continues() {
    let synthesis = Arc::new(MockSynthesis::failing(&["boom"]));
    let player = Arc::new(MockPlayer::new());
    let (queue, mut snapshots, mut notices) = spawn_queue(synthesis.clone(), player.clone());

    queue.enqueue("bad", "boom", opts()).await;
    queue.enqueue("good", "fine", opts()).await;

    // The queue is not stuck: the failing item is dropped and the next
    // one still plays.
    wait_for(&mut snapshots, "good playing", |s| {
        s.current.as_deref() == Some("good")
    })
    .await;
    assert_eq!(player.start_count(), 1);
    assert_eq!(player.started_data(0), b"fine");

    let notice = tokio::time::timeout(Duration::from_secs(1), notices.recv())
        .await
        .expect("no notice")
        .expect("notice channel closed");
    assert!(notice.message.contains("bad"));
}

#[tokio::test]
async fn clear_during_synthesis_caches_but_never_plays() {
    let gate = Arc::new(Semaphore::new(0));
    let synthesis = Arc::new(MockSynthesis::gated(gate.clone()));
    let player = Arc::new(MockPlayer::new());
    let (queue, mut snapshots, _notices) = spawn_queue(synthesis.clone(), player.clone());

    queue.enqueue("m1", "held", opts()).await;
    wait_for(&mut snapshots, "synthesis in flight", |s| s.is_synthesizing).await;

    queue.clear().await;
    wait_for(&mut snapshots, "queue emptied", |s| {
        s.queued.is_empty() && !s.is_synthesizing
    })
    .await;

    // Release the in-flight synthesis; its result must not revive playback.
    gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(player.start_count(), 0);
    assert!(!snapshots.borrow().is_playing);

    // But the orphaned result did land in the cache: a replay by id alone
    // works without a second synthesis call.
    queue.play_message("m1", None, opts()).await;
    wait_for(&mut snapshots, "m1 playing from cache", |s| {
        s.current.as_deref() == Some("m1")
    })
    .await;
    assert_eq!(synthesis.call_count(), 1);
}

#[tokio::test]
async fn replay_without_cache_or_text_raises_audio_unavailable() {
    let synthesis = Arc::new(MockSynthesis::new());
    let player = Arc::new(MockPlayer::new());
    let (queue, _snapshots, mut notices) = spawn_queue(synthesis.clone(), player.clone());

    queue.play_message("ghost", None, opts()).await;

    let notice = tokio::time::timeout(Duration::from_secs(1), notices.recv())
        .await
        .expect("no notice")
        .expect("notice channel closed");
    assert!(notice.message.contains("unavailable"));
    assert_eq!(player.start_count(), 0);
}

#[tokio::test]
async fn replay_with_text_falls_back_to_fifo() {
    let synthesis = Arc::new(MockSynthesis::new());
    let player = Arc::new(MockPlayer::new());
    let (queue, mut snapshots, _notices) = spawn_queue(synthesis.clone(), player.clone());

    queue.enqueue("m1", "one", opts()).await;
    queue
        .play_message("m2", Some("two".to_string()), opts())
        .await;

    // m2 is not cached, so it queues behind m1 instead of preempting.
    wait_for(&mut snapshots, "m1 playing", |s| {
        s.current.as_deref() == Some("m1")
    })
    .await;
    player.finish(0).await;
    wait_for(&mut snapshots, "m2 playing", |s| {
        s.current.as_deref() == Some("m2")
    })
    .await;
}

#[tokio::test]
async fn duplicate_id_enqueue_plays_twice() {
    let synthesis = Arc::new(MockSynthesis::new());
    let player = Arc::new(MockPlayer::new());
    let (queue, mut snapshots, _notices) = spawn_queue(synthesis.clone(), player.clone());

    queue.enqueue("m1", "again", opts()).await;
    queue.enqueue("m1", "again", opts()).await;

    wait_for(&mut snapshots, "first playback", |s| {
        s.is_playing && s.queued.len() == 1
    })
    .await;
    player.finish(0).await;
    wait_for(&mut snapshots, "second playback", |s| {
        s.is_playing && s.queued.is_empty()
    })
    .await;
    player.finish(1).await;
    wait_for(&mut snapshots, "idle", |s| !s.is_playing).await;

    // Two playback events; the second came from the cache.
    assert_eq!(player.start_count(), 2);
    assert_eq!(synthesis.call_count(), 1);
}

#[tokio::test]
async fn skip_advances_to_next_item() {
    let synthesis = Arc::new(MockSynthesis::new());
    let player = Arc::new(MockPlayer::new());
    let (queue, mut snapshots, _notices) = spawn_queue(synthesis.clone(), player.clone());

    queue.enqueue("m1", "one", opts()).await;
    queue.enqueue("m2", "two", opts()).await;
    wait_for(&mut snapshots, "m1 playing", |s| {
        s.current.as_deref() == Some("m1")
    })
    .await;

    queue.skip_to_next().await;
    wait_for(&mut snapshots, "m2 playing after skip", |s| {
        s.current.as_deref() == Some("m2")
    })
    .await;
    assert_eq!(player.started_data(1), b"two");
}
