//! Bounded LRU cache of synthesized audio, keyed by message id.
//!
//! The observed mobile client let this map grow for the whole app session;
//! here the capacity is bounded and the least recently used clip is
//! evicted. The cache survives queue clears by design.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::AudioClip;

pub struct AudioCache {
    capacity: usize,
    map: HashMap<String, Arc<AudioClip>>,
    // Recency order: front = least recently used.
    recency: VecDeque<String>,
}

impl AudioCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    /// Look up a clip and mark it as recently used.
    pub fn get(&mut self, id: &str) -> Option<Arc<AudioClip>> {
        let clip = self.map.get(id).cloned()?;
        self.touch(id);
        Some(clip)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.map.contains_key(id)
    }

    /// Insert a clip, evicting the least recently used entry at capacity.
    pub fn insert(&mut self, id: String, clip: Arc<AudioClip>) {
        if self.map.insert(id.clone(), clip).is_some() {
            self.touch(&id);
            return;
        }

        if self.map.len() > self.capacity {
            if let Some(evicted) = self.recency.pop_front() {
                self.map.remove(&evicted);
                log::debug!("Audio cache evicted clip for message {}", evicted);
            }
        }
        self.recency.push_back(id);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == id) {
            self.recency.remove(pos);
            self.recency.push_back(id.to_string());
        }
    }
}
