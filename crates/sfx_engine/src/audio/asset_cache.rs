//! Streaming asset cache
//!
//! Tracks which decoded assets the device holds and deduplicates concurrent
//! decode requests. Every request for the same source id shares one
//! [`LoadFuture`]; the future settles when the device reports completion
//! through [`AssetCache::handle_event`].
//!
//! Background prefetch feeds a FIFO queue that a periodic tick drains under a
//! small concurrency cap.

use crate::audio::backend::{AudioDevice, DeviceEvent};
use crate::audio::LoadError;
use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Content-derived cache key for a source id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a source id (FNV-1a, 32 bit)
    pub fn for_source(source_id: &str) -> Self {
        let mut hash: u32 = 0x811c_9dc5;
        for byte in source_id.bytes() {
            hash ^= u32::from(byte);
            hash = hash.wrapping_mul(0x0100_0193);
        }
        Self(format!("sfx_{hash:x}"))
    }

    /// Key text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared completion of one decode
pub type LoadFuture = Shared<BoxFuture<'static, Result<CacheKey, LoadError>>>;

/// Streaming and prefetch tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Interval between background prefetch ticks
    pub prefetch_tick_ms: f32,
    /// Background decodes allowed in flight at once
    pub prefetch_max_concurrent: usize,
    /// Worker count for session pack loads when the caller gives none
    pub pack_concurrency: usize,
    /// Upper bound on sources queued by background prewarm
    pub background_candidate_cap: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            prefetch_tick_ms: 80.0,
            prefetch_max_concurrent: 3,
            pack_concurrency: 5,
            background_candidate_cap: 320,
        }
    }
}

enum LoadState {
    Loading {
        future: LoadFuture,
        source_id: String,
        sender: oneshot::Sender<Result<CacheKey, LoadError>>,
    },
    Loaded,
}

fn settled(result: Result<CacheKey, LoadError>) -> LoadFuture {
    future::ready(result).boxed().shared()
}

/// Decode cache with request deduplication and background prefetch
pub struct AssetCache {
    config: StreamingConfig,
    keys: HashMap<String, CacheKey>,
    states: HashMap<CacheKey, LoadState>,
    prefetch_queue: VecDeque<String>,
    prefetch_in_flight: Vec<LoadFuture>,
    prefetch_elapsed_ms: Option<f32>,
    destroyed: bool,
}

impl AssetCache {
    /// Create an empty cache
    pub fn new(config: StreamingConfig) -> Self {
        Self {
            config,
            keys: HashMap::new(),
            states: HashMap::new(),
            prefetch_queue: VecDeque::new(),
            prefetch_in_flight: Vec::new(),
            prefetch_elapsed_ms: None,
            destroyed: false,
        }
    }

    /// Streaming configuration
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Memoized key for a source id
    pub fn key_for(&mut self, source_id: &str) -> CacheKey {
        if let Some(key) = self.keys.get(source_id) {
            return key.clone();
        }
        let key = CacheKey::for_source(source_id);
        log::debug!("Mapped audio source '{source_id}' to cache key {key}");
        self.keys.insert(source_id.to_string(), key.clone());
        key
    }

    /// Whether the source is decoded and playable
    pub fn is_loaded(&mut self, device: &dyn AudioDevice, source_id: &str) -> bool {
        let key = self.key_for(source_id);
        if matches!(self.states.get(&key), Some(LoadState::Loaded)) {
            return true;
        }
        if !self.states.contains_key(&key) && device.is_decoded(&key) {
            self.states.insert(key, LoadState::Loaded);
            return true;
        }
        false
    }

    /// Whether a decode is outstanding for the source
    pub fn is_loading(&mut self, source_id: &str) -> bool {
        let key = self.key_for(source_id);
        matches!(self.states.get(&key), Some(LoadState::Loading { .. }))
    }

    /// Decodes currently outstanding
    pub fn in_flight_count(&self) -> usize {
        self.states
            .values()
            .filter(|state| matches!(state, LoadState::Loading { .. }))
            .count()
    }

    /// Ensure a source is decoded
    ///
    /// Already-loaded sources settle immediately. A source with an
    /// outstanding decode returns the same shared future. Failures settle the
    /// future with an error and leave the source unloaded.
    pub fn ensure_loaded(&mut self, device: &mut dyn AudioDevice, source_id: &str) -> LoadFuture {
        let key = self.key_for(source_id);

        match self.states.get(&key) {
            Some(LoadState::Loaded) => return settled(Ok(key)),
            Some(LoadState::Loading { future, .. }) => return future.clone(),
            None => {}
        }

        if device.is_decoded(&key) {
            self.states.insert(key.clone(), LoadState::Loaded);
            return settled(Ok(key));
        }

        if self.destroyed {
            return settled(Err(LoadError::Destroyed));
        }

        if let Err(e) = device.begin_decode(&key, source_id) {
            if device.is_decoded(&key) {
                self.states.insert(key.clone(), LoadState::Loaded);
                return settled(Ok(key));
            }
            log::error!("Failed to start decode of '{source_id}' ({key}): {e}");
            return settled(Err(LoadError::DecodeFailed {
                source_id: source_id.to_string(),
                reason: e.to_string(),
            }));
        }

        let (sender, receiver) = oneshot::channel();
        let future = receiver
            .map(|result| result.unwrap_or(Err(LoadError::Cancelled)))
            .boxed()
            .shared();
        self.states.insert(
            key,
            LoadState::Loading {
                future: future.clone(),
                source_id: source_id.to_string(),
                sender,
            },
        );
        future
    }

    /// Apply a device notification; returns `true` if it was a decode event
    pub fn handle_event(&mut self, event: &DeviceEvent) -> bool {
        match event {
            DeviceEvent::DecodeCompleted { key } => {
                match self.states.insert(key.clone(), LoadState::Loaded) {
                    Some(LoadState::Loading { sender, .. }) => {
                        let _ = sender.send(Ok(key.clone()));
                    }
                    Some(LoadState::Loaded) | None => {}
                }
                true
            }
            DeviceEvent::DecodeFailed { key, reason } => {
                // A late failure never demotes a loaded asset
                if !matches!(self.states.get(key), Some(LoadState::Loading { .. })) {
                    return true;
                }
                if let Some(LoadState::Loading { sender, source_id, .. }) = self.states.remove(key) {
                    log::error!("Failed to decode audio '{source_id}' ({key}): {reason}");
                    let _ = sender.send(Err(LoadError::DecodeFailed {
                        source_id,
                        reason: reason.clone(),
                    }));
                }
                true
            }
            _ => false,
        }
    }

    /// Queue sources for best-effort background decode
    pub fn schedule_background_prefetch<S: AsRef<str>>(&mut self, device: &dyn AudioDevice, source_ids: &[S]) {
        if self.destroyed {
            return;
        }
        let mut queued: HashSet<String> = self.prefetch_queue.iter().cloned().collect();
        for source_id in source_ids {
            let source_id = source_id.as_ref();
            if source_id.is_empty() || queued.contains(source_id) {
                continue;
            }
            if self.is_loaded(device, source_id) || self.is_loading(source_id) {
                continue;
            }
            queued.insert(source_id.to_string());
            self.prefetch_queue.push_back(source_id.to_string());
        }
        if !self.prefetch_queue.is_empty() && self.prefetch_elapsed_ms.is_none() {
            // First drain happens on the next tick
            self.prefetch_elapsed_ms = Some(self.config.prefetch_tick_ms);
        }
    }

    /// Sources waiting in the prefetch queue
    pub fn prefetch_queue_len(&self) -> usize {
        self.prefetch_queue.len()
    }

    /// Whether the periodic prefetch tick is running
    pub fn prefetch_active(&self) -> bool {
        self.prefetch_elapsed_ms.is_some()
    }

    /// Advance the periodic prefetch tick
    pub fn tick_prefetch(&mut self, device: &mut dyn AudioDevice, delta_ms: f32) {
        let Some(elapsed) = self.prefetch_elapsed_ms else {
            return;
        };
        let elapsed = elapsed + delta_ms.max(0.0);
        if elapsed < self.config.prefetch_tick_ms {
            self.prefetch_elapsed_ms = Some(elapsed);
            return;
        }
        self.prefetch_elapsed_ms = Some(0.0);
        self.drain_prefetch(device);
    }

    fn drain_prefetch(&mut self, device: &mut dyn AudioDevice) {
        self.prefetch_in_flight
            .retain(|future| future.clone().now_or_never().is_none());

        let cap = self.config.prefetch_max_concurrent.max(1);
        while !self.destroyed && self.prefetch_in_flight.len() < cap {
            let Some(source_id) = self.prefetch_queue.pop_front() else {
                break;
            };
            if self.is_loaded(device, &source_id) {
                continue;
            }
            let future = self.ensure_loaded(device, &source_id);
            if future.clone().now_or_never().is_none() {
                self.prefetch_in_flight.push(future);
            }
        }

        if self.prefetch_queue.is_empty() && self.prefetch_in_flight.is_empty() {
            self.prefetch_elapsed_ms = None;
        }
    }

    /// Drop queued and in-flight background prefetch work
    pub fn clear_prefetch(&mut self) {
        self.prefetch_queue.clear();
        self.prefetch_in_flight.clear();
        self.prefetch_elapsed_ms = None;
    }

    /// Stop prefetching and settle every outstanding load with [`LoadError::Destroyed`]
    pub fn destroy(&mut self) {
        self.destroyed = true;
        self.prefetch_queue.clear();
        self.prefetch_in_flight.clear();
        self.prefetch_elapsed_ms = None;

        let pending: Vec<CacheKey> = self
            .states
            .iter()
            .filter(|(_, state)| matches!(state, LoadState::Loading { .. }))
            .map(|(key, _)| key.clone())
            .collect();
        for key in pending {
            if let Some(LoadState::Loading { sender, .. }) = self.states.remove(&key) {
                let _ = sender.send(Err(LoadError::Destroyed));
            }
        }
    }

    /// Whether [`AssetCache::destroy`] has run
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}
