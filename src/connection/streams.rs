//! NetStream id reservation and registration
//!
//! Stream ids are 1-based on the wire and 0-based in here. Reservation
//! is a growable bitset (NetStream counts rarely pass a few dozen);
//! registered streams and their remembered buffer durations live in
//! maps keyed by the 0-based index.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::protocol::constants::{CHANNELS_PER_STREAM, STREAM_CHANNEL_BASE};
use crate::scope::ClientStream;

/// Growable bitset over stream-id indices
#[derive(Debug, Default)]
struct IdBitset {
    words: Vec<u64>,
}

impl IdBitset {
    fn test(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .map(|w| w & (1 << (index % 64)) != 0)
            .unwrap_or(false)
    }

    fn set(&mut self, index: usize) {
        let word = index / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (index % 64);
    }

    fn clear(&mut self, index: usize) {
        if let Some(w) = self.words.get_mut(index / 64) {
            *w &= !(1 << (index % 64));
        }
    }

    fn first_clear(&self) -> usize {
        for (i, w) in self.words.iter().enumerate() {
            if *w != u64::MAX {
                return i * 64 + w.trailing_ones() as usize;
            }
        }
        self.words.len() * 64
    }

    fn reset(&mut self) {
        self.words.clear();
    }
}

/// Per-connection registry of NetStream ids, streams and buffer hints
#[derive(Default)]
pub struct StreamRegistry {
    reserved: Mutex<IdBitset>,
    streams: Mutex<HashMap<u32, Arc<dyn ClientStream>>>,
    buffers: Mutex<HashMap<u32, Duration>>,
    used_streams: AtomicU32,
}

impl StreamRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the lowest free stream id and return it (1-based)
    pub fn reserve_stream_id(&self) -> u32 {
        let mut reserved = self.reserved.lock();
        let index = reserved.first_clear();
        reserved.set(index);
        index as u32 + 1
    }

    /// Reserve `id` if it is free, otherwise the lowest free id
    pub fn reserve_requested_stream_id(&self, id: u32) -> u32 {
        if id >= 1 {
            let mut reserved = self.reserved.lock();
            if !reserved.test(id as usize - 1) {
                reserved.set(id as usize - 1);
                return id;
            }
        }
        self.reserve_stream_id()
    }

    /// A stream id is valid when it is reserved and nothing is
    /// registered under it yet
    pub fn is_valid_stream_id(&self, id: u32) -> bool {
        if id < 1 {
            return false;
        }
        if !self.reserved.lock().test(id as usize - 1) {
            return false;
        }
        !self.streams.lock().contains_key(&(id - 1))
    }

    /// Register a created stream under its id and count it as used
    pub fn register_stream(&self, stream: Arc<dyn ClientStream>) {
        let index = stream.stream_id().saturating_sub(1);
        self.streams.lock().insert(index, stream);
        self.used_streams.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove the stream registered under `id`, along with its buffer
    /// hint. The reservation stays; use [`Self::unreserve_stream_id`] to
    /// free the id as well.
    pub fn unregister_stream(&self, id: u32) -> Option<Arc<dyn ClientStream>> {
        if id < 1 {
            return None;
        }
        let removed = self.streams.lock().remove(&(id - 1));
        if removed.is_some() {
            self.buffers.lock().remove(&(id - 1));
            self.used_streams.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove the stream under `id` and release the id for reuse
    pub fn unreserve_stream_id(&self, id: u32) {
        if id < 1 {
            return;
        }
        self.unregister_stream(id);
        self.reserved.lock().clear(id as usize - 1);
    }

    /// Look up a registered stream by its 1-based id
    pub fn stream_by_id(&self, id: u32) -> Option<Arc<dyn ClientStream>> {
        if id < 1 {
            return None;
        }
        self.streams.lock().get(&(id - 1)).cloned()
    }

    /// Map a channel id to the stream id whose triple contains it.
    /// Channels below the stream range carry no stream.
    pub fn stream_id_for_channel(channel_id: u32) -> Option<u32> {
        if channel_id < STREAM_CHANNEL_BASE {
            return None;
        }
        Some((channel_id - STREAM_CHANNEL_BASE) / CHANNELS_PER_STREAM + 1)
    }

    /// Look up the stream whose channel triple contains `channel_id`
    pub fn stream_by_channel_id(&self, channel_id: u32) -> Option<Arc<dyn ClientStream>> {
        self.stream_by_id(Self::stream_id_for_channel(channel_id)?)
    }

    /// Remember a client buffer duration for a stream created later
    pub fn remember_buffer_duration(&self, id: u32, duration: Duration) {
        if id >= 1 {
            self.buffers.lock().insert(id - 1, duration);
        }
    }

    /// The remembered buffer duration for `id`, if any
    pub fn buffer_duration(&self, id: u32) -> Option<Duration> {
        if id < 1 {
            return None;
        }
        self.buffers.lock().get(&(id - 1)).copied()
    }

    /// Number of currently registered streams
    pub fn used_stream_count(&self) -> u32 {
        self.used_streams.load(Ordering::Relaxed)
    }

    /// Snapshot of all registered streams
    pub fn streams(&self) -> Vec<Arc<dyn ClientStream>> {
        self.streams.lock().values().cloned().collect()
    }

    /// Drop all registrations, reservations and buffer hints
    pub fn clear(&self) {
        self.streams.lock().clear();
        self.buffers.lock().clear();
        self.reserved.lock().reset();
        self.used_streams.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("registered", &self.streams.lock().len())
            .field("used_streams", &self.used_stream_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeStream {
        id: u32,
        name: String,
    }

    impl ClientStream for FakeStream {
        fn stream_id(&self) -> u32 {
            self.id
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn close(&self) {}
    }

    fn fake(id: u32) -> Arc<dyn ClientStream> {
        Arc::new(FakeStream {
            id,
            name: format!("stream-{}", id),
        })
    }

    #[test]
    fn test_sequential_reservation() {
        let registry = StreamRegistry::new();
        for expected in 1..=10 {
            assert_eq!(registry.reserve_stream_id(), expected);
        }
    }

    #[test]
    fn test_requested_reservation_falls_back() {
        // reserve(3) -> 3, reserve() -> 1, reserve() -> 2,
        // reserve(3) -> 4 (taken, lowest free), reserve() -> 5
        let registry = StreamRegistry::new();
        assert_eq!(registry.reserve_requested_stream_id(3), 3);
        assert_eq!(registry.reserve_stream_id(), 1);
        assert_eq!(registry.reserve_stream_id(), 2);
        assert_eq!(registry.reserve_requested_stream_id(3), 4);
        assert_eq!(registry.reserve_stream_id(), 5);
    }

    #[test]
    fn test_validity_requires_reservation() {
        let registry = StreamRegistry::new();
        assert!(!registry.is_valid_stream_id(0));
        assert!(!registry.is_valid_stream_id(1));

        let id = registry.reserve_stream_id();
        assert!(registry.is_valid_stream_id(id));

        registry.register_stream(fake(id));
        assert!(!registry.is_valid_stream_id(id));
    }

    #[test]
    fn test_unregister_keeps_reservation() {
        let registry = StreamRegistry::new();
        let id = registry.reserve_stream_id();
        registry.register_stream(fake(id));
        registry.remember_buffer_duration(id, Duration::from_millis(500));
        assert_eq!(registry.used_stream_count(), 1);

        let removed = registry.unregister_stream(id);
        assert!(removed.is_some());
        assert_eq!(registry.used_stream_count(), 0);
        assert!(registry.buffer_duration(id).is_none());

        // Still reserved: the next fresh reservation skips it.
        assert_eq!(registry.reserve_stream_id(), 2);
        assert!(registry.is_valid_stream_id(id));
    }

    #[test]
    fn test_unreserve_frees_the_id() {
        let registry = StreamRegistry::new();
        let id = registry.reserve_stream_id();
        registry.register_stream(fake(id));

        registry.unreserve_stream_id(id);
        assert!(registry.stream_by_id(id).is_none());
        assert_eq!(registry.reserve_stream_id(), id);
    }

    #[test]
    fn test_channel_mapping() {
        // Stream 2 occupies channels 9, 10, 11.
        for ch in [9, 10, 11] {
            assert_eq!(StreamRegistry::stream_id_for_channel(ch), Some(2));
        }
        assert_eq!(StreamRegistry::stream_id_for_channel(14), Some(3));

        for ch in 0..4 {
            assert_eq!(StreamRegistry::stream_id_for_channel(ch), None);
        }

        for stream_id in 1..=8u32 {
            let base = STREAM_CHANNEL_BASE + (stream_id - 1) * CHANNELS_PER_STREAM;
            for offset in 0..3 {
                assert_eq!(
                    StreamRegistry::stream_id_for_channel(base + offset),
                    Some(stream_id)
                );
            }
        }
    }

    #[test]
    fn test_stream_by_channel() {
        let registry = StreamRegistry::new();
        let id = registry.reserve_requested_stream_id(2);
        registry.register_stream(fake(id));

        let found = registry.stream_by_channel_id(9).expect("stream 2");
        assert_eq!(found.stream_id(), 2);
        assert!(registry.stream_by_channel_id(2).is_none());
    }

    #[test]
    fn test_clear_resets_everything() {
        let registry = StreamRegistry::new();
        let id = registry.reserve_stream_id();
        registry.register_stream(fake(id));
        registry.remember_buffer_duration(id, Duration::from_secs(1));

        registry.clear();
        assert_eq!(registry.used_stream_count(), 0);
        assert!(registry.stream_by_id(id).is_none());
        assert_eq!(registry.reserve_stream_id(), 1);
    }

    #[test]
    fn test_bitset_growth_past_word_boundary() {
        let registry = StreamRegistry::new();
        for expected in 1..=130 {
            assert_eq!(registry.reserve_stream_id(), expected);
        }
        assert_eq!(registry.reserve_requested_stream_id(200), 200);
        assert_eq!(registry.reserve_stream_id(), 131);
    }
}
