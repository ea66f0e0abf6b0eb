//! Bounded frame history with single-writer, multi-reader publication

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;

use crate::capture::Frame;
use crate::error::PublishError;

/// One occupied ring slot. `index` is the frame's position in publication order.
struct Slot {
    index: u64,
    frame: Arc<Frame>,
}

struct Shared {
    /// Ring of owned frames; a slot is replaced wholesale, never mutated in place
    slots: Box<[ArcSwapOption<Slot>]>,

    /// Number of frames ever appended
    published: AtomicU64,

    /// Newest frame, stored before `published` is bumped
    latest: ArcSwapOption<Frame>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_appended: AtomicUsize,
    frames_evicted: AtomicUsize,
    frames_rejected: AtomicUsize,
}

/// Counters describing buffer traffic so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryStats {
    pub appended: usize,
    pub evicted: usize,
    pub rejected: usize,
}

/// Fixed-capacity frame history.
///
/// Creating one yields the only [`FrameWriter`] and a cloneable
/// [`FrameReader`]. Readers never block the writer and vice versa.
pub struct HistoryBuffer;

impl HistoryBuffer {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> (FrameWriter, FrameReader) {
        assert!(capacity > 0, "history capacity must be non-zero");

        let slots = (0..capacity).map(|_| ArcSwapOption::empty()).collect();
        let shared = Arc::new(Shared {
            slots,
            published: AtomicU64::new(0),
            latest: ArcSwapOption::empty(),
            stats: CachePadded::new(Stats::default()),
        });

        let writer = FrameWriter {
            shared: Arc::clone(&shared),
            next_index: 0,
            last_timestamp: None,
        };
        (writer, FrameReader { shared })
    }
}

/// Exclusive append handle, owned by the capture loop
pub struct FrameWriter {
    shared: Arc<Shared>,
    next_index: u64,
    last_timestamp: Option<u64>,
}

impl FrameWriter {
    /// Publish a fully built frame, evicting the oldest one at capacity.
    ///
    /// Frames older than the last published one are refused.
    pub fn append(&mut self, frame: Frame) -> Result<Arc<Frame>, PublishError> {
        if let Some(previous) = self.last_timestamp {
            if frame.timestamp < previous {
                self.shared.stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(PublishError::OutOfOrder {
                    previous,
                    current: frame.timestamp,
                });
            }
        }

        let index = self.next_index;
        let timestamp = frame.timestamp;
        let frame = Arc::new(frame);
        let shared = &self.shared;

        let slot = &shared.slots[(index % shared.slots.len() as u64) as usize];
        let evicted = slot.swap(Some(Arc::new(Slot {
            index,
            frame: Arc::clone(&frame),
        })));
        shared.latest.store(Some(Arc::clone(&frame)));
        shared.published.store(index + 1, Ordering::Release);

        shared.stats.frames_appended.fetch_add(1, Ordering::Relaxed);
        if evicted.is_some() {
            shared.stats.frames_evicted.fetch_add(1, Ordering::Relaxed);
        }

        self.next_index = index + 1;
        self.last_timestamp = Some(timestamp);
        Ok(frame)
    }

    /// Whether the next append evicts the oldest frame.
    pub fn is_full(&self) -> bool {
        self.next_index >= self.shared.slots.len() as u64
    }

    pub fn reader(&self) -> FrameReader {
        FrameReader {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Shared read handle. Frames handed out stay valid after eviction.
#[derive(Clone)]
pub struct FrameReader {
    shared: Arc<Shared>,
}

impl FrameReader {
    /// Most recently published frame.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.shared.latest.load_full()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.published.load(Ordering::Acquire) == 0
    }

    /// Number of retained frames.
    pub fn len(&self) -> usize {
        let published = self.shared.published.load(Ordering::Acquire);
        published.min(self.capacity() as u64) as usize
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    /// Frame `offset` steps back from the newest (0 = newest).
    ///
    /// Returns `None` past the retained range, including when the entry was
    /// evicted while this call ran.
    pub fn get(&self, offset: usize) -> Option<Arc<Frame>> {
        let published = self.shared.published.load(Ordering::Acquire);
        if offset as u64 >= published.min(self.capacity() as u64) {
            return None;
        }
        self.load_index(published - 1 - offset as u64)
    }

    /// All retained frames, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<Frame>> {
        let published = self.shared.published.load(Ordering::Acquire);
        let first = published.saturating_sub(self.capacity() as u64);
        (first..published).filter_map(|index| self.load_index(index)).collect()
    }

    pub fn stats(&self) -> HistoryStats {
        let stats = &self.shared.stats;
        HistoryStats {
            appended: stats.frames_appended.load(Ordering::Relaxed),
            evicted: stats.frames_evicted.load(Ordering::Relaxed),
            rejected: stats.frames_rejected.load(Ordering::Relaxed),
        }
    }

    fn load_index(&self, index: u64) -> Option<Arc<Frame>> {
        let slots = &self.shared.slots;
        let slot = slots[(index % slots.len() as u64) as usize].load_full()?;
        (slot.index == index).then(|| Arc::clone(&slot.frame))
    }
}
