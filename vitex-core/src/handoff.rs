//! # Frame Handoff - Producer to Render Thread Mailbox
//!
//! Single-slot latest-wins mailbox between the frame producer (decoder,
//! capture callback) and the render thread.
//!
//! ```text
//! ┌──────────┐    ┌─────────────┐    ┌──────────┐
//! │ Producer │───►│ FrameHandoff │───►│ Renderer │
//! │ Thread   │    │  (1 slot)   │    │ Thread   │
//! └──────────┘    └─────────────┘    └──────────┘
//! ```
//!
//! Publishing overwrites whatever the renderer has not picked up yet; there
//! is no queue and no backpressure. A slow renderer sees only the newest
//! frame and never a growing backlog.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use crate::frame::{FrameDescriptor, OwnedFrame};

/// Mailbox counters, cumulative since construction.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HandoffStats {
    /// Frames published by the producer
    pub published: u64,
    /// Frames overwritten before the renderer consumed them
    pub coalesced: u64,
    /// Frames the renderer actually consumed
    pub consumed: u64,
}

/// Single-slot frame mailbox. All methods are safe from any thread.
#[derive(Debug, Default)]
pub struct FrameHandoff {
    slot: Mutex<Option<OwnedFrame>>,
    published: AtomicU64,
    coalesced: AtomicU64,
    consumed: AtomicU64,
}

impl FrameHandoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep-copy the frame into the slot, replacing any unconsumed one.
    ///
    /// The copy happens before the slot lock is taken, so the producer only
    /// contends with the renderer for the duration of one pointer swap.
    pub fn publish(&self, frame: &FrameDescriptor<'_>) {
        let owned = OwnedFrame::copy_from(frame);
        let replaced = self.slot.lock().replace(owned);

        self.published.fetch_add(1, Ordering::Relaxed);
        if replaced.is_some() {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            trace!("frame coalesced before consumption");
        }
    }

    /// Take the newest frame, leaving the slot empty.
    pub fn consume_latest(&self) -> Option<OwnedFrame> {
        let frame = self.slot.lock().take();
        if frame.is_some() {
            self.consumed.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// True if a frame is waiting.
    pub fn has_frame(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Drop any unconsumed frame.
    pub fn clear(&self) {
        self.slot.lock().take();
    }

    pub fn stats(&self) -> HandoffStats {
        HandoffStats {
            published: self.published.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn rgba_frame(data: &[u8], width: u32, height: u32) -> FrameDescriptor<'_> {
        FrameDescriptor::packed(PixelFormat::Rgba32, width, height, data, width as usize * 4)
    }

    #[test]
    fn test_latest_wins() {
        let handoff = FrameHandoff::new();
        let first = vec![1u8; 4 * 4 * 4];
        let second = vec![2u8; 4 * 4 * 4];
        handoff.publish(&rgba_frame(&first, 4, 4));
        handoff.publish(&rgba_frame(&second, 4, 4));

        let frame = handoff.consume_latest().unwrap();
        assert_eq!(frame.as_descriptor().plane(0).unwrap().data[0], 2);
        assert!(handoff.consume_latest().is_none());

        let stats = handoff.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.coalesced, 1);
        assert_eq!(stats.consumed, 1);
    }

    #[test]
    fn test_consume_empties_the_slot() {
        let handoff = FrameHandoff::new();
        let data = vec![0u8; 2 * 2 * 4];
        handoff.publish(&rgba_frame(&data, 2, 2));
        assert!(handoff.has_frame());
        assert!(handoff.consume_latest().is_some());
        assert!(!handoff.has_frame());
        assert!(handoff.consume_latest().is_none());
    }

    #[test]
    fn test_snapshot_outlives_producer_buffer() {
        let handoff = FrameHandoff::new();
        {
            let data = vec![9u8; 2 * 2 * 4];
            handoff.publish(&rgba_frame(&data, 2, 2));
            // producer buffer dropped here
        }
        let frame = handoff.consume_latest().unwrap();
        assert_eq!(frame.as_descriptor().plane(0).unwrap().data[0], 9);
    }

    #[test]
    fn test_clear_discards_pending_frame() {
        let handoff = FrameHandoff::new();
        let data = vec![0u8; 2 * 2 * 4];
        handoff.publish(&rgba_frame(&data, 2, 2));
        handoff.clear();
        assert!(handoff.consume_latest().is_none());
    }

    #[test]
    fn test_publish_from_multiple_threads() {
        use std::sync::Arc;

        let handoff = Arc::new(FrameHandoff::new());
        let mut threads = Vec::new();
        for value in 0..4u8 {
            let handoff = Arc::clone(&handoff);
            threads.push(std::thread::spawn(move || {
                let data = vec![value; 2 * 2 * 4];
                for _ in 0..100 {
                    handoff.publish(&rgba_frame(&data, 2, 2));
                }
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(handoff.stats().published, 400);
        assert!(handoff.consume_latest().is_some());
    }
}
