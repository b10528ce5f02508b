//! FrameBuffer - Latest-Frame Slot for Live View
//!
//! ## Responsibilities
//!
//! - Hold exactly one current encoded frame
//! - Let the camera producer overwrite it without ever blocking
//! - Wake every waiting viewer on each new frame (broadcast, not dequeue)
//! - Release all waiters with a terminal signal on shutdown
//!
//! Streaming is lossy on purpose: a slow viewer skips intermediate frames
//! and always gets the newest one. Frames are reference-counted, so a
//! reader never sees a half-written buffer.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Producer-side handle given to cameras
pub type FrameSink = Arc<FrameBuffer>;

/// Monotonic frame counter. `Revision::NONE` precedes every real frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Revision(u64);

impl Revision {
    pub const NONE: Revision = Revision(0);

    pub fn value(self) -> u64 {
        self.0
    }
}

/// One encoded frame and its revision
#[derive(Debug, Clone)]
pub struct Frame {
    revision: Revision,
    data: Arc<[u8]>,
}

impl Frame {
    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The buffer was closed; no more frames will arrive
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame stream closed")]
pub struct StreamClosed;

#[derive(Debug, Default)]
struct Slot {
    current: Option<Frame>,
    next_revision: u64,
    closed: bool,
}

/// Single-slot, multi-reader frame holder
pub struct FrameBuffer {
    tx: watch::Sender<Slot>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Slot {
            current: None,
            next_revision: 1,
            closed: false,
        });
        Self { tx }
    }

    /// Replace the current frame and wake all waiters
    ///
    /// Returns the new revision, or `None` once the buffer is closed.
    pub fn set_current(&self, data: impl Into<Arc<[u8]>>) -> Option<Revision> {
        let data = data.into();
        let mut assigned = None;
        self.tx.send_if_modified(|slot| {
            if slot.closed {
                return false;
            }
            let revision = Revision(slot.next_revision);
            slot.next_revision += 1;
            slot.current = Some(Frame { revision, data });
            assigned = Some(revision);
            true
        });
        assigned
    }

    /// Wait for a frame newer than `after`
    ///
    /// Returns immediately when one is already present. Every concurrent
    /// caller is woken by the same `set_current`.
    pub async fn next_frame(&self, after: Revision) -> Result<Frame, StreamClosed> {
        let mut rx = self.tx.subscribe();
        loop {
            {
                let slot = rx.borrow_and_update();
                if slot.closed {
                    return Err(StreamClosed);
                }
                if let Some(frame) = slot.current.as_ref().filter(|f| f.revision > after) {
                    return Ok(frame.clone());
                }
            }
            if rx.changed().await.is_err() {
                return Err(StreamClosed);
            }
        }
    }

    /// Current frame, if any
    pub fn latest(&self) -> Option<Frame> {
        self.tx.borrow().current.clone()
    }

    /// Revision of the current frame (`NONE` before the first)
    pub fn revision(&self) -> Revision {
        self.tx
            .borrow()
            .current
            .as_ref()
            .map(|f| f.revision)
            .unwrap_or(Revision::NONE)
    }

    /// Number of viewers currently blocked in `next_frame`
    pub fn waiting(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Stop accepting frames and release every waiter
    pub fn close(&self) {
        self.tx.send_modify(|slot| {
            slot.closed = true;
            slot.current = None;
        });
        tracing::debug!("Frame buffer closed");
    }

    pub fn is_closed(&self) -> bool {
        self.tx.borrow().closed
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_existing_frame_returned_immediately() {
        let buffer = FrameBuffer::new();
        let rev = buffer.set_current(vec![1, 2, 3]).unwrap();

        let frame = buffer.next_frame(Revision::NONE).await.unwrap();
        assert_eq!(frame.revision(), rev);
        assert_eq!(frame.data(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_revisions_increase() {
        let buffer = FrameBuffer::new();
        let a = buffer.set_current(vec![1]).unwrap();
        let b = buffer.set_current(vec![2]).unwrap();
        assert!(b > a);
        assert!(a > Revision::NONE);
        assert_eq!(buffer.revision(), b);
    }

    #[tokio::test]
    async fn test_single_set_wakes_all_waiters() {
        let buffer = Arc::new(FrameBuffer::new());
        let seen = buffer.set_current(vec![0]).unwrap();

        let mut waiters = Vec::new();
        for _ in 0..8 {
            let buffer = buffer.clone();
            waiters.push(tokio::spawn(async move { buffer.next_frame(seen).await }));
        }

        // Let every waiter park on the channel
        while buffer.waiting() < 8 {
            tokio::task::yield_now().await;
        }
        let published = buffer.set_current(vec![9, 9, 9]).unwrap();

        for waiter in waiters {
            let frame = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert_eq!(frame.revision(), published);
            assert!(frame.revision() > seen);
            assert_eq!(frame.data(), &[9, 9, 9]);
        }
    }

    #[tokio::test]
    async fn test_slow_reader_skips_to_latest() {
        let buffer = FrameBuffer::new();
        let first = buffer.set_current(vec![1]).unwrap();
        buffer.set_current(vec![2]);
        let last = buffer.set_current(vec![3]).unwrap();

        let frame = buffer.next_frame(first).await.unwrap();
        assert_eq!(frame.revision(), last);
        assert_eq!(frame.data(), &[3]);
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let buffer = Arc::new(FrameBuffer::new());
        let waiter = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.next_frame(Revision::NONE).await })
        };

        while buffer.waiting() < 1 {
            tokio::task::yield_now().await;
        }
        buffer.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap_err(), StreamClosed);
        assert!(buffer.set_current(vec![1]).is_none());
        assert!(buffer.is_closed());
    }
}
