use std::sync::Arc;
use std::time::Duration;

/// One decoded frame's pixels, RGBA8 row-major.
#[derive(Debug)]
pub struct PixelBuf {
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
    pub rgba: Vec<u8>,
}

impl PixelBuf {
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.rgba.len()
    }
}

/// One frame of an image; for animated content, one tick of animation.
/// Cloning shares the pixel payload.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pixels: Arc<PixelBuf>,
    pub duration: Duration,
}

/* ───────────────────────── frame ring ───────────────────────────── */

/// Bounded FIFO of decoded frames with wrap-around indices. One producer
/// (the decoder worker) stages and publishes; one consumer (the display
/// side) reads the front and advances. Both sides run under the owning
/// image's mutex, which is what makes `publish` happen-after the frame
/// write.
pub struct FrameRing {
    slots: Vec<Option<Frame>>,
    head: usize,
    size: usize,
    staged: bool,
}

impl FrameRing {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "frame ring needs at least one slot");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            size: 0,
            staged: false,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    /// Reserves the next write slot. Not visible to the consumer until
    /// [`publish`](Self::publish). Returns the frame back when full.
    pub fn stage(&mut self, frame: Frame) -> Result<(), Frame> {
        if self.is_full() || self.staged {
            return Err(frame);
        }
        let tail = (self.head + self.size) % self.capacity();
        self.slots[tail] = Some(frame);
        self.staged = true;
        Ok(())
    }

    /// Makes the staged frame visible at the tail. No-op if nothing staged.
    pub fn publish(&mut self) {
        if self.staged {
            self.staged = false;
            self.size += 1;
        }
    }

    /// The oldest published frame, if any.
    pub fn front(&self) -> Option<&Frame> {
        if self.size == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    /// Consumer drops the front frame.
    pub fn advance(&mut self) -> Option<Frame> {
        if self.size == 0 {
            return None;
        }
        let frame = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.size -= 1;
        frame
    }

    /// Moves the front frame to the back without dropping it. Used for
    /// looping playback when a whole animation fits in the ring.
    pub fn rotate(&mut self) {
        if self.size < 2 {
            return;
        }
        let front = self.slots[self.head].take();
        let tail = (self.head + self.size - 1) % self.capacity();
        self.head = (self.head + 1) % self.capacity();
        // tail was computed before head moved; after the move it is the
        // free slot directly behind the new window.
        let dest = (tail + 1) % self.capacity();
        self.slots[dest] = front;
    }

    /// Drops every frame and any staged write.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.size = 0;
        self.staged = false;
    }

    /// Applies `f` to every published frame in FIFO order, replacing each.
    pub fn map_in_place<F: FnMut(&Frame) -> Frame>(&mut self, mut f: F) {
        for i in 0..self.size {
            let idx = (self.head + i) % self.capacity();
            if let Some(frame) = &self.slots[idx] {
                let replacement = f(frame);
                self.slots[idx] = Some(replacement);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> Frame {
        Frame {
            pixels: Arc::new(PixelBuf {
                width: 1,
                height: 1,
                has_alpha: false,
                rgba: vec![tag, 0, 0, 255],
            }),
            duration: Duration::from_millis(tag as u64),
        }
    }

    fn tag(f: &Frame) -> u8 {
        f.pixels.rgba[0]
    }

    #[test]
    fn stage_then_publish_becomes_visible() {
        let mut ring = FrameRing::with_capacity(3);
        assert!(ring.is_empty());

        ring.stage(frame(1)).unwrap();
        // Staged but unpublished: invisible to the consumer.
        assert!(ring.front().is_none());
        assert_eq!(ring.len(), 0);

        ring.publish();
        assert_eq!(ring.len(), 1);
        assert_eq!(tag(ring.front().unwrap()), 1);
    }

    #[test]
    fn rejects_stage_when_full() {
        let mut ring = FrameRing::with_capacity(2);
        for i in 0..2 {
            ring.stage(frame(i)).unwrap();
            ring.publish();
        }
        assert!(ring.is_full());
        assert!(ring.stage(frame(9)).is_err());

        ring.advance();
        assert!(ring.stage(frame(9)).is_ok());
        ring.publish();
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn fifo_order_survives_wraparound() {
        let mut ring = FrameRing::with_capacity(3);
        for i in 0..3 {
            ring.stage(frame(i)).unwrap();
            ring.publish();
        }
        assert_eq!(tag(&ring.advance().unwrap()), 0);
        ring.stage(frame(3)).unwrap();
        ring.publish();

        let order: Vec<u8> = std::iter::from_fn(|| ring.advance()).map(|f| tag(&f)).collect();
        assert_eq!(order, [1, 2, 3]);
    }

    #[test]
    fn rotate_cycles_without_dropping() {
        let mut ring = FrameRing::with_capacity(4);
        for i in 0..3 {
            ring.stage(frame(i)).unwrap();
            ring.publish();
        }
        ring.rotate();
        assert_eq!(ring.len(), 3);
        assert_eq!(tag(ring.front().unwrap()), 1);
        ring.rotate();
        assert_eq!(tag(ring.front().unwrap()), 2);
        ring.rotate();
        assert_eq!(tag(ring.front().unwrap()), 0);
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let mut ring = FrameRing::with_capacity(2);
        for i in 0..10 {
            if ring.stage(frame(i)).is_ok() {
                ring.publish();
            }
            assert!(ring.len() <= ring.capacity());
        }
        assert_eq!(ring.len(), 2);
    }
}
