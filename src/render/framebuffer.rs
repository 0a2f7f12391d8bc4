use std::ops::Range;

use parking_lot::Mutex;

use crate::foundation::core::{FrameToken, HsiPixel};
use crate::foundation::error::{StrandError, StrandResult};

/// Fixed-capacity pixel buffer with generational frame tokens.
///
/// At most one generation is open at a time. Workers write slices of the
/// open generation under its token; `end_frame` publishes all of those
/// writes atomically. Readers always observe the most recently published
/// generation in full, never a half-written frame.
///
/// Internally this is a front/back buffer pair behind one mutex. Opening a
/// frame copies front into back, so any region no render job touches keeps
/// its previous value across frames. Every operation holds the lock only for
/// the duration of one copy.
#[derive(Debug)]
pub struct Framebuffer {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    /// Most recently published generation; what readers see.
    front: Vec<HsiPixel>,
    /// Scratch for the open generation, valid only while `open` is set.
    back: Vec<HsiPixel>,
    /// Number of published generations.
    generation: u64,
    /// Generation number of the open frame, if any.
    open: Option<u64>,
}

impl Framebuffer {
    pub fn new(capacity: usize) -> StrandResult<Self> {
        if capacity == 0 {
            return Err(StrandError::invalid_arg("framebuffer capacity must be >= 1"));
        }
        Ok(Self {
            capacity,
            inner: Mutex::new(Inner {
                front: vec![HsiPixel::off(); capacity],
                back: vec![HsiPixel::off(); capacity],
                generation: 0,
                open: None,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of published generations. Output workers poll this to learn
    /// when a new frame is available.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Open the next generation. Fails with [`StrandError::BusyFrame`] if a
    /// prior token has not been closed.
    pub fn start_frame(&self) -> StrandResult<FrameToken> {
        let mut inner = self.inner.lock();
        if inner.open.is_some() {
            return Err(StrandError::BusyFrame);
        }
        let generation = inner.generation + 1;
        let Inner { front, back, .. } = &mut *inner;
        back.copy_from_slice(front);
        inner.open = Some(generation);
        Ok(FrameToken::new(generation))
    }

    /// Copy `pixels` into the open generation at `offset`.
    pub fn write(&self, token: FrameToken, offset: usize, pixels: &[HsiPixel]) -> StrandResult<()> {
        let mut inner = self.inner.lock();
        if inner.open != Some(token.generation()) {
            return Err(StrandError::InvalidToken {
                generation: token.generation(),
            });
        }
        let end = offset
            .checked_add(pixels.len())
            .ok_or(StrandError::OutOfRange {
                start: offset,
                end: usize::MAX,
                capacity: self.capacity,
            })?;
        if end > self.capacity {
            return Err(StrandError::OutOfRange {
                start: offset,
                end,
                capacity: self.capacity,
            });
        }
        inner.back[offset..end].copy_from_slice(pixels);
        Ok(())
    }

    /// Close the open generation, making its writes visible to readers.
    pub fn end_frame(&self, token: FrameToken) -> StrandResult<()> {
        let mut inner = self.inner.lock();
        if inner.open != Some(token.generation()) {
            return Err(StrandError::InvalidToken {
                generation: token.generation(),
            });
        }
        let Inner { front, back, .. } = &mut *inner;
        std::mem::swap(front, back);
        inner.generation = token.generation();
        inner.open = None;
        Ok(())
    }

    /// Snapshot a range of the most recently published generation.
    pub fn read(&self, range: Range<usize>) -> StrandResult<Vec<HsiPixel>> {
        if range.end > self.capacity || range.start > range.end {
            return Err(StrandError::OutOfRange {
                start: range.start,
                end: range.end,
                capacity: self.capacity,
            });
        }
        let inner = self.inner.lock();
        Ok(inner.front[range].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(i: f64) -> HsiPixel {
        HsiPixel::new(0.0, 1.0, i)
    }

    #[test]
    fn writes_are_invisible_until_end_frame() {
        let fb = Framebuffer::new(4).unwrap();
        let token = fb.start_frame().unwrap();
        fb.write(token, 0, &[px(1.0); 4]).unwrap();

        assert_eq!(fb.read(0..4).unwrap(), vec![HsiPixel::off(); 4]);
        assert_eq!(fb.generation(), 0);

        fb.end_frame(token).unwrap();
        assert_eq!(fb.read(0..4).unwrap(), vec![px(1.0); 4]);
        assert_eq!(fb.generation(), 1);
    }

    #[test]
    fn unwritten_regions_persist_across_generations() {
        let fb = Framebuffer::new(4).unwrap();
        let t1 = fb.start_frame().unwrap();
        fb.write(t1, 0, &[px(1.0); 4]).unwrap();
        fb.end_frame(t1).unwrap();

        let t2 = fb.start_frame().unwrap();
        fb.write(t2, 0, &[px(0.5); 2]).unwrap();
        fb.end_frame(t2).unwrap();

        assert_eq!(fb.read(0..4).unwrap(), vec![px(0.5), px(0.5), px(1.0), px(1.0)]);
    }

    #[test]
    fn second_start_frame_is_busy() {
        let fb = Framebuffer::new(1).unwrap();
        let _t = fb.start_frame().unwrap();
        assert!(matches!(fb.start_frame(), Err(StrandError::BusyFrame)));
    }

    #[test]
    fn stale_token_is_rejected() {
        let fb = Framebuffer::new(2).unwrap();
        let t1 = fb.start_frame().unwrap();
        fb.end_frame(t1).unwrap();

        assert!(matches!(
            fb.write(t1, 0, &[px(1.0)]),
            Err(StrandError::InvalidToken { .. })
        ));
        assert!(matches!(
            fb.end_frame(t1),
            Err(StrandError::InvalidToken { .. })
        ));

        // A fresh token works after the stale one bounced.
        let t2 = fb.start_frame().unwrap();
        fb.write(t2, 0, &[px(1.0)]).unwrap();
        fb.end_frame(t2).unwrap();
    }

    #[test]
    fn out_of_range_write_and_read_are_rejected() {
        let fb = Framebuffer::new(4).unwrap();
        let token = fb.start_frame().unwrap();
        assert!(matches!(
            fb.write(token, 2, &[px(1.0); 3]),
            Err(StrandError::OutOfRange { .. })
        ));
        assert!(matches!(fb.read(0..5), Err(StrandError::OutOfRange { .. })));
        // The failed write must not poison the open generation.
        fb.write(token, 2, &[px(1.0); 2]).unwrap();
        fb.end_frame(token).unwrap();
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            Framebuffer::new(0),
            Err(StrandError::InvalidArg(_))
        ));
    }
}
