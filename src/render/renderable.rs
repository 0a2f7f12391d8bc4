use std::sync::Arc;

use parking_lot::Mutex;

use crate::foundation::core::HsiPixel;
use crate::foundation::error::StrandResult;

/// An effect that produces one vector of pixels per frame.
///
/// Lifecycle, per frame: `prepare` on the frame thread, then exactly one
/// `render` on a worker thread, then `finish` on the frame thread, each
/// with the renderable's lock held. `render` must leave `pixels()` fully
/// populated at the current size; a `RenderError` skips this entry for the
/// frame without aborting it.
///
/// `resize` is called between frames, from the plan mutation path, when
/// conflict resolution shrinks the target this renderable feeds.
pub trait Renderable: Send {
    fn prepare(&mut self) {}

    fn render(&mut self) -> StrandResult<()>;

    fn finish(&mut self) {}

    fn resize(&mut self, len: usize);

    fn pixels(&self) -> &[HsiPixel];

    fn len(&self) -> usize {
        self.pixels().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared handle to a renderable. The mutex is the renderable's lock: the
/// pipeline holds it across every lifecycle call, and the plan holds it
/// while resizing during conflict resolution.
pub type SharedRenderable = Arc<Mutex<dyn Renderable>>;

/// Wrap a renderable for handing to the pipeline.
pub fn shared(renderable: impl Renderable + 'static) -> SharedRenderable {
    Arc::new(Mutex::new(renderable))
}

/// Fills its whole buffer with a single color.
#[derive(Debug, Clone)]
pub struct FillRenderable {
    color: HsiPixel,
    buf: Vec<HsiPixel>,
}

impl FillRenderable {
    pub fn new(len: usize, color: HsiPixel) -> Self {
        Self {
            color,
            buf: vec![HsiPixel::off(); len],
        }
    }

    pub fn color(&self) -> HsiPixel {
        self.color
    }
}

impl Renderable for FillRenderable {
    fn render(&mut self) -> StrandResult<()> {
        self.buf.fill(self.color);
        Ok(())
    }

    fn resize(&mut self, len: usize) {
        self.buf.resize(len, HsiPixel::off());
    }

    fn pixels(&self) -> &[HsiPixel] {
        &self.buf
    }
}

/// A hue gradient that rotates one step per frame.
///
/// The phase advances in `finish`, so a frame's output is stable no matter
/// how often `render` would be retried, and the sweep moves exactly once per
/// published frame.
#[derive(Debug, Clone)]
pub struct SweepRenderable {
    saturation: f64,
    intensity: f64,
    degrees_per_frame: f64,
    phase: f64,
    buf: Vec<HsiPixel>,
}

impl SweepRenderable {
    pub fn new(len: usize, degrees_per_frame: f64) -> Self {
        Self {
            saturation: 1.0,
            intensity: 1.0,
            degrees_per_frame,
            phase: 0.0,
            buf: vec![HsiPixel::off(); len],
        }
    }
}

impl Renderable for SweepRenderable {
    fn render(&mut self) -> StrandResult<()> {
        let n = self.buf.len().max(1) as f64;
        for (idx, px) in self.buf.iter_mut().enumerate() {
            let hue = self.phase + (idx as f64) * 360.0 / n;
            *px = HsiPixel::clamped(hue, self.saturation, self.intensity);
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.phase = (self.phase + self.degrees_per_frame).rem_euclid(360.0);
    }

    fn resize(&mut self, len: usize) {
        self.buf.resize(len, HsiPixel::off());
    }

    fn pixels(&self) -> &[HsiPixel] {
        &self.buf
    }
}

/// Test helper: renders a fixed pixel sequence, or fails on demand.
#[cfg(test)]
pub(crate) struct ScriptedRenderable {
    pub(crate) frames_rendered: usize,
    pub(crate) fail: bool,
    pub(crate) buf: Vec<HsiPixel>,
}

#[cfg(test)]
impl ScriptedRenderable {
    pub(crate) fn with_pixels(pixels: Vec<HsiPixel>) -> Self {
        Self {
            frames_rendered: 0,
            fail: false,
            buf: pixels,
        }
    }
}

#[cfg(test)]
impl Renderable for ScriptedRenderable {
    fn render(&mut self) -> StrandResult<()> {
        if self.fail {
            return Err(crate::foundation::error::StrandError::render(
                "scripted failure",
            ));
        }
        self.frames_rendered += 1;
        Ok(())
    }

    fn resize(&mut self, len: usize) {
        self.buf.resize(len, HsiPixel::off());
    }

    fn pixels(&self) -> &[HsiPixel] {
        &self.buf
    }
}
