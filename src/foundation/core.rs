use crate::foundation::error::{StrandError, StrandResult};

/// A single pixel in HSI space: hue in `[0, 360)`, saturation and intensity
/// in `[0, 1]`.
///
/// This is the working representation throughout the pipeline; conversion to
/// an on-wire form is left to the output workers.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HsiPixel {
    pub h: f64,
    pub s: f64,
    pub i: f64,
}

impl HsiPixel {
    pub fn new(h: f64, s: f64, i: f64) -> Self {
        Self { h, s, i }
    }

    /// Construct with hue wrapped into `[0, 360)` and saturation/intensity
    /// clamped into `[0, 1]`.
    pub fn clamped(h: f64, s: f64, i: f64) -> Self {
        Self {
            h: h.rem_euclid(360.0),
            s: s.clamp(0.0, 1.0),
            i: i.clamp(0.0, 1.0),
        }
    }

    /// All-off pixel.
    pub fn off() -> Self {
        Self {
            h: 0.0,
            s: 0.0,
            i: 0.0,
        }
    }

    /// Return a copy with intensity scaled by `factor` (clamped to `[0, 1]`).
    pub fn scale_intensity(self, factor: f64) -> Self {
        Self {
            i: (self.i * factor).clamp(0.0, 1.0),
            ..self
        }
    }
}

impl Default for HsiPixel {
    fn default() -> Self {
        Self::off()
    }
}

/// Identifier of a persisted lighting group.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct GroupId(pub u32);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Token identifying one open frame generation of the framebuffer.
///
/// Issued by [`Framebuffer::start_frame`](crate::Framebuffer::start_frame)
/// and accepted by `write`/`end_frame` only while that generation is open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameToken {
    generation: u64,
}

impl FrameToken {
    pub(crate) fn new(generation: u64) -> Self {
        Self { generation }
    }

    pub fn generation(self) -> u64 {
        self.generation
    }
}

/// Validate a frame rate value coming from config or the pacer API.
pub(crate) fn validate_fps(fps: f64) -> StrandResult<f64> {
    if !fps.is_finite() || fps <= 0.0 {
        return Err(StrandError::config(format!(
            "fps must be a positive finite number, got {fps}"
        )));
    }
    Ok(fps)
}
