use std::time::{Duration, Instant};

use crate::foundation::core::validate_fps;
use crate::foundation::error::StrandResult;

/// Drives the frame loop at a fixed rate with an adaptive sleep.
///
/// Per frame, the pacer sleeps `period - elapsed - bias`, where `bias` is
/// the arithmetic mean of every observed `(actual - requested)` sleep error
/// since startup. The mean cancels systematic oversleep of the OS timer and
/// is unbiased in steady state; a lag spike merely dilutes into the average.
///
/// The observed frame rate is recomputed roughly once a second by counting
/// completed frames.
#[derive(Debug)]
pub struct FramePacer {
    period_ns: f64,
    bias_ns: f64,
    samples: u64,
    window_start: Instant,
    window_frames: u32,
    observed_fps: Option<f64>,
}

impl FramePacer {
    pub fn new(fps: f64) -> StrandResult<Self> {
        let fps = validate_fps(fps)?;
        Ok(Self {
            period_ns: 1e9 / fps,
            bias_ns: 0.0,
            samples: 0,
            window_start: Instant::now(),
            window_frames: 0,
            observed_fps: None,
        })
    }

    /// Target frame period.
    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.period_ns as u64)
    }

    /// Frame rate measured over the last completed ~1 s window, if one has
    /// elapsed yet.
    pub fn observed_fps(&self) -> Option<f64> {
        self.observed_fps
    }

    /// Block until the next frame is due. `frame_start` is the timestamp
    /// taken at the top of the frame body.
    pub fn sleep_until_next_frame(&mut self, frame_start: Instant) {
        let elapsed_ns = frame_start.elapsed().as_nanos() as f64;
        if elapsed_ns > 2.0 * self.period_ns {
            tracing::warn!(
                elapsed_ms = elapsed_ns / 1e6,
                period_ms = self.period_ns / 1e6,
                "frame body exceeded twice its period"
            );
        }

        let requested_ns = compute_requested(self.period_ns, elapsed_ns, self.bias_ns);
        if requested_ns > 0.0 {
            let before = Instant::now();
            std::thread::sleep(Duration::from_nanos(requested_ns as u64));
            let actual_ns = before.elapsed().as_nanos() as f64;
            self.bias_ns = fold_bias(self.bias_ns, self.samples, actual_ns - requested_ns);
            self.samples += 1;
        }

        self.count_frame();
    }

    fn count_frame(&mut self) {
        self.window_frames += 1;
        let window = self.window_start.elapsed();
        if window >= Duration::from_secs(1) {
            self.observed_fps = Some(f64::from(self.window_frames) / window.as_secs_f64());
            self.window_frames = 0;
            self.window_start = Instant::now();
        }
    }
}

/// Sleep time that keeps the frame cadence: period minus what the frame body
/// already consumed, minus the learned sleep overshoot.
fn compute_requested(period_ns: f64, elapsed_ns: f64, bias_ns: f64) -> f64 {
    period_ns - elapsed_ns - bias_ns
}

/// Running arithmetic mean over all samples since startup:
/// `bias' = (bias * n + delta) / (n + 1)`.
fn fold_bias(bias_ns: f64, samples: u64, delta_ns: f64) -> f64 {
    let n = samples as f64;
    (bias_ns * n + delta_ns) / (n + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_subtracts_elapsed_and_bias() {
        assert_eq!(compute_requested(20_000_000.0, 5_000_000.0, 0.0), 15_000_000.0);
        assert_eq!(
            compute_requested(20_000_000.0, 5_000_000.0, 1_000_000.0),
            14_000_000.0
        );
        // An over-budget frame yields a non-positive request: no sleep.
        assert!(compute_requested(20_000_000.0, 25_000_000.0, 0.0) <= 0.0);
    }

    #[test]
    fn bias_is_the_running_mean_of_sleep_error() {
        let b1 = fold_bias(0.0, 0, 100.0);
        assert_eq!(b1, 100.0);
        let b2 = fold_bias(b1, 1, 300.0);
        assert_eq!(b2, 200.0);
        let b3 = fold_bias(b2, 2, 200.0);
        assert_eq!(b3, 200.0);
    }

    #[test]
    fn bias_converges_on_constant_overshoot() {
        let mut bias = 0.0;
        for n in 0..1000u64 {
            bias = fold_bias(bias, n, 250.0);
        }
        assert!((bias - 250.0).abs() < 1e-9);
    }

    #[test]
    fn period_reflects_fps() {
        let pacer = FramePacer::new(50.0).unwrap();
        assert_eq!(pacer.period(), Duration::from_millis(20));
        assert!(pacer.observed_fps().is_none());
    }

    #[test]
    fn rejects_bad_fps() {
        assert!(FramePacer::new(0.0).is_err());
        assert!(FramePacer::new(-5.0).is_err());
    }

    #[test]
    fn overlong_frame_does_not_sleep() {
        let mut pacer = FramePacer::new(1000.0).unwrap();
        // A frame that started long ago is already over budget.
        let start = Instant::now() - Duration::from_millis(50);
        let before = Instant::now();
        pacer.sleep_until_next_frame(start);
        assert!(before.elapsed() < Duration::from_millis(5));
    }
}
