use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::foundation::core::HsiPixel;
use crate::foundation::error::{StrandError, StrandResult};
use crate::render::framebuffer::Framebuffer;
use crate::store::model::Channel;

/// Configuration handed to a [`FrameSink`] when its worker starts.
#[derive(Debug, Clone, Copy)]
pub struct SinkConfig {
    pub channel_id: u32,
    pub num_pixels: usize,
}

/// Consumer contract for one output channel's completed frames.
///
/// Ordering contract: `push_frame` is called with strictly increasing
/// generation numbers. Generations may be skipped when the sink is slower
/// than the pipeline; one is never delivered twice.
pub trait FrameSink: Send {
    fn begin(&mut self, cfg: SinkConfig) -> StrandResult<()>;
    fn push_frame(&mut self, generation: u64, pixels: &[HsiPixel]) -> StrandResult<()>;
    fn end(&mut self) -> StrandResult<()>;
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemorySink {
    pub cfg: Option<SinkConfig>,
    /// `(generation, pixels)` in delivery order.
    pub frames: Vec<(u64, Vec<HsiPixel>)>,
    pub ended: bool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> StrandResult<()> {
        self.cfg = Some(cfg);
        self.frames.clear();
        Ok(())
    }

    fn push_frame(&mut self, generation: u64, pixels: &[HsiPixel]) -> StrandResult<()> {
        self.frames.push((generation, pixels.to_vec()));
        Ok(())
    }

    fn end(&mut self) -> StrandResult<()> {
        self.ended = true;
        Ok(())
    }
}

/// Drives one output channel: watches the framebuffer for published
/// generations and pushes the channel's pixel window to its sink.
///
/// The worker owns its sink for its lifetime; `stop` joins the thread and
/// hands the sink back so callers can flush or inspect it.
pub struct OutputWorker<S: FrameSink + 'static> {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<(S, StrandResult<()>)>,
}

impl<S: FrameSink + 'static> OutputWorker<S> {
    pub fn spawn(fb: Arc<Framebuffer>, channel: Channel, mut sink: S) -> StrandResult<Self> {
        let range = channel.fb_range();
        if range.end > fb.capacity() {
            return Err(StrandError::OutOfRange {
                start: range.start,
                end: range.end,
                capacity: fb.capacity(),
            });
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name(format!("output-channel-{}", channel.id))
                .spawn(move || {
                    let mut run = || -> StrandResult<()> {
                        sink.begin(SinkConfig {
                            channel_id: channel.id,
                            num_pixels: channel.num_pixels,
                        })?;

                        let mut last_seen = fb.generation();
                        while !stop.load(Ordering::Acquire) {
                            let current = fb.generation();
                            if current > last_seen {
                                let pixels = fb.read(channel.fb_range())?;
                                sink.push_frame(current, &pixels)?;
                                last_seen = current;
                            } else {
                                std::thread::sleep(Duration::from_millis(1));
                            }
                        }
                        sink.end()
                    };
                    let result = run();
                    if let Err(e) = &result {
                        tracing::warn!(channel = channel.id, error = %e, "output worker failed");
                    }
                    (sink, result)
                })
                .map_err(|e| StrandError::Other(anyhow::Error::new(e)))?
        };
        Ok(Self { stop, handle })
    }

    /// Signal the worker, join it, and return the sink.
    pub fn stop(self) -> StrandResult<S> {
        self.stop.store(true, Ordering::Release);
        let (sink, result) = self
            .handle
            .join()
            .map_err(|_| StrandError::render("output worker panicked"))?;
        result?;
        Ok(sink)
    }
}
