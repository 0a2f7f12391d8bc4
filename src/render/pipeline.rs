use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::{Config, RenderConfig};
use crate::foundation::core::{FrameToken, GroupId};
use crate::foundation::error::{StrandError, StrandResult};
use crate::render::framebuffer::Framebuffer;
use crate::render::pacer::FramePacer;
use crate::render::plan::RenderPlan;
use crate::render::pool::{JobHandle, WorkerPool};
use crate::render::renderable::{Renderable as _, SharedRenderable};
use crate::render::target::{SharedTarget, Target};
use crate::store::model::Group;

/// Lifecycle of a pipeline instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Uninitialised = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Stopping,
            3 => Self::Stopped,
            _ => Self::Uninitialised,
        }
    }
}

/// Aggregated pipeline counters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PipelineStats {
    /// Loop iterations since start (empty-plan frames included).
    pub frames_total: u64,
    /// Render jobs that failed and were skipped for their frame.
    pub jobs_failed: u64,
    /// Frame rate over the last ~1 s window, once one has elapsed.
    pub observed_fps: Option<f64>,
}

/// The render pipeline: owns the plan, framebuffer, worker pool and pacer,
/// and runs the frame loop on a dedicated thread.
///
/// Per frame: snapshot the plan under its lock, open a framebuffer
/// generation, `prepare` every renderable on the frame thread, dispatch one
/// render job per entry to the pool, join them all, `finish` every
/// renderable, close the generation, then pace. The termination flag is
/// checked only between frames, so worst-case stop latency is one period.
///
/// Plan mutations are linearised by the plan mutex and become visible at the
/// next frame snapshot; the in-flight frame always completes with the
/// snapshot it took.
pub struct Pipeline {
    config: RenderConfig,
    fb: Arc<Framebuffer>,
    plan: Mutex<RenderPlan>,
    state: AtomicU8,
    terminate: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    frames_total: AtomicU64,
    jobs_failed: AtomicU64,
    observed_fps: Mutex<Option<f64>>,
    fatal: Mutex<Option<String>>,
}

static SHARED: Mutex<Option<Arc<Pipeline>>> = Mutex::new(None);

impl Pipeline {
    /// Install the process-wide pipeline instance and start rendering.
    pub fn start(config: &Config) -> StrandResult<()> {
        let mut slot = SHARED.lock();
        if slot.is_some() {
            return Err(StrandError::AlreadyRunning);
        }
        *slot = Some(Self::launch(config)?);
        Ok(())
    }

    /// The process-wide instance installed by [`Pipeline::start`].
    pub fn shared() -> StrandResult<Arc<Pipeline>> {
        SHARED.lock().clone().ok_or(StrandError::NotRunning)
    }

    /// Tear down the process-wide instance. Calling this without a prior
    /// `start` (or twice) is a logged no-op.
    pub fn stop() {
        let taken = SHARED.lock().take();
        match taken {
            Some(pipeline) => pipeline.shutdown(),
            None => tracing::error!("ignoring render pipeline stop without a running instance"),
        }
    }

    /// Build and start an owned pipeline instance, independent of the
    /// process-wide slot. The caller is responsible for `shutdown`.
    pub fn launch(config: &Config) -> StrandResult<Arc<Self>> {
        config.validate()?;
        let pipeline = Arc::new(Self {
            config: config.render.clone(),
            fb: Arc::new(Framebuffer::new(config.render.framebuffer_pixels)?),
            plan: Mutex::new(RenderPlan::default()),
            state: AtomicU8::new(PipelineState::Running as u8),
            terminate: AtomicBool::new(false),
            worker: Mutex::new(None),
            frames_total: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            observed_fps: Mutex::new(None),
            fatal: Mutex::new(None),
        });

        let worker = {
            let pipeline = Arc::clone(&pipeline);
            std::thread::Builder::new()
                .name("render-pipeline".into())
                .spawn(move || pipeline.frame_loop())
                .map_err(|e| StrandError::Other(anyhow::Error::new(e)))?
        };
        *pipeline.worker.lock() = Some(worker);
        Ok(pipeline)
    }

    /// Request termination and join the frame thread. Repeated calls are a
    /// logged no-op.
    pub fn shutdown(&self) {
        if self.terminate.swap(true, Ordering::AcqRel) {
            tracing::error!("ignoring repeated render pipeline stop");
            return;
        }
        self.state
            .store(PipelineState::Stopping as u8, Ordering::Release);
        tracing::debug!("requesting render pipeline termination");

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.state
            .store(PipelineState::Stopped as u8, Ordering::Release);
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The framebuffer output workers read completed generations from.
    pub fn framebuffer(&self) -> Arc<Framebuffer> {
        Arc::clone(&self.fb)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames_total: self.frames_total.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            observed_fps: *self.observed_fps.lock(),
        }
    }

    /// Description of the error that tore the frame loop down, if any.
    pub fn fatal_error(&self) -> Option<String> {
        self.fatal.lock().clone()
    }

    /// Bind `renderable` to `target`, resolving conflicts per the plan
    /// rules. Accepted only while the pipeline is running.
    pub fn add(&self, renderable: SharedRenderable, target: SharedTarget) -> StrandResult<()> {
        self.ensure_running()?;
        self.plan.lock().add(renderable, target)
    }

    /// Bind `renderable` to a single persisted group. Returns the
    /// constructed target handle for a later `remove`.
    pub fn add_group(
        &self,
        renderable: SharedRenderable,
        group: &Group,
    ) -> StrandResult<SharedTarget> {
        self.ensure_running()?;
        let target = Target::from_group(group)?.shared();
        self.plan
            .lock()
            .add(renderable, Arc::clone(&target))?;
        Ok(target)
    }

    /// Bind `renderable` to a multi-group target built from `groups`.
    pub fn add_groups(
        &self,
        renderable: SharedRenderable,
        groups: &[Group],
    ) -> StrandResult<SharedTarget> {
        self.ensure_running()?;
        let target = Target::from_groups(groups)?.shared();
        self.plan
            .lock()
            .add(renderable, Arc::clone(&target))?;
        Ok(target)
    }

    /// Unbind `target`. The current frame finishes with its snapshot; the
    /// removal is observed at the next one.
    pub fn remove(&self, target: &SharedTarget) -> StrandResult<()> {
        self.ensure_running()?;
        self.plan.lock().remove(target)
    }

    /// Unbind every plan entry covering any of `ids` (stripping mutable
    /// containers down rather than dropping them wholesale).
    pub fn remove_groups(&self, ids: &[GroupId]) -> StrandResult<usize> {
        self.ensure_running()?;
        self.plan.lock().remove_groups(ids)
    }

    /// Update the live brightness of every target slice of `id`.
    pub fn set_brightness(&self, id: GroupId, brightness: f64) -> StrandResult<usize> {
        self.ensure_running()?;
        if !(0.0..=1.0).contains(&brightness) {
            return Err(StrandError::invalid_arg(format!(
                "brightness {brightness} outside [0, 1]"
            )));
        }
        Ok(self.plan.lock().set_brightness(id, brightness))
    }

    /// Human-readable snapshot of the plan and counters.
    pub fn dump(&self) -> String {
        let stats = self.stats();
        let plan = self.plan.lock().dump();
        format!(
            "pipeline: state={:?} frames={} failed_jobs={} fps={}\n{plan}",
            self.state(),
            stats.frames_total,
            stats.jobs_failed,
            stats
                .observed_fps
                .map_or_else(|| "n/a".to_owned(), |f| format!("{f:.1}")),
        )
    }

    fn ensure_running(&self) -> StrandResult<()> {
        match self.state() {
            PipelineState::Running => Ok(()),
            _ => Err(StrandError::NotRunning),
        }
    }

    fn record_fatal(&self, err: &StrandError) {
        tracing::error!(error = %err, "fatal render pipeline error");
        *self.fatal.lock() = Some(err.to_string());
    }

    /// Entry point of the dedicated frame thread.
    fn frame_loop(&self) {
        let pool = match WorkerPool::new(self.config.threads) {
            Ok(pool) => pool,
            Err(e) => {
                self.record_fatal(&e);
                self.state
                    .store(PipelineState::Stopped as u8, Ordering::Release);
                return;
            }
        };
        let mut pacer = match FramePacer::new(self.config.fps) {
            Ok(pacer) => pacer,
            Err(e) => {
                self.record_fatal(&e);
                self.state
                    .store(PipelineState::Stopped as u8, Ordering::Release);
                return;
            }
        };

        tracing::debug!(
            fps = self.config.fps,
            threads = pool.threads(),
            pixels = self.fb.capacity(),
            "render pipeline running"
        );

        while !self.terminate.load(Ordering::Acquire) {
            let frame_start = Instant::now();

            let entries = self.plan.lock().snapshot();
            if !entries.is_empty() {
                let token = match self.fb.start_frame() {
                    Ok(token) => token,
                    Err(e) => {
                        // A busy generation here means a token leaked out of
                        // a previous frame; the loop cannot continue safely.
                        self.record_fatal(&e);
                        break;
                    }
                };

                for entry in &entries {
                    entry.renderable.lock().prepare();
                }

                let jobs: Vec<JobHandle> = entries
                    .iter()
                    .map(|entry| {
                        let fb = Arc::clone(&self.fb);
                        let target = Arc::clone(&entry.target);
                        let renderable = Arc::clone(&entry.renderable);
                        pool.submit(move || render_one(&fb, token, &target, &renderable))
                    })
                    .collect();

                for job in jobs {
                    if let Err(e) = job.join() {
                        tracing::warn!(error = %e, "render job failed; entry skipped this frame");
                        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
                    }
                }

                for entry in &entries {
                    entry.renderable.lock().finish();
                }

                if let Err(e) = self.fb.end_frame(token) {
                    self.record_fatal(&e);
                    break;
                }
            }

            self.frames_total.fetch_add(1, Ordering::Relaxed);
            pacer.sleep_until_next_frame(frame_start);
            *self.observed_fps.lock() = pacer.observed_fps();
        }

        tracing::debug!("render pipeline shutting down");
        pool.stop(false);
        self.state
            .store(PipelineState::Stopped as u8, Ordering::Release);
    }
}

/// One render job: produce the entry's pixels and inscribe them.
///
/// Lock order here is target before renderable, matching the plan mutation
/// path (plan -> target -> renderable -> framebuffer); the frame token keeps
/// the framebuffer write tied to this frame's generation.
fn render_one(
    fb: &Framebuffer,
    token: FrameToken,
    target: &SharedTarget,
    renderable: &SharedRenderable,
) -> StrandResult<()> {
    let target = target.lock();
    let mut renderable = renderable.lock();
    renderable.render()?;
    target.inscribe(fb, token, renderable.pixels())
}
