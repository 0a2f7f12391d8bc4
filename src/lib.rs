//! strandcast is the server core of a networked addressable-lighting
//! controller.
//!
//! It continuously renders per-pixel HSI frames from a set of effect
//! renderables, composes them into a single logical framebuffer, and hands
//! completed frame generations to output workers that drive LED hardware.
//! Persisted entities (groups, nodes, channels, routines) live in a
//! [`Registry`]; a command endpoint mutates the render plan on behalf of
//! external tools.
//!
//! # Frame cycle
//!
//! 1. **Snapshot**: the [`Pipeline`] copies the current plan under its lock
//! 2. **Prepare**: each renderable's `prepare` runs on the frame thread
//! 3. **Render**: one job per `(target, renderable)` on the worker pool
//! 4. **Finish + publish**: `finish` hooks run, then the framebuffer
//!    generation is closed and becomes visible to readers atomically
//! 5. **Pace**: an adaptive sleep holds the configured frame rate
#![forbid(unsafe_code)]

mod command;
mod config;
mod foundation;
mod output;
mod render;
mod store;

pub use command::endpoint::Endpoint;
pub use command::schema::{
    ChannelPatch, GroupPatch, NodePatch, Reply, Request, RequestEnvelope, RoutinePatch,
    ServerStatus, StatusCode,
};
pub use config::{CommandConfig, Config, RenderConfig, StoreConfig};
pub use foundation::core::{FrameToken, GroupId, HsiPixel};
pub use foundation::error::{StrandError, StrandResult};
pub use output::sink::{FrameSink, InMemorySink, OutputWorker, SinkConfig};
pub use render::framebuffer::Framebuffer;
pub use render::pacer::FramePacer;
pub use render::pipeline::{Pipeline, PipelineState, PipelineStats};
pub use render::plan::{PlanEntry, RenderPlan};
pub use render::pool::{JobHandle, WorkerPool};
pub use render::renderable::{
    FillRenderable, Renderable, SharedRenderable, SweepRenderable, shared,
};
pub use render::target::{GroupSlice, GroupTarget, MultiGroupTarget, SharedTarget, Target};
pub use store::model::{Channel, Group, Node, Routine};
pub use store::registry::Registry;
