pub mod framebuffer;
pub mod pacer;
pub mod pipeline;
pub mod plan;
pub mod pool;
pub mod renderable;
pub mod target;
