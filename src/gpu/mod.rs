mod buffers;
mod context;
mod programs;
mod render;

pub use context::GpuContext;
pub use render::GpuBackend;
