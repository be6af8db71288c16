mod clock;
pub mod passes;
mod pointer;
pub mod pool;
mod stepper;

#[cfg(test)]
pub(crate) mod reference;

pub use passes::{Backend, PassDescriptor, PassOutput, PassUniforms, ProgramKind};
pub use pool::FieldClass;
pub use stepper::Simulation;
