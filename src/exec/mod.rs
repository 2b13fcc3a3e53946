// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`runner`] launches the child with its encoded context, enforces the
//!   timeout and hands everything to the result engine.
//! - [`stream`] holds the per-stream tasks: the stdout message pump, stderr
//!   capture and graceful termination.

pub mod runner;
pub mod stream;

pub use runner::{Invocation, ProcessRunner, RunnerOptions, run};
pub use stream::CapturedStderr;
