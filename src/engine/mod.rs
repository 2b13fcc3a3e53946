// src/engine/mod.rs

//! Result engine.
//!
//! The pure, IO-free half of an invocation:
//! - [`reducer`] folds the ordered message stream into accumulated state;
//! - [`outcome`] turns that state plus the process status into an `Outcome`;
//! - [`versioning`] supplies fallback data versions.
//!
//! The async shell that feeds it lives in [`crate::exec`].

pub mod outcome;
pub mod reducer;
pub mod versioning;

pub use outcome::{
    CheckResult, DataVersionSource, Diagnostics, ExitInfo, MaterializationResult,
    MissingReportPolicy, Outcome, OutcomeBuilder, ProcessReport, ProcessStatus, TargetOutcome,
    TargetReport,
};
pub use reducer::{CheckReport, MaterializationReport, ReducedState, Reducer};
pub use versioning::{DataVersioner, FallbackStrategy, MetadataDigest, NoFallback};
