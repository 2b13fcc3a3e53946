// src/config/mod.rs

//! Invocation files (`Pipes.toml`).
//!
//! - [`model`] maps the TOML layout and the validated [`PipesConfig`].
//! - [`loader`] reads files from disk.
//! - [`validate`] turns a [`RawPipesConfig`] into a [`PipesConfig`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    AssetEntry, CheckEntry, ContextSection, InvocationSection, PipesConfig, RawPipesConfig,
    RunnerSection,
};
pub use validate::parse_duration;
