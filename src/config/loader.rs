// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{PipesConfig, RawPipesConfig};
use crate::errors::Result;

/// Read and deserialize an invocation file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPipesConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawPipesConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load, validate, and anchor relative paths at the file's directory.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PipesConfig> {
    let path = path.as_ref();
    let raw_config = load_from_path(path)?;
    let base_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    debug!(path = %path.display(), base_dir = %base_dir.display(), "loaded invocation file");

    let config = PipesConfig::try_from(raw_config)?.with_base_dir(base_dir);
    Ok(config)
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("Pipes.toml")
}
