// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::context::{ContextFileMode, ExecutionContext, ScalarValue};
use crate::engine::{FallbackStrategy, MissingReportPolicy};
use crate::errors::Result;
use crate::exec::{Invocation, RunnerOptions};
use crate::types::{AssetKey, DeclaredTargets};

/// Invocation file as read from TOML, before validation.
///
/// ```toml
/// [runner]
/// timeout = "30s"
///
/// [invocation]
/// executable = "./child.sh"
///
/// [context.config]
/// limit = 10
///
/// [[asset]]
/// key = ["orders"]
///
/// [[check]]
/// asset = ["orders"]
/// name = "non_empty"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawPipesConfig {
    #[serde(default)]
    pub runner: RunnerSection,

    pub invocation: InvocationSection,

    #[serde(default)]
    pub context: ContextSection,

    /// `[[asset]]` entries.
    #[serde(default, rename = "asset")]
    pub assets: Vec<AssetEntry>,

    /// `[[check]]` entries.
    #[serde(default, rename = "check")]
    pub checks: Vec<CheckEntry>,
}

/// `[runner]` section. Durations use `ms`, `s`, `m` or `h` suffixes.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSection {
    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default = "default_grace_period")]
    pub grace_period: String,

    #[serde(default = "default_stderr_limit_bytes")]
    pub stderr_limit_bytes: usize,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,

    #[serde(default = "default_max_env_value_bytes")]
    pub max_env_value_bytes: usize,

    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,

    #[serde(default = "default_split_context")]
    pub split_context: bool,

    /// `never`, `fallback` or `always`.
    #[serde(default)]
    pub context_file: ContextFileMode,

    #[serde(default)]
    pub missing_report: MissingReportPolicy,

    #[serde(default)]
    pub require_close: bool,

    #[serde(default)]
    pub data_version_fallback: FallbackStrategy,
}

fn default_grace_period() -> String {
    "5s".to_string()
}

fn default_stderr_limit_bytes() -> usize {
    64 * 1024
}

fn default_channel_capacity() -> usize {
    64
}

fn default_max_line_bytes() -> usize {
    crate::protocol::DEFAULT_MAX_LINE_BYTES
}

fn default_max_env_value_bytes() -> usize {
    128 * 1024
}

fn default_max_context_bytes() -> usize {
    1024 * 1024
}

fn default_split_context() -> bool {
    true
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            timeout: None,
            grace_period: default_grace_period(),
            stderr_limit_bytes: default_stderr_limit_bytes(),
            channel_capacity: default_channel_capacity(),
            max_line_bytes: default_max_line_bytes(),
            max_env_value_bytes: default_max_env_value_bytes(),
            max_context_bytes: default_max_context_bytes(),
            split_context: default_split_context(),
            context_file: ContextFileMode::default(),
            missing_report: MissingReportPolicy::default(),
            require_close: false,
            data_version_fallback: FallbackStrategy::default(),
        }
    }
}

/// `[invocation]` section: what to launch.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvocationSection {
    pub executable: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Random UUID v4 when omitted.
    #[serde(default)]
    pub run_id: Option<String>,

    /// Extra environment variables for the child.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// `[context.*]` tables copied into the execution context.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextSection {
    #[serde(default)]
    pub config: BTreeMap<String, ScalarValue>,

    #[serde(default)]
    pub provenance: BTreeMap<String, String>,

    #[serde(default)]
    pub extras: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetEntry {
    pub key: AssetKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckEntry {
    pub asset: AssetKey,
    pub name: String,
}

/// Validated invocation file.
///
/// Only constructed through `TryFrom<RawPipesConfig>` (see `validate.rs`) or
/// [`crate::config::load_and_validate`].
#[derive(Debug, Clone)]
pub struct PipesConfig {
    pub runner: RunnerOptions,
    pub timeout: Option<Duration>,
    pub invocation: InvocationSection,
    pub context: ContextSection,
    pub declared: DeclaredTargets,
    /// Directory relative paths are resolved against.
    pub base_dir: PathBuf,
}

impl PipesConfig {
    pub(crate) fn new_unchecked(
        runner: RunnerOptions,
        timeout: Option<Duration>,
        invocation: InvocationSection,
        context: ContextSection,
        declared: DeclaredTargets,
    ) -> Self {
        Self {
            runner,
            timeout,
            invocation,
            context,
            declared,
            base_dir: PathBuf::from("."),
        }
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn runner_options(&self) -> RunnerOptions {
        self.runner.clone()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.invocation.run_id.as_deref()
    }

    /// Build the execution context; a fresh UUID is used when no run id is
    /// configured.
    pub fn build_context(&self) -> Result<ExecutionContext> {
        let run_id = match &self.invocation.run_id {
            Some(id) => id.clone(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let mut builder = ExecutionContext::builder(run_id).targets(&self.declared);
        for (key, value) in &self.context.config {
            builder = builder.config(key.clone(), value.clone());
        }
        for (key, value) in &self.context.provenance {
            builder = builder.provenance(key.clone(), value.clone());
        }
        for (key, value) in &self.context.extras {
            builder = builder.extra(key.clone(), value.clone());
        }

        Ok(builder.build()?)
    }

    /// The executable path, resolved against [`base_dir`](Self::base_dir)
    /// when it is relative and names a path (bare names go through `PATH`).
    pub fn executable(&self) -> PathBuf {
        let exe = Path::new(&self.invocation.executable);
        if exe.is_relative() && exe.components().count() > 1 {
            self.base_dir.join(exe)
        } else {
            exe.to_path_buf()
        }
    }

    pub fn cwd(&self) -> Option<PathBuf> {
        self.invocation.cwd.as_ref().map(|dir| {
            if dir.is_relative() {
                self.base_dir.join(dir)
            } else {
                dir.clone()
            }
        })
    }

    pub fn build_invocation(&self) -> Result<Invocation> {
        let context = self.build_context()?;
        let mut invocation = Invocation::new(self.executable(), context)
            .args(self.invocation.args.iter().cloned())
            .declared(self.declared.clone())
            .timeout(self.timeout);
        if let Some(cwd) = self.cwd() {
            invocation = invocation.cwd(cwd);
        }
        for (key, value) in &self.invocation.env {
            invocation = invocation.env(key.clone(), value.clone());
        }
        Ok(invocation)
    }
}
