// src/context/model.rs

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ContextError;
use crate::types::{AssetKey, CheckKey, DeclaredTargets, TargetId};

/// Scalar configuration value passed to the child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Int(i) => write!(f, "{i}"),
            ScalarValue::Float(x) => write!(f, "{x}"),
            ScalarValue::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Bool(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::String(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::String(value)
    }
}

/// Everything the child needs to know about one invocation.
///
/// Immutable once built; construct it with [`ExecutionContext::builder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    run_id: String,
    #[serde(default)]
    asset_keys: Vec<AssetKey>,
    #[serde(default)]
    checks: Vec<CheckKey>,
    #[serde(default)]
    config: BTreeMap<String, ScalarValue>,
    #[serde(default)]
    provenance: BTreeMap<String, String>,
    #[serde(default)]
    extras: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn builder(run_id: impl Into<String>) -> ExecutionContextBuilder {
        ExecutionContextBuilder {
            ctx: ExecutionContext {
                run_id: run_id.into(),
                asset_keys: Vec::new(),
                checks: Vec::new(),
                config: BTreeMap::new(),
                provenance: BTreeMap::new(),
                extras: BTreeMap::new(),
            },
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn asset_keys(&self) -> &[AssetKey] {
        &self.asset_keys
    }

    pub fn checks(&self) -> &[CheckKey] {
        &self.checks
    }

    pub fn config(&self) -> &BTreeMap<String, ScalarValue> {
        &self.config
    }

    pub fn provenance(&self) -> &BTreeMap<String, String> {
        &self.provenance
    }

    pub fn extras(&self) -> &BTreeMap<String, Value> {
        &self.extras
    }

    /// The targets named in this context, as a declared-target set.
    pub fn declared_targets(&self) -> DeclaredTargets {
        self.asset_keys
            .iter()
            .cloned()
            .map(TargetId::Asset)
            .chain(self.checks.iter().cloned().map(TargetId::Check))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionContextBuilder {
    ctx: ExecutionContext,
}

impl ExecutionContextBuilder {
    pub fn asset(mut self, key: impl Into<AssetKey>) -> Self {
        self.ctx.asset_keys.push(key.into());
        self
    }

    pub fn check(mut self, asset_key: impl Into<AssetKey>, name: impl Into<String>) -> Self {
        self.ctx.checks.push(CheckKey::new(asset_key, name));
        self
    }

    /// Add every target of a declared set.
    pub fn targets(mut self, declared: &DeclaredTargets) -> Self {
        for target in declared.iter() {
            match target {
                TargetId::Asset(key) => self.ctx.asset_keys.push(key.clone()),
                TargetId::Check(key) => self.ctx.checks.push(key.clone()),
            }
        }
        self
    }

    pub fn config(mut self, key: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        self.ctx.config.insert(key.into(), value.into());
        self
    }

    pub fn provenance(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.provenance.insert(key.into(), value.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.ctx.extras.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Result<ExecutionContext, ContextError> {
        if self.ctx.run_id.trim().is_empty() {
            return Err(ContextError::InvalidValue {
                key: "run_id".to_string(),
                reason: "run id must not be empty".to_string(),
            });
        }

        for (key, value) in &self.ctx.config {
            if let ScalarValue::Float(x) = value {
                if !x.is_finite() {
                    return Err(ContextError::InvalidValue {
                        key: key.clone(),
                        reason: format!("{x} cannot be represented in JSON"),
                    });
                }
            }
        }

        Ok(self.ctx)
    }
}
