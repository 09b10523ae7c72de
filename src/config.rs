use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::bridge::ThrownErrorPolicy;
use crate::registry::DuplicatePolicy;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClassEntry {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "LimitsConfig::default_max_call_levels")]
    pub max_call_levels: usize,
    /// Zero leaves the operation count unlimited.
    #[serde(default)]
    pub max_operations: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "BridgeConfig::default_script_root")]
    pub script_root: PathBuf,
    #[serde(default)]
    pub classes: Vec<ClassEntry>,
    #[serde(default)]
    pub thrown_errors: ThrownErrorPolicy,
    #[serde(default)]
    pub duplicates: DuplicatePolicy,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub watch: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BridgeConfigOverrides {
    pub script_root: Option<PathBuf>,
    pub debug: Option<bool>,
    pub watch: Option<bool>,
}

impl LimitsConfig {
    const fn default_max_call_levels() -> usize {
        64
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { max_call_levels: Self::default_max_call_levels(), max_operations: 0 }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            script_root: Self::default_script_root(),
            classes: Vec::new(),
            thrown_errors: ThrownErrorPolicy::default(),
            duplicates: DuplicatePolicy::default(),
            limits: LimitsConfig::default(),
            debug: false,
            watch: false,
        }
    }
}

impl BridgeConfig {
    fn default_script_root() -> PathBuf {
        PathBuf::from("scripts")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &BridgeConfigOverrides) {
        if let Some(root) = &overrides.script_root {
            self.script_root = root.clone();
        }
        if let Some(debug) = overrides.debug {
            self.debug = debug;
        }
        if let Some(watch) = overrides.watch {
            self.watch = watch;
        }
    }
}

impl BridgeConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.script_root.is_none() && self.debug.is_none() && self.watch.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.script_root.is_some() {
            fields.push("script_root");
        }
        if self.debug.is_some() {
            fields.push("debug");
        }
        if self.watch.is_some() {
            fields.push("watch");
        }
        fields
    }
}
