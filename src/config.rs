use crate::cache::InvalidationMode;
use crate::descriptor::DEFAULT_GROUP;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub invalidation: InvalidationMode,
    #[serde(default = "SchedulerConfig::default_frame_groups")]
    pub frame_groups: Vec<String>,
    #[serde(default = "SchedulerConfig::default_catch_panics")]
    pub catch_panics: bool,
    #[serde(default = "SchedulerConfig::default_profile_callbacks")]
    pub profile_callbacks: bool,
    #[serde(default = "SchedulerConfig::default_event_log_capacity")]
    pub event_log_capacity: usize,
    /// Retired ids remembered for round trips before the registry rolls its epoch.
    /// Zero disables the rollover.
    #[serde(default = "SchedulerConfig::default_retired_sequence_limit")]
    pub retired_sequence_limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerConfigOverrides {
    pub invalidation: Option<InvalidationMode>,
    pub frame_groups: Option<Vec<String>>,
    pub catch_panics: Option<bool>,
}

impl SchedulerConfig {
    fn default_frame_groups() -> Vec<String> {
        vec![DEFAULT_GROUP.to_string()]
    }

    const fn default_catch_panics() -> bool {
        true
    }

    const fn default_profile_callbacks() -> bool {
        true
    }

    const fn default_event_log_capacity() -> usize {
        1024
    }

    const fn default_retired_sequence_limit() -> usize {
        4096
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read scheduler config {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse scheduler config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!(target: "kestrel::schedule", "Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &SchedulerConfigOverrides) {
        if let Some(invalidation) = overrides.invalidation {
            self.invalidation = invalidation;
        }
        if let Some(groups) = &overrides.frame_groups {
            self.frame_groups = groups.clone();
        }
        if let Some(catch_panics) = overrides.catch_panics {
            self.catch_panics = catch_panics;
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            invalidation: InvalidationMode::default(),
            frame_groups: Self::default_frame_groups(),
            catch_panics: Self::default_catch_panics(),
            profile_callbacks: Self::default_profile_callbacks(),
            event_log_capacity: Self::default_event_log_capacity(),
            retired_sequence_limit: Self::default_retired_sequence_limit(),
        }
    }
}

impl SchedulerConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.invalidation.is_none() && self.frame_groups.is_none() && self.catch_panics.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.invalidation.is_some() {
            fields.push("invalidation");
        }
        if self.frame_groups.is_some() {
            fields.push("frame_groups");
        }
        if self.catch_panics.is_some() {
            fields.push("catch_panics");
        }
        fields
    }
}
