//! Runtime Configuration
//!
//! Parsing and validation of the runtime configuration (JSON, camelCase
//! keys, every field optional).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event_loop::DEFAULT_MICROTASK_BUDGET;

/// Runtime configuration parsed from JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Maximum microtasks drained per event loop tick
    pub microtask_budget: usize,
    /// Whether reported unhandled rejections are recorded by the event loop
    pub track_unhandled_rejections: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            microtask_budget: DEFAULT_MICROTASK_BUDGET,
            track_unhandled_rejections: true,
        }
    }
}

impl RuntimeConfig {
    /// Load a RuntimeConfig from a JSON string
    pub fn load(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse runtime config: {}", e)))
    }

    /// Load a RuntimeConfig from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::load(&json)
    }

    /// Validate the configuration and return a list of problems
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.microtask_budget == 0 {
            problems.push("microtaskBudget must be at least 1".to_string());
        }
        problems
    }
}
