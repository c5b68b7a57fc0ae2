// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! girder project configuration.
//!
//! Configuration is loaded from `girder.toml` at the project root.
//!
//! # Example Configuration
//!
//! ```toml
//! [runner]
//! program = "node"
//! args = ["-e"]
//!
//! [watch]
//! ignore = ["**/*.test.ts"]
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Command used to execute runner and reflection children.
///
/// The generated start script is appended as the final argument, so the
/// default of `node -e` evaluates it directly.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerCommand {
    /// Program to execute (default: "node").
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments placed before the start script (default: ["-e"]).
    #[serde(default = "default_args")]
    pub args: Vec<String>,
}

fn default_program() -> String {
    "node".to_string()
}

fn default_args() -> Vec<String> {
    vec!["-e".to_string()]
}

impl Default for RunnerCommand {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
        }
    }
}

/// Watch settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchConfig {
    /// Extra glob patterns the core watch listener ignores.
    #[serde(default)]
    pub ignore: Vec<String>,
}

/// Main configuration structure loaded from `girder.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Runner child process settings.
    #[serde(default)]
    pub runner: RunnerCommand,
    /// Watch settings.
    #[serde(default)]
    pub watch: WatchConfig,
}

impl Config {
    /// Loads configuration from `girder.toml` in the given directory.
    ///
    /// If no configuration file exists, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be parsed.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let config_path = dir.join("girder.toml");

        if !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
