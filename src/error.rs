// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Error types for the orchestrator.
//!
//! Layout errors are fatal before the watch loop starts and logged-but-kept
//! afterwards; runner errors never escape the watch loop.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving the project layout.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// No `package.json` was found in the given directory or any ancestor.
    #[error("could not find a package.json upward from {0}")]
    ProjectRootNotFound(PathBuf),

    /// An explicitly requested entrypoint does not exist on disk.
    #[error("entrypoint does not exist: {0}")]
    EntrypointNotFound(PathBuf),

    /// The module scan glob was invalid.
    #[error("invalid module scan pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// An I/O error occurred while scanning the project.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the runner supervisor.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The runner process could not be spawned.
    #[error("failed to spawn runner process `{program}`: {source}")]
    Spawn {
        /// The program that failed to spawn.
        program: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
