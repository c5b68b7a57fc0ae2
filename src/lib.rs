// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

// Warn on missing documentation for public items
#![warn(missing_docs)]

//! girder — watch-mode development orchestrator.
//!
//! This crate supervises a single long-lived "runner" process executing the
//! user's application, restarts it transparently when relevant source files
//! change, and runs coalesced out-of-band "reflection" passes that introspect
//! the application (plugin discovery, type-artifact generation) without
//! disturbing the live runner.
//!
//! # Features
//!
//! - **File watching** with per-listener allow/deny glob matching
//! - **Runner supervision** with graceful restart and stdio passthrough
//! - **Reflection subprocesses** speaking a typed line-framed IPC protocol
//! - **Coalesced scheduling** so at most one reflection pass runs at a time
//!
//! # Usage
//!
//! This crate is primarily used through the `girder` binary:
//!
//! ```bash
//! girder dev                # develop your application in watch mode
//! girder dev --reflection   # reflection only, the app server never binds
//! ```
//!
//! # Configuration
//!
//! Projects may carry a `girder.toml` at the project root.

/// CLI commands (dev).
pub mod commands;
/// Project configuration from `girder.toml`.
pub mod config;
/// Error types for layout resolution and runner supervision.
pub mod error;
/// Inter-process wire contract (reflection and runner frames).
pub mod ipc;
/// Project layout collaborator (roots, entrypoint, module list).
pub mod layout;
/// Plugin manifests and worktime dev hooks.
pub mod plugin;
/// Reflection coordinator (plugin discovery, type-artifact generation).
pub mod reflection;
/// Runner process supervisor.
pub mod runner;
/// Generated start scripts for the runner and reflection children.
pub mod start_module;
/// Small utilities: debounced coalescing, console clearing.
pub mod util;
/// File system watching and the watch/restart orchestrator.
pub mod watcher;
