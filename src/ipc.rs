// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Inter-process wire contract.
//!
//! Children (the runner and the reflection subprocess) talk back to the
//! orchestrator with newline-delimited JSON frames on stdout, each prefixed
//! with [`FRAME_PREFIX`] so protocol traffic can be peeled out of ordinary
//! application output. Parent-to-child data travels in a single typed
//! handshake message written to the child's stdin at spawn time.
//!
//! Message field names are a compatibility surface and must not change.

use crate::layout::Layout;
use crate::plugin::PluginManifest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Sentinel prefix marking a protocol frame on a child's stdout.
pub const FRAME_PREFIX: &str = "@girder/ipc:";

/// Reflection stages a child can be asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Discover registered plugins by running the app's initialization.
    Plugin,
    /// Regenerate derived type-information artifacts.
    Typegen,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Plugin => write!(f, "plugin"),
            Stage::Typegen => write!(f, "typegen"),
        }
    }
}

/// Handshake written to a reflection child's stdin at spawn time.
///
/// Carries the already-computed project layout so the child never rescans
/// the disk, and names the active stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionHandshake {
    /// The stage the child should execute.
    pub stage: Stage,
    /// The serialized project layout.
    pub layout: Layout,
}

/// An error serialized across the process boundary.
///
/// `name`, `message` and `stack` are fixed; any additional enumerable fields
/// the child attached survive the round trip via the flattened map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerializedError {
    /// Error class name (e.g. `TypeError`).
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Stack trace, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Arbitrary additional fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SerializedError {
    /// Builds a synthetic error with the given name and message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl fmt::Display for SerializedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Payload wrapper carrying a serialized error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    /// The serialized error.
    #[serde(rename = "serializedError")]
    pub serialized_error: SerializedError,
}

/// Payload of a successful plugin-discovery run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginsPayload {
    /// The plugin manifests the app registered during initialization.
    pub plugins: Vec<PluginManifest>,
}

/// Terminal message sent by a reflection child. Exactly one per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ReflectionMessage {
    /// Type-artifact generation completed.
    #[serde(rename = "success-typegen")]
    SuccessTypegen,
    /// Plugin discovery completed.
    #[serde(rename = "success-plugin")]
    SuccessPlugin {
        /// Discovered plugins.
        data: PluginsPayload,
    },
    /// A compile-time diagnostic; expected and recoverable.
    #[serde(rename = "ts-error")]
    TsError {
        /// The serialized diagnostic.
        data: ErrorPayload,
    },
    /// The user's own initialization code threw.
    #[serde(rename = "runtime-error")]
    RuntimeError {
        /// The serialized error.
        data: ErrorPayload,
    },
}

/// Payload of a runner `module-imported` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleImported {
    /// Absolute path of the imported module.
    pub file_path: PathBuf,
}

/// Structured signals relayed by the runner child.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum RunnerMessage {
    /// The application server is listening.
    #[serde(rename = "server-listening")]
    ServerListening,
    /// The application imported a module; used to extend the watch set.
    #[serde(rename = "module-imported")]
    ModuleImported {
        /// Frame payload.
        data: ModuleImported,
    },
}

/// Extracts a protocol frame from a line of child stdout, if it is one.
///
/// Non-frame lines return `None` and should be passed through. Malformed
/// frames are logged and dropped rather than crashing the relay.
pub fn parse_frame<T: for<'de> Deserialize<'de>>(line: &str) -> Option<T> {
    let json = line.strip_prefix(FRAME_PREFIX)?;
    match serde_json::from_str(json) {
        Ok(message) => Some(message),
        Err(error) => {
            tracing::trace!(%error, line, "discarding malformed ipc frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflection_message_wire_names() {
        let json = serde_json::to_string(&ReflectionMessage::SuccessTypegen).unwrap();
        assert_eq!(json, r#"{"type":"success-typegen"}"#);

        let message = ReflectionMessage::TsError {
            data: ErrorPayload {
                serialized_error: SerializedError::new("TSError", "TS2345: type mismatch"),
            },
        };
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(
            json,
            r#"{"type":"ts-error","data":{"serializedError":{"name":"TSError","message":"TS2345: type mismatch"}}}"#
        );
    }

    #[test]
    fn test_serialized_error_keeps_extra_fields() {
        let json = r#"{"name":"Error","message":"boom","stack":"at x","code":"EADDRINUSE"}"#;
        let error: SerializedError = serde_json::from_str(json).unwrap();
        assert_eq!(error.name, "Error");
        assert_eq!(error.stack.as_deref(), Some("at x"));
        assert_eq!(error.extra["code"], "EADDRINUSE");
        // Round trip preserves the extra field.
        let back = serde_json::to_value(&error).unwrap();
        assert_eq!(back["code"], "EADDRINUSE");
    }

    #[test]
    fn test_runner_frame_parsing() {
        let line = r#"@girder/ipc:{"type":"module-imported","data":{"filePath":"/p/src/extra.ts"}}"#;
        let message: RunnerMessage = parse_frame(line).unwrap();
        assert_eq!(
            message,
            RunnerMessage::ModuleImported {
                data: ModuleImported {
                    file_path: PathBuf::from("/p/src/extra.ts"),
                },
            }
        );

        assert_eq!(
            parse_frame::<RunnerMessage>(r#"@girder/ipc:{"type":"server-listening"}"#),
            Some(RunnerMessage::ServerListening)
        );

        // Ordinary output is not a frame.
        assert_eq!(parse_frame::<RunnerMessage>("GET / 200"), None);
    }

    #[test]
    fn test_handshake_wire_shape() {
        let handshake = ReflectionHandshake {
            stage: Stage::Typegen,
            layout: Layout {
                project_root: "/p".into(),
                source_root: "/p/src".into(),
                entrypoint_path: Some("/p/src/app.ts".into()),
                modules: vec!["/p/src/app.ts".into()],
            },
        };
        let json = serde_json::to_value(&handshake).unwrap();
        assert_eq!(json["stage"], "typegen");
        assert_eq!(json["layout"]["sourceRoot"], "/p/src");
    }
}
