// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Reflection coordinator.
//!
//! Reflection is a non-serving execution of the user's application used only
//! to introspect its configuration or regenerate derived type artifacts. Two
//! independent stages exist:
//!
//! - **Plugin discovery** runs attached to the caller's task and yields the
//!   plugin manifests registered during app initialization. Attached
//!   execution is a compatibility compromise; the external contract does not
//!   depend on it.
//! - **Type-artifact generation** always runs as an isolated child process,
//!   typically driven through [`crate::util::Debounced`] so at most one pass
//!   is in flight.
//!
//! Every code path funnels into one [`ReflectionResult`]; the coordinator
//! never returns an error, so callers need no second error-handling layer.
//! The child's terminal frame, its stderr bytes and its exit code are raced:
//! whichever arrives first decides the result, and an exit without a frame is
//! synthesized into a failure rather than hanging.

use crate::config::RunnerCommand;
use crate::ipc::{self, ReflectionHandshake, ReflectionMessage, SerializedError, Stage};
use crate::layout::Layout;
use crate::plugin::PluginManifest;
use crate::start_module;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// Classification of a failed reflection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A compile diagnostic. Actionable, always surfaced to the user.
    Ts,
    /// The user's own initialization code threw. Suppressed in default mode
    /// because the runner already surfaces the same exception.
    Runtime,
}

/// Result of one reflection run.
#[derive(Debug, Clone)]
pub enum ReflectionResult {
    /// Plugin discovery completed.
    Plugins(Vec<PluginManifest>),
    /// Type-artifact generation completed.
    Artifacts,
    /// The run failed.
    Failed {
        /// Failure classification.
        kind: FailureKind,
        /// The error reported by (or synthesized for) the child.
        error: SerializedError,
    },
}

impl ReflectionResult {
    /// True unless the run failed.
    pub fn is_success(&self) -> bool {
        !matches!(self, ReflectionResult::Failed { .. })
    }

    fn runtime_failure(name: &str, message: impl Into<String>) -> Self {
        ReflectionResult::Failed {
            kind: FailureKind::Runtime,
            error: SerializedError::new(name, message),
        }
    }
}

/// Runs the given reflection stage against the layout.
///
/// The plugin stage is awaited inline by its caller (attached); the typegen
/// stage is expected to be wrapped in the debounced coalescer. Both spawn the
/// same child shape: the command's program and base arguments, the generated
/// reflection script as the final argument, and a typed handshake on stdin.
pub async fn reflect(layout: &Layout, stage: Stage, command: &RunnerCommand) -> ReflectionResult {
    tracing::trace!(%stage, "reflection started");

    let script = start_module::reflection_script(layout);
    let mut child = match Command::new(&command.program)
        .args(&command.args)
        .arg(script)
        .current_dir(&layout.project_root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(error) => {
            return ReflectionResult::runtime_failure(
                "SpawnError",
                format!("failed to spawn `{}`: {}", command.program, error),
            );
        }
    };

    // Handshake. The child may exit before reading it; a broken pipe here is
    // not an error in its own right.
    if let Some(mut stdin) = child.stdin.take() {
        let handshake = ReflectionHandshake {
            stage,
            layout: layout.clone(),
        };
        match serde_json::to_string(&handshake) {
            Ok(mut line) => {
                line.push('\n');
                let _ = stdin.write_all(line.as_bytes()).await;
            }
            Err(error) => tracing::error!(%error, "failed to serialize reflection handshake"),
        }
        drop(stdin);
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut out_lines = stdout.map(|out| BufReader::new(out).lines());
    let mut err_lines = stderr.map(|err| BufReader::new(err).lines());
    let mut stdout_open = out_lines.is_some();
    let mut stderr_open = err_lines.is_some();

    let result = loop {
        tokio::select! {
            line = read_next(&mut out_lines), if stdout_open => match line {
                Some(line) => {
                    if let Some(message) = ipc::parse_frame::<ReflectionMessage>(&line) {
                        break result_from_message(message);
                    }
                    tracing::trace!(line, "reflection child stdout");
                }
                None => stdout_open = false,
            },
            line = read_next(&mut err_lines), if stderr_open => match line {
                Some(line) => {
                    tracing::trace!(line, "reflection child stderr");
                    break ReflectionResult::runtime_failure("Error", line);
                }
                None => stderr_open = false,
            },
            status = child.wait() => {
                // The child exited first. A terminal frame may still sit in
                // the pipe; drain before synthesizing a failure.
                if let Some(message) = drain_frames(&mut out_lines).await {
                    break result_from_message(message);
                }
                if let Some(line) = read_next(&mut err_lines).await {
                    break ReflectionResult::runtime_failure("Error", line);
                }
                break match status {
                    Ok(status) if status.success() => ReflectionResult::runtime_failure(
                        "Error",
                        "reflection child exited without reporting a result",
                    ),
                    Ok(status) => ReflectionResult::runtime_failure(
                        "Error",
                        format!("reflection child failed with exit code {:?}", status.code()),
                    ),
                    Err(error) => ReflectionResult::runtime_failure(
                        "Error",
                        format!("failed to wait on reflection child: {}", error),
                    ),
                };
            }
        }
    };

    // The child may still be running (e.g. stderr decided the result).
    let _ = child.start_kill();
    let _ = child.wait().await;

    tracing::trace!(%stage, success = result.is_success(), "reflection finished");
    result
}

async fn read_next(
    lines: &mut Option<tokio::io::Lines<BufReader<impl tokio::io::AsyncRead + Unpin>>>,
) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}

async fn drain_frames(
    lines: &mut Option<tokio::io::Lines<BufReader<impl tokio::io::AsyncRead + Unpin>>>,
) -> Option<ReflectionMessage> {
    while let Some(line) = read_next(lines).await {
        if let Some(message) = ipc::parse_frame::<ReflectionMessage>(&line) {
            return Some(message);
        }
    }
    None
}

fn result_from_message(message: ReflectionMessage) -> ReflectionResult {
    match message {
        ReflectionMessage::SuccessTypegen => ReflectionResult::Artifacts,
        ReflectionMessage::SuccessPlugin { data } => ReflectionResult::Plugins(data.plugins),
        ReflectionMessage::TsError { data } => ReflectionResult::Failed {
            kind: FailureKind::Ts,
            error: data.serialized_error,
        },
        ReflectionMessage::RuntimeError { data } => ReflectionResult::Failed {
            kind: FailureKind::Runtime,
            error: data.serialized_error,
        },
    }
}
