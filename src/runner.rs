// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Runner process supervisor.
//!
//! [`Link`] owns the one child process that serves the user's application in
//! development mode. Exactly one runner session is alive at a time; a restart
//! fully reaps the previous process before spawning its successor so two
//! processes never race for the same listening port.
//!
//! The child's stdout/stderr are passed through to the parent's own streams
//! for visibility. Protocol frames (server readiness, imported modules) are
//! peeled out of the stdout stream and dispatched to structured callbacks
//! instead of being printed.

use crate::config::RunnerCommand;
use crate::error::RunnerError;
use crate::ipc::{self, RunnerMessage};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;

/// Which stream a passthrough line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Structured callbacks relaying child signals to the watch session.
#[derive(Clone, Default)]
pub struct RunnerCallbacks {
    /// The child imported a module; used to extend the watch set.
    pub on_module_imported: Option<Arc<dyn Fn(PathBuf) + Send + Sync>>,
    /// The child's server signaled readiness.
    pub on_server_listening: Option<Arc<dyn Fn() + Send + Sync>>,
    /// A passthrough stdio line, for structured listeners.
    pub on_stdio: Option<Arc<dyn Fn(StdioStream, &str) + Send + Sync>>,
}

/// Options used for the next runner start.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// The generated start script evaluated by the child.
    pub entrypoint_script: String,
    /// Attach the child's debugger at this address.
    pub inspect_brk: Option<String>,
    /// Program and base arguments used to execute the script.
    pub command: RunnerCommand,
    /// Working directory for the child.
    pub cwd: PathBuf,
}

/// Partial update merged into [`RunnerOptions`] for the *next* start or
/// restart. Does not affect an already-running process.
#[derive(Debug, Clone, Default)]
pub struct RunnerPatch {
    /// Replacement start script.
    pub entrypoint_script: Option<String>,
}

struct RunnerSession {
    pid: Option<u32>,
    running: Arc<AtomicBool>,
    // Sending an ack channel asks the waiter task to kill and reap the child.
    kill_tx: oneshot::Sender<oneshot::Sender<()>>,
}

/// Supervisor owning the runner session.
pub struct Link {
    options: Mutex<RunnerOptions>,
    callbacks: RunnerCallbacks,
    session: tokio::sync::Mutex<Option<RunnerSession>>,
}

impl Link {
    /// Creates a supervisor with the given initial options and callbacks.
    pub fn new(options: RunnerOptions, callbacks: RunnerCallbacks) -> Self {
        Self {
            options: Mutex::new(options),
            callbacks,
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Merges a patch into the options used by the next start or restart.
    pub fn update_options(&self, patch: RunnerPatch) {
        let mut options = self.options.lock().unwrap();
        if let Some(script) = patch.entrypoint_script {
            options.entrypoint_script = script;
        }
    }

    /// Starts the runner, terminating any previous session first.
    ///
    /// The previous process is fully reaped, not merely signaled, before the
    /// new one is spawned.
    pub async fn start_or_restart(&self) -> Result<(), RunnerError> {
        let mut session = self.session.lock().await;
        if let Some(old) = session.take() {
            terminate(old).await;
        }

        let options = self.options.lock().unwrap().clone();
        let mut command = Command::new(&options.command.program);
        if let Some(address) = &options.inspect_brk {
            command.arg(format!("--inspect-brk={}", address));
        }
        command
            .args(&options.command.args)
            .arg(&options.entrypoint_script)
            .current_dir(&options.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: options.command.program.clone(),
            source,
        })?;
        let pid = child.id();
        tracing::trace!(?pid, "runner spawned");

        let running = Arc::new(AtomicBool::new(true));

        if let Some(stdout) = child.stdout.take() {
            let callbacks = self.callbacks.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(message) = ipc::parse_frame::<RunnerMessage>(&line) {
                        dispatch(&callbacks, message);
                        continue;
                    }
                    println!("{}", line);
                    if let Some(on_stdio) = &callbacks.on_stdio {
                        on_stdio(StdioStream::Stdout, &line);
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let callbacks = self.callbacks.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    eprintln!("{}", line);
                    if let Some(on_stdio) = &callbacks.on_stdio {
                        on_stdio(StdioStream::Stderr, &line);
                    }
                }
            });
        }

        // Waiter task: reaps the child on natural exit, or kills and reaps it
        // on request from stop()/restart().
        let (kill_tx, mut kill_rx) = oneshot::channel::<oneshot::Sender<()>>();
        let running_flag = Arc::clone(&running);
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => Some(status),
                ack = &mut kill_rx => {
                    let _ = child.kill().await;
                    running_flag.store(false, Ordering::SeqCst);
                    if let Ok(ack) = ack {
                        let _ = ack.send(());
                    }
                    None
                }
            };
            if let Some(status) = status {
                running_flag.store(false, Ordering::SeqCst);
                match status {
                    Ok(status) if status.success() => {
                        tracing::trace!("runner exited cleanly");
                    }
                    Ok(status) => {
                        tracing::warn!(code = ?status.code(), "runner exited abnormally");
                    }
                    Err(error) => {
                        tracing::error!(%error, "failed to wait on runner");
                    }
                }
                // Still honor a late kill request so stop() never hangs.
                if let Ok(ack) = kill_rx.await {
                    let _ = ack.send(());
                }
            }
        });

        *session = Some(RunnerSession {
            pid,
            running,
            kill_tx,
        });
        Ok(())
    }

    /// Terminates the runner and releases resources. Idempotent.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        if let Some(old) = session.take() {
            terminate(old).await;
        }
    }

    /// True while the current session's process is alive.
    pub async fn is_running(&self) -> bool {
        let session = self.session.lock().await;
        session
            .as_ref()
            .map(|s| s.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// OS pid of the current session's process, when alive.
    pub async fn pid(&self) -> Option<u32> {
        let session = self.session.lock().await;
        session.as_ref().and_then(|s| s.pid)
    }
}

async fn terminate(session: RunnerSession) {
    let (ack_tx, ack_rx) = oneshot::channel();
    if session.kill_tx.send(ack_tx).is_ok() {
        // Wait until the waiter task has killed and reaped the child.
        let _ = ack_rx.await;
    }
    tracing::trace!("runner terminated");
}

fn dispatch(callbacks: &RunnerCallbacks, message: RunnerMessage) {
    match message {
        RunnerMessage::ServerListening => {
            tracing::trace!("runner signaled server listening");
            if let Some(on_server_listening) = &callbacks.on_server_listening {
                on_server_listening();
            }
        }
        RunnerMessage::ModuleImported { data } => {
            tracing::trace!(path = %data.file_path.display(), "runner imported module");
            if let Some(on_module_imported) = &callbacks.on_module_imported {
                on_module_imported(data.file_path);
            }
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn sh() -> RunnerCommand {
        RunnerCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string()],
        }
    }

    fn options(script: &str) -> RunnerOptions {
        RunnerOptions {
            entrypoint_script: script.to_string(),
            inspect_brk: None,
            command: sh(),
            cwd: std::env::temp_dir(),
        }
    }

    #[tokio::test]
    async fn test_restart_replaces_the_process() {
        let link = Link::new(options("sleep 5"), RunnerCallbacks::default());
        link.start_or_restart().await.unwrap();
        let first_pid = link.pid().await.unwrap();
        assert!(link.is_running().await);

        link.start_or_restart().await.unwrap();
        let second_pid = link.pid().await.unwrap();
        assert_ne!(first_pid, second_pid);
        assert!(link.is_running().await);

        link.stop().await;
        assert!(!link.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let link = Link::new(options("sleep 5"), RunnerCallbacks::default());
        link.start_or_restart().await.unwrap();
        link.stop().await;
        link.stop().await;
        assert!(!link.is_running().await);
    }

    #[tokio::test]
    async fn test_crash_does_not_poison_the_link() {
        let link = Link::new(options("exit 7"), RunnerCallbacks::default());
        link.start_or_restart().await.unwrap();
        // Give the child time to exit on its own.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!link.is_running().await);

        // A later restart works fine.
        link.update_options(RunnerPatch {
            entrypoint_script: Some("sleep 5".to_string()),
        });
        link.start_or_restart().await.unwrap();
        assert!(link.is_running().await);
        link.stop().await;
    }

    #[tokio::test]
    async fn test_server_listening_frame_fires_callback() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callbacks = RunnerCallbacks {
            on_server_listening: Some(Arc::new(move || {
                let _ = tx.send(());
            })),
            ..Default::default()
        };
        let script = r#"printf '@girder/ipc:{"type":"server-listening"}\n'; sleep 5"#;
        let link = Link::new(options(script), callbacks);
        link.start_or_restart().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("server-listening was not relayed");
        link.stop().await;
    }

    #[tokio::test]
    async fn test_plain_output_reaches_structured_listeners() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callbacks = RunnerCallbacks {
            on_stdio: Some(Arc::new(move |stream, line| {
                let _ = tx.send((stream, line.to_string()));
            })),
            ..Default::default()
        };
        let link = Link::new(options("echo ready; sleep 5"), callbacks);
        link.start_or_restart().await.unwrap();

        let (stream, line) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("stdio was not relayed")
            .unwrap();
        assert_eq!(stream, StdioStream::Stdout);
        assert_eq!(line, "ready");
        link.stop().await;
    }
}
