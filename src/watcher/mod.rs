// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Watch/restart orchestrator.
//!
//! Entrypoint into the watcher system: subscribes to raw file system events,
//! evaluates them against the core listener and every plugin listener,
//! drives runner restarts, and exposes `start`/`stop` to the hosting
//! command. One watch session owns one [`crate::runner::Link`].
//!
//! A `restarting` guard serializes restarts: an event arriving while a
//! restart is in flight is logged and dropped, not queued. The next raw
//! event after the restart completes naturally picks up the latest state,
//! since the file system reports cumulative state rather than a replayable
//! queue of deltas.

pub mod fs_events;
pub mod matcher;

pub use fs_events::{ChangeKind, FileChangeEvent, FsWatcher};
pub use matcher::PathMatcher;

use crate::config::RunnerCommand;
use crate::plugin::DevHooks;
use crate::runner::{Link, RunnerCallbacks, RunnerOptions, StdioStream};
use crate::util::clear_console;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, Notify};

/// What prompted a restart cycle.
#[derive(Debug, Clone)]
pub enum RestartTrigger {
    /// The synthetic initial start.
    Init,
    /// A matched file system event.
    Fs(FileChangeEvent),
    /// A plugin requested the restart through its lens.
    Plugin {
        /// The file the plugin attributes the restart to.
        file: PathBuf,
    },
}

impl RestartTrigger {
    /// Short reason tag for logs and events.
    pub fn reason(&self) -> &'static str {
        match self {
            RestartTrigger::Init => "init",
            RestartTrigger::Fs(event) => event.kind.as_str(),
            RestartTrigger::Plugin { .. } => "plugin",
        }
    }

    /// The file behind the trigger, when there is one.
    pub fn file(&self) -> Option<&Path> {
        match self {
            RestartTrigger::Init => None,
            RestartTrigger::Fs(event) => Some(&event.path),
            RestartTrigger::Plugin { file } => Some(file),
        }
    }
}

/// Session events surfaced to the hosting command and tests.
#[derive(Debug, Clone)]
pub enum WatcherEvent {
    /// The runner signaled that its server is listening.
    ServerListening,
    /// A restart cycle began.
    Restart {
        /// Reason tag (event kind or "plugin").
        reason: &'static str,
        /// The file behind the restart, when known.
        file: Option<PathBuf>,
    },
    /// A passthrough line from the runner's stdio.
    RunnerStdio {
        /// Which stream the line came from.
        stream: StdioStream,
        /// The line, without the trailing newline.
        line: String,
    },
}

/// Callback receiving [`WatcherEvent`]s.
pub type EventCallback = Arc<dyn Fn(WatcherEvent) + Send + Sync>;

/// Options for one watch session.
pub struct WatcherOptions {
    /// Initial start script for the runner.
    pub entrypoint_script: String,
    /// Root watched recursively for the core listener.
    pub source_root: PathBuf,
    /// Session working directory; event paths are reported relative to it.
    pub cwd: PathBuf,
    /// Loaded plugins, in registration order. The core dev hooks come first.
    pub plugins: Vec<Arc<dyn DevHooks>>,
    /// Debugger address forwarded to the runner.
    pub inspect_brk: Option<String>,
    /// Program used to execute runner children.
    pub runner_command: RunnerCommand,
    /// Extra ignore patterns applied to the core listener.
    pub extra_ignore_patterns: Vec<String>,
    /// Optional session event callback.
    pub events: Option<EventCallback>,
}

/// Shared restart machinery, reachable from the session loop and the lens.
struct RestartCtx {
    link: Arc<Link>,
    plugins: Vec<Arc<dyn DevHooks>>,
    events: Option<EventCallback>,
    restarting: AtomicBool,
    paused: Arc<AtomicBool>,
}

/// The limited control surface handed to plugin listeners.
///
/// Lets a plugin trigger a restart outside the core listener's triggers, or
/// temporarily suppress the watch while it performs its own multi-file
/// mutation.
#[derive(Clone)]
pub struct WatcherLens {
    ctx: Arc<RestartCtx>,
}

impl WatcherLens {
    /// Requests a restart attributed to the given file.
    pub fn restart(&self, file: PathBuf) {
        request_restart(&self.ctx, RestartTrigger::Plugin { file });
    }

    /// Suppresses watch events until [`WatcherLens::resume`] or the end of
    /// the next restart cycle.
    pub fn pause(&self) {
        self.ctx.paused.store(true, Ordering::SeqCst);
    }

    /// Resumes watch event delivery.
    pub fn resume(&self) {
        self.ctx.paused.store(false, Ordering::SeqCst);
    }
}

/// One watch session.
pub struct Watcher {
    ctx: Arc<RestartCtx>,
    fs: Arc<Mutex<FsWatcher>>,
    events_rx: Option<mpsc::Receiver<FileChangeEvent>>,
    core_matcher: PathMatcher,
    plugin_listeners: Vec<(PathMatcher, Arc<dyn DevHooks>)>,
    lens: WatcherLens,
    stop: Arc<Notify>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

/// Handle used to stop a running session from elsewhere.
#[derive(Clone)]
pub struct WatcherHandle {
    stop: Arc<Notify>,
    done: watch::Receiver<bool>,
}

impl WatcherHandle {
    /// Stops the session: closes the raw watcher, stops the runner, and then
    /// resolves the pending [`Watcher::start`].
    pub async fn stop(mut self) {
        self.stop.notify_one();
        let _ = self.done.wait_for(|done| *done).await;
    }
}

impl Watcher {
    /// Builds a session: compiles listeners, attaches the raw watcher, wires
    /// the runner link, and performs the initial start (a synthetic `init`
    /// restart) before returning.
    pub async fn create(options: WatcherOptions) -> anyhow::Result<Watcher> {
        let mut watch_roots = vec![options.source_root.clone()];
        let mut core_ignore = options.extra_ignore_patterns.clone();
        let mut listener_patterns = Vec::new();
        for plugin in &options.plugins {
            let settings = plugin.watcher_settings();
            for pattern in &settings.watch_file_patterns {
                expand_watch_pattern(&options.cwd, pattern, &mut watch_roots);
            }
            if let Some(app) = settings.listeners.app {
                core_ignore.extend(app.ignore_file_patterns);
            }
            let (allow, deny) = settings
                .listeners
                .plugin
                .map(|p| (p.allow_file_patterns, p.ignore_file_patterns))
                .unwrap_or_default();
            listener_patterns.push((allow, deny));
        }

        let core_matcher = PathMatcher::new(&[], &core_ignore)?;
        let mut plugin_listeners = Vec::new();
        for ((allow, deny), plugin) in listener_patterns.into_iter().zip(&options.plugins) {
            plugin_listeners.push((PathMatcher::new(&allow, &deny)?, Arc::clone(plugin)));
        }

        let (fs, events_rx) = FsWatcher::new(&watch_roots, &options.cwd)?;
        let paused = fs.pause_flag();
        let fs = Arc::new(Mutex::new(fs));

        let fs_for_imports = Arc::clone(&fs);
        let plugins_for_ready = options.plugins.clone();
        let events_for_ready = options.events.clone();
        let events_for_stdio = options.events.clone();
        let callbacks = RunnerCallbacks {
            // Watch every module the user's app imports, wherever it lives.
            on_module_imported: Some(Arc::new(move |path: PathBuf| {
                fs_for_imports.lock().unwrap().watch_silently(&path);
            })),
            on_server_listening: Some(Arc::new(move || {
                for plugin in &plugins_for_ready {
                    plugin.on_after_watcher_restart();
                }
                if let Some(events) = &events_for_ready {
                    events(WatcherEvent::ServerListening);
                }
            })),
            on_stdio: Some(Arc::new(move |stream, line: &str| {
                if let Some(events) = &events_for_stdio {
                    events(WatcherEvent::RunnerStdio {
                        stream,
                        line: line.to_string(),
                    });
                }
            })),
        };

        let link = Arc::new(Link::new(
            RunnerOptions {
                entrypoint_script: options.entrypoint_script,
                inspect_brk: options.inspect_brk,
                command: options.runner_command,
                cwd: options.cwd,
            },
            callbacks,
        ));

        let ctx = Arc::new(RestartCtx {
            link,
            plugins: options.plugins,
            events: options.events,
            restarting: AtomicBool::new(false),
            paused,
        });

        // Initial start, treated as a synthetic init event.
        ctx.restarting.store(true, Ordering::SeqCst);
        run_restart(&ctx, RestartTrigger::Init).await;

        let lens = WatcherLens {
            ctx: Arc::clone(&ctx),
        };
        let (done_tx, done_rx) = watch::channel(false);
        Ok(Watcher {
            ctx,
            fs,
            events_rx: Some(events_rx),
            core_matcher,
            plugin_listeners,
            lens,
            stop: Arc::new(Notify::new()),
            done_tx,
            done_rx,
        })
    }

    /// Handle for stopping the session.
    pub fn handle(&self) -> WatcherHandle {
        WatcherHandle {
            stop: Arc::clone(&self.stop),
            done: self.done_rx.clone(),
        }
    }

    /// Access to the runner supervisor, mainly for inspection.
    pub fn link(&self) -> Arc<Link> {
        Arc::clone(&self.ctx.link)
    }

    /// Runs the session loop until [`WatcherHandle::stop`] is called.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let Some(mut events_rx) = self.events_rx.take() else {
            return Ok(());
        };
        let stop = Arc::clone(&self.stop);
        loop {
            tokio::select! {
                _ = stop.notified() => break,
                event = events_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }

        self.fs.lock().unwrap().close();
        self.ctx.link.stop().await;
        let _ = self.done_tx.send(true);
        Ok(())
    }

    fn handle_event(&self, event: FileChangeEvent) {
        // Mid-restart events are dropped, not queued. The next event after the
        // restart completes picks up the cumulative file system state.
        if self.ctx.restarting.load(Ordering::SeqCst) {
            tracing::trace!(
                kind = event.kind.as_str(),
                path = %event.path.display(),
                "dropping event during restart"
            );
            return;
        }

        let path_str = event.path.to_string_lossy().replace('\\', "/");

        for (matcher, plugin) in &self.plugin_listeners {
            if matcher.matches(&path_str) {
                tracing::trace!(path = %event.path.display(), "plugin listener matched file");
                plugin.on_file_watcher_event(&event, &self.lens);
            } else {
                tracing::trace!(path = %event.path.display(), "plugin listener did not match file");
            }
        }

        if !self.core_matcher.matches(&path_str) {
            tracing::trace!(
                kind = event.kind.as_str(),
                path = %event.path.display(),
                "core listener ignored file"
            );
            return;
        }
        tracing::trace!(
            kind = event.kind.as_str(),
            path = %event.path.display(),
            "core listener matched file"
        );
        request_restart(&self.ctx, RestartTrigger::Fs(event));
    }
}

/// Launches a restart cycle unless one is already in flight, in which case
/// the trigger is dropped.
fn request_restart(ctx: &Arc<RestartCtx>, trigger: RestartTrigger) {
    if ctx.restarting.swap(true, Ordering::SeqCst) {
        tracing::trace!(reason = trigger.reason(), "restart already in progress");
        return;
    }
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        run_restart(&ctx, trigger).await;
    });
}

/// One restart cycle. The caller has already claimed the `restarting` guard.
async fn run_restart(ctx: &RestartCtx, trigger: RestartTrigger) {
    clear_console();
    if !matches!(trigger, RestartTrigger::Init) {
        tracing::info!(reason = trigger.reason(), "restarting");
    }

    for plugin in &ctx.plugins {
        if let Some(patch) = plugin.on_before_watcher_start_or_restart(&trigger) {
            ctx.link.update_options(patch);
        }
    }
    for plugin in &ctx.plugins {
        plugin.on_before_watcher_restart();
    }
    if !matches!(trigger, RestartTrigger::Init) {
        if let Some(events) = &ctx.events {
            events(WatcherEvent::Restart {
                reason: trigger.reason(),
                file: trigger.file().map(Path::to_path_buf),
            });
        }
    }

    // A crashed or unstartable runner never ends the watch session; the next
    // file change simply tries again.
    if let Err(error) = ctx.link.start_or_restart().await {
        tracing::error!(%error, "failed to restart runner");
    }

    ctx.restarting.store(false, Ordering::SeqCst);
    ctx.paused.store(false, Ordering::SeqCst);
}

fn expand_watch_pattern(cwd: &Path, pattern: &str, roots: &mut Vec<PathBuf>) {
    let absolute = if Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        cwd.join(pattern).display().to_string()
    };
    if pattern.contains(['*', '?', '[']) {
        match glob::glob(&absolute) {
            Ok(paths) => roots.extend(paths.filter_map(Result::ok)),
            Err(error) => tracing::warn!(%error, pattern, "invalid plugin watch pattern"),
        }
    } else {
        roots.push(PathBuf::from(absolute));
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn sh() -> RunnerCommand {
        RunnerCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string()],
        }
    }

    fn counting_ctx(script: &str, counter: Arc<AtomicUsize>) -> Arc<RestartCtx> {
        let link = Arc::new(Link::new(
            RunnerOptions {
                entrypoint_script: script.to_string(),
                inspect_brk: None,
                command: sh(),
                cwd: std::env::temp_dir(),
            },
            RunnerCallbacks::default(),
        ));
        Arc::new(RestartCtx {
            link,
            plugins: vec![],
            events: Some(Arc::new(move |event| {
                if matches!(event, WatcherEvent::Restart { .. }) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })),
            restarting: AtomicBool::new(false),
            paused: Arc::new(AtomicBool::new(false)),
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_events_during_restart_are_dropped() {
        let restarts = Arc::new(AtomicUsize::new(0));
        let ctx = counting_ctx("sleep 5", Arc::clone(&restarts));

        let event = || {
            RestartTrigger::Fs(FileChangeEvent {
                kind: ChangeKind::Change,
                path: "src/app.ts".into(),
            })
        };

        request_restart(&ctx, event());
        // Burst arriving while the first restart is still in flight.
        request_restart(&ctx, event());
        request_restart(&ctx, event());

        // Wait for the in-flight restart to finish.
        tokio::time::timeout(Duration::from_secs(5), async {
            while ctx.restarting.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(restarts.load(Ordering::SeqCst), 1);

        // After completion a new trigger restarts again.
        request_restart(&ctx, event());
        tokio::time::timeout(Duration::from_secs(5), async {
            while ctx.restarting.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(restarts.load(Ordering::SeqCst), 2);

        ctx.link.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restart_resumes_a_paused_watch() {
        let ctx = counting_ctx("sleep 5", Arc::new(AtomicUsize::new(0)));
        let lens = WatcherLens {
            ctx: Arc::clone(&ctx),
        };
        lens.pause();
        assert!(ctx.paused.load(Ordering::SeqCst));

        lens.restart("prisma/schema.prisma".into());
        tokio::time::timeout(Duration::from_secs(5), async {
            while ctx.restarting.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert!(!ctx.paused.load(Ordering::SeqCst));

        ctx.link.stop().await;
    }
}
