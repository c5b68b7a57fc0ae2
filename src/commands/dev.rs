// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Watch-mode development command.
//!
//! Wires the collaborators together for one session: resolves the project
//! layout, discovers plugins through an initial reflection pass, builds the
//! hook set (the core hooks first, then one per discovered plugin) and runs
//! the watch loop until interrupted.
//!
//! The core hooks own the session's layout: structural file events trigger a
//! full rescan, plain content changes a cheap module refresh, and every
//! restart regenerates the runner's start script from the latest layout and
//! schedules a coalesced type-artifact reflection pass.

use crate::config::{Config, RunnerCommand};
use crate::ipc::Stage;
use crate::layout::Layout;
use crate::plugin::{DevHooks, ManifestHooks, WatcherSettings};
use crate::reflection::{self, FailureKind, ReflectionResult};
use crate::runner::RunnerPatch;
use crate::start_module;
use crate::util::Debounced;
use crate::watcher::{
    FileChangeEvent, RestartTrigger, Watcher, WatcherEvent, WatcherLens, WatcherOptions,
};
use console::style;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Runs the dev session until interrupted.
///
/// With `reflection_mode` the runner's start script is empty: the app server
/// never binds, while the watch loop and reflection passes keep running.
pub async fn run(
    entrypoint: Option<PathBuf>,
    reflection_mode: bool,
    inspect_brk: Option<String>,
) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let layout = Layout::scan(&cwd, entrypoint.as_deref())?;
    let config = Config::load(&layout.project_root)?;

    println!(
        "{} {}",
        style("Project:").cyan(),
        style(layout.project_root.display()).dim()
    );
    match &layout.entrypoint_path {
        Some(path) => println!(
            "{} {}",
            style("Entrypoint:").cyan(),
            style(path.display()).dim()
        ),
        None => println!(
            "{} {}",
            style("Entrypoint:").cyan(),
            style("none found").yellow()
        ),
    }
    if reflection_mode {
        println!(
            "{} {}",
            style("Mode:").cyan(),
            style("reflection only, the app server will not start").dim()
        );
    }
    println!();

    // A project whose initialization cannot even be introspected has nothing
    // to watch against; this is the one reflection failure that is fatal.
    let plugins = match reflection::reflect(&layout, Stage::Plugin, &config.runner).await {
        ReflectionResult::Plugins(manifests) => manifests,
        ReflectionResult::Failed { error, .. } => {
            anyhow::bail!("plugin discovery failed: {}", error)
        }
        ReflectionResult::Artifacts => {
            tracing::warn!("plugin discovery reported a typegen result; assuming no plugins");
            Vec::new()
        }
    };
    for manifest in &plugins {
        tracing::debug!(name = %manifest.name, version = ?manifest.version, "discovered plugin");
    }

    let core = CoreHooks::new(
        layout,
        entrypoint,
        cwd,
        config.runner.clone(),
        reflection_mode,
    );
    let session_layout = core.layout();
    let entrypoint_script = start_module::dev_script(&session_layout, reflection_mode);

    let mut hooks: Vec<Arc<dyn DevHooks>> = vec![Arc::new(core)];
    hooks.extend(plugins.into_iter().map(ManifestHooks::new));
    for hook in &hooks {
        hook.on_start();
    }

    let mut watcher = Watcher::create(WatcherOptions {
        entrypoint_script,
        source_root: session_layout.source_root,
        cwd: session_layout.project_root,
        plugins: hooks,
        inspect_brk,
        runner_command: config.runner,
        extra_ignore_patterns: config.watch.ignore,
        events: Some(Arc::new(|event| match event {
            WatcherEvent::Restart { reason, file } => {
                let file = file
                    .map(|f| f.display().to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{} {} {}",
                    style("Restart:").cyan(),
                    style(&file).dim(),
                    style(format!("({})", reason)).dim()
                );
            }
            WatcherEvent::ServerListening => {
                println!("{} {}", style("✓").green(), style("server listening").dim());
            }
            WatcherEvent::RunnerStdio { .. } => {}
        })),
    })
    .await?;

    let handle = watcher.handle();
    let session = tokio::spawn(async move { watcher.start().await });

    tokio::select! {
        result = session => result??,
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("{}", style("Shutting down...").dim());
            handle.stop().await;
        }
    }
    Ok(())
}

/// The framework's own dev hooks, always registered first.
pub struct CoreHooks {
    state: Arc<Mutex<Layout>>,
    typegen: Debounced<Layout, ReflectionResult>,
    entrypoint_override: Option<PathBuf>,
    scan_root: PathBuf,
    reflection_mode: bool,
}

impl CoreHooks {
    /// Builds the core hooks around a freshly scanned layout.
    pub fn new(
        layout: Layout,
        entrypoint_override: Option<PathBuf>,
        scan_root: PathBuf,
        runner_command: RunnerCommand,
        reflection_mode: bool,
    ) -> Self {
        let typegen = Debounced::new(move |layout: Layout| {
            let command = runner_command.clone();
            async move {
                let result = reflection::reflect(&layout, Stage::Typegen, &command).await;
                report_reflection(&result, reflection_mode);
                Ok(result)
            }
        });
        Self {
            state: Arc::new(Mutex::new(layout)),
            typegen,
            entrypoint_override,
            scan_root,
            reflection_mode,
        }
    }

    /// Snapshot of the current layout.
    pub fn layout(&self) -> Layout {
        self.state.lock().unwrap().clone()
    }

    /// Updates the layout for a file event. Structural events can move roots
    /// or the entrypoint and need a full rescan; content changes only require
    /// refreshing the module list. A failed rescan keeps the previous layout
    /// rather than ending the session.
    fn rescan_for(&self, event: &FileChangeEvent) {
        let mut state = self.state.lock().unwrap();
        if event.kind.is_structural() {
            match Layout::scan(&self.scan_root, self.entrypoint_override.as_deref()) {
                Ok(layout) => *state = layout,
                Err(error) => {
                    tracing::error!(%error, "layout rescan failed, keeping previous layout")
                }
            }
        } else if let Err(error) = state.refresh_modules() {
            tracing::error!(%error, "module refresh failed, keeping previous module list");
        }
    }
}

impl DevHooks for CoreHooks {
    fn watcher_settings(&self) -> WatcherSettings {
        // No allow patterns: the core hooks see every watched file.
        WatcherSettings::default()
    }

    fn on_file_watcher_event(&self, event: &FileChangeEvent, _lens: &WatcherLens) {
        self.rescan_for(event);
    }

    fn on_before_watcher_start_or_restart(&self, _change: &RestartTrigger) -> Option<RunnerPatch> {
        let layout = self.layout();

        // Coalesced: at most one typegen pass in flight, one follow-up after.
        let typegen = self.typegen.clone();
        let typegen_layout = layout.clone();
        tokio::spawn(async move {
            let _ = typegen.call(typegen_layout).await;
        });

        Some(RunnerPatch {
            entrypoint_script: Some(start_module::dev_script(&layout, self.reflection_mode)),
        })
    }
}

fn report_reflection(result: &ReflectionResult, reflection_mode: bool) {
    match result {
        ReflectionResult::Artifacts => {
            tracing::debug!("type artifacts regenerated");
        }
        ReflectionResult::Plugins(_) => {}
        ReflectionResult::Failed {
            kind: FailureKind::Ts,
            error,
        } => {
            // Compile diagnostics are actionable and always surfaced.
            eprintln!("{} {}", style("✗").red(), style(error).red());
        }
        ReflectionResult::Failed {
            kind: FailureKind::Runtime,
            error,
        } => {
            // The runner raises the same exception with a better stack; only
            // reflection-only sessions would otherwise never see it.
            if reflection_mode {
                eprintln!("{} {}", style("✗").red(), style(error).red());
            } else {
                tracing::debug!(%error, "suppressed reflection runtime error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::ChangeKind;
    use std::fs;

    fn setup_project(dir: &std::path::Path) {
        fs::write(dir.join("package.json"), "{\"name\": \"demo\"}").unwrap();
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("src/app.ts"), "// app").unwrap();
    }

    fn core(dir: &std::path::Path, reflection_mode: bool) -> CoreHooks {
        let layout = Layout::scan(dir, None).unwrap();
        CoreHooks::new(
            layout,
            None,
            dir.to_path_buf(),
            RunnerCommand::default(),
            reflection_mode,
        )
    }

    #[tokio::test]
    async fn test_structural_event_rescans_the_layout() {
        let dir = tempfile::tempdir().unwrap();
        setup_project(dir.path());
        let hooks = core(dir.path(), false);

        assert_eq!(hooks.layout().modules.len(), 1);
        fs::write(dir.path().join("src/extra.ts"), "// extra").unwrap();
        hooks_on_event(
            &hooks,
            &FileChangeEvent {
                kind: ChangeKind::Add,
                path: "src/extra.ts".into(),
            },
        );
        assert_eq!(hooks.layout().modules.len(), 2);
    }

    #[tokio::test]
    async fn test_change_event_refreshes_modules_only() {
        let dir = tempfile::tempdir().unwrap();
        setup_project(dir.path());
        let hooks = core(dir.path(), false);

        fs::write(dir.path().join("src/extra.ts"), "// extra").unwrap();
        hooks_on_event(
            &hooks,
            &FileChangeEvent {
                kind: ChangeKind::Change,
                path: "src/app.ts".into(),
            },
        );
        // refresh_modules also picks up the new file; roots are untouched.
        assert_eq!(hooks.layout().modules.len(), 2);
        assert_eq!(hooks.layout().source_root, dir.path().join("src"));
    }

    #[tokio::test]
    async fn test_restart_patch_regenerates_the_script() {
        let dir = tempfile::tempdir().unwrap();
        setup_project(dir.path());
        let hooks = core(dir.path(), false);

        let patch = hooks
            .on_before_watcher_start_or_restart(&RestartTrigger::Init)
            .expect("core hooks always patch the script");
        let script = patch.entrypoint_script.unwrap();
        assert!(script.contains("app.ts"));
    }

    #[tokio::test]
    async fn test_reflection_mode_patches_an_empty_script() {
        let dir = tempfile::tempdir().unwrap();
        setup_project(dir.path());
        let hooks = core(dir.path(), true);

        let patch = hooks
            .on_before_watcher_start_or_restart(&RestartTrigger::Init)
            .unwrap();
        assert_eq!(patch.entrypoint_script.unwrap(), "");
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_reflection_mode_still_runs_typegen_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        setup_project(dir.path());

        // The reflection child records its invocation; the generated script
        // lands in `$0` and is ignored by `sh -c`.
        let marker = dir.path().join("reflection-ran");
        let layout = Layout::scan(dir.path(), None).unwrap();
        let hooks = CoreHooks::new(
            layout,
            None,
            dir.path().to_path_buf(),
            RunnerCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), format!("touch {}", marker.display())],
            },
            true,
        );

        let patch = hooks
            .on_before_watcher_start_or_restart(&RestartTrigger::Init)
            .unwrap();
        // The runner gets no script, yet the typegen pass is launched.
        assert_eq!(patch.entrypoint_script.unwrap(), "");

        tokio::time::timeout(std::time::Duration::from_secs(8), async {
            while !marker.exists() {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("reflection child never ran in reflection-only mode");
    }

    // Drives the event path without standing up a full watch session.
    fn hooks_on_event(hooks: &CoreHooks, event: &FileChangeEvent) {
        hooks.rescan_for(event);
    }
}
