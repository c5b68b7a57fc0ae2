// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Raw file system event source.
//!
//! Wraps the debounced notify watcher and bridges its callback thread into a
//! tokio channel of classified [`FileChangeEvent`]s. Hidden files and
//! `node_modules` are ignored at this layer. The watcher can be paused
//! (events are dropped, not queued) and extended with silent single-path
//! additions for modules imported from outside the source root.

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Debounce window for raw events.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(200);

/// Classified file change kinds, matching the event set listeners react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Synthetic event fired for the initial start.
    Init,
    /// A file appeared.
    Add,
    /// A directory appeared.
    AddDir,
    /// A file's contents changed.
    Change,
    /// A file disappeared.
    Unlink,
    /// A directory disappeared.
    UnlinkDir,
}

impl ChangeKind {
    /// True for events that may have changed the directory structure and so
    /// require a full layout rescan.
    pub fn is_structural(&self) -> bool {
        !matches!(self, ChangeKind::Change)
    }

    /// Wire/display name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Init => "init",
            ChangeKind::Add => "add",
            ChangeKind::AddDir => "addDir",
            ChangeKind::Change => "change",
            ChangeKind::Unlink => "unlink",
            ChangeKind::UnlinkDir => "unlinkDir",
        }
    }
}

/// One classified file system event. Paths are relative to the session cwd
/// when possible.
#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    /// What happened.
    pub kind: ChangeKind,
    /// The affected path.
    pub path: PathBuf,
}

/// Debounced recursive watcher feeding a channel of classified events.
pub struct FsWatcher {
    debouncer: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
    paused: Arc<AtomicBool>,
}

impl FsWatcher {
    /// Starts watching the given roots recursively.
    ///
    /// Returns the watcher handle and the event receiver. Roots that do not
    /// exist are skipped with a warning; plugin-contributed glob roots are
    /// expanded by the caller before reaching this layer.
    pub fn new(
        roots: &[PathBuf],
        cwd: &Path,
    ) -> anyhow::Result<(Self, mpsc::Receiver<FileChangeEvent>)> {
        let (tx, rx) = mpsc::channel(256);
        let paused = Arc::new(AtomicBool::new(false));

        let paused_flag = Arc::clone(&paused);
        let cwd = cwd.to_path_buf();
        let mut debouncer = new_debouncer(
            DEBOUNCE_WINDOW,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    if paused_flag.load(Ordering::SeqCst) {
                        return;
                    }
                    for event in events {
                        let Some(kind) = classify(&event.event.kind) else {
                            continue;
                        };
                        for path in &event.event.paths {
                            // Ignore rules apply to the cwd-relative path, so
                            // hidden ancestors of the project itself (a cwd
                            // under ~/.local, say) do not swallow everything.
                            let path = path.strip_prefix(&cwd).unwrap_or(path);
                            if is_ignored(path) {
                                continue;
                            }
                            let _ = tx.blocking_send(FileChangeEvent {
                                kind,
                                path: path.to_path_buf(),
                            });
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::error!(%error, "file watcher encountered an error");
                    }
                }
            },
        )?;

        for root in roots {
            if !root.exists() {
                tracing::warn!(root = %root.display(), "watch root does not exist, skipping");
                continue;
            }
            debouncer.watch(root, RecursiveMode::Recursive)?;
        }

        Ok((
            Self {
                debouncer: Some(debouncer),
                paused,
            },
            rx,
        ))
    }

    /// Adds a single path to the watch set without restarting anything.
    ///
    /// Used for modules the runner imported from outside the declared source
    /// root; later changes to them flow through the normal listeners.
    pub fn watch_silently(&mut self, path: &Path) {
        if let Some(debouncer) = &mut self.debouncer {
            if let Err(error) = debouncer.watch(path, RecursiveMode::NonRecursive) {
                tracing::trace!(%error, path = %path.display(), "could not extend watch set");
            }
        }
    }

    /// Suppresses event delivery until [`FsWatcher::resume`].
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resumes event delivery.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Shared pause flag, used by the lens and the restart cycle.
    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }

    /// Stops the underlying watcher. Further events are not delivered.
    pub fn close(&mut self) {
        self.debouncer.take();
    }
}

fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(CreateKind::Folder) => Some(ChangeKind::AddDir),
        EventKind::Create(_) => Some(ChangeKind::Add),
        EventKind::Remove(RemoveKind::Folder) => Some(ChangeKind::UnlinkDir),
        EventKind::Remove(_) => Some(ChangeKind::Unlink),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::Unlink),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::Add),
        EventKind::Modify(_) => Some(ChangeKind::Change),
        EventKind::Any | EventKind::Other => Some(ChangeKind::Change),
        EventKind::Access(_) => None,
    }
}

fn is_ignored(path: &Path) -> bool {
    path.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        name == "node_modules" || (name.starts_with('.') && name.len() > 1 && name != "..")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn test_classify_kinds() {
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File)),
            Some(ChangeKind::Add)
        );
        assert_eq!(
            classify(&EventKind::Create(CreateKind::Folder)),
            Some(ChangeKind::AddDir)
        );
        assert_eq!(
            classify(&EventKind::Remove(RemoveKind::File)),
            Some(ChangeKind::Unlink)
        );
        assert_eq!(classify(&EventKind::Access(notify::event::AccessKind::Read)), None);
    }

    #[test]
    fn test_ignores_hidden_and_node_modules() {
        assert!(is_ignored(Path::new("node_modules/pkg/index.js")));
        assert!(is_ignored(Path::new("src/.cache/x")));
        assert!(is_ignored(Path::new(".git/HEAD")));
        assert!(!is_ignored(Path::new("src/app.ts")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hidden_ancestor_of_cwd_is_not_ignored() {
        let dir = tempfile::tempdir().unwrap();
        // The project itself lives under a hidden directory; only components
        // below the cwd count for the ignore rules.
        let root = dir.path().join(".config/app");
        fs::create_dir_all(&root).unwrap();
        let (_watcher, mut rx) = FsWatcher::new(&[root.clone()], &root).unwrap();

        fs::write(root.join("a.ts"), "x").unwrap();
        let event = tokio::time::timeout(Duration::from_secs(8), rx.recv())
            .await
            .expect("no event for file under hidden ancestor")
            .unwrap();
        assert_eq!(event.path, PathBuf::from("a.ts"));

        // Hidden components below the cwd are still ignored.
        fs::create_dir_all(root.join(".cache")).unwrap();
        while rx.try_recv().is_ok() {}
        fs::write(root.join(".cache/b.ts"), "x").unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_events_flow_and_pause_suppresses() {
        let dir = tempfile::tempdir().unwrap();
        let (watcher, mut rx) = FsWatcher::new(&[dir.path().to_path_buf()], dir.path()).unwrap();

        fs::write(dir.path().join("a.ts"), "x").unwrap();
        let event = tokio::time::timeout(Duration::from_secs(8), rx.recv())
            .await
            .expect("no event for file creation")
            .unwrap();
        assert_eq!(event.path, PathBuf::from("a.ts"));

        // Drain stragglers from the first write, then pause.
        while rx.try_recv().is_ok() {}
        watcher.pause();
        fs::write(dir.path().join("b.ts"), "x").unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(rx.try_recv().is_err());

        watcher.resume();
    }
}
