// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Plugin manifests and worktime dev hooks.
//!
//! Plugins are discovered by the plugin reflection stage and participate in
//! the watch session two ways: declaratively, by contributing watch and
//! ignore patterns through [`WatcherSettings`], and imperatively, through the
//! [`DevHooks`] lifecycle trait. Every hook has a default no-op body, so an
//! implementation only overrides what it supports.

use crate::runner::RunnerPatch;
use crate::watcher::{FileChangeEvent, RestartTrigger, WatcherLens};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Ignore patterns a plugin applies to the core app listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppListenerSettings {
    /// Files the core listener should not react to.
    pub ignore_file_patterns: Vec<String>,
}

/// Allow/ignore patterns for a plugin's own listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginListenerSettings {
    /// Files the plugin listener reacts to (empty = all watched files).
    pub allow_file_patterns: Vec<String>,
    /// Files the plugin listener ignores. Ignore wins over allow.
    pub ignore_file_patterns: Vec<String>,
}

/// Per-listener pattern settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ListenerSettings {
    /// Settings applied to the core app listener.
    pub app: Option<AppListenerSettings>,
    /// Settings applied to the plugin's own listener.
    pub plugin: Option<PluginListenerSettings>,
}

/// A plugin's declarative contribution to the watch session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WatcherSettings {
    /// Extra paths/globs to watch beyond the source root.
    pub watch_file_patterns: Vec<String>,
    /// Listener pattern settings.
    pub listeners: ListenerSettings,
}

/// Manifest describing one discovered plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginManifest {
    /// Plugin package name.
    pub name: String,
    /// Plugin version, when reported.
    pub version: Option<String>,
    /// The plugin's watcher contribution.
    pub watcher_settings: WatcherSettings,
}

/// Worktime lifecycle hooks a plugin can implement.
///
/// The listener set is fixed for one watch session: hooks are collected at
/// session start and never change afterwards.
pub trait DevHooks: Send + Sync {
    /// The plugin's declarative watcher contribution.
    fn watcher_settings(&self) -> WatcherSettings {
        WatcherSettings::default()
    }

    /// Called once before the watch session starts.
    fn on_start(&self) {}

    /// Called for every raw event matched by this plugin's listener patterns.
    ///
    /// The lens lets the plugin trigger a restart itself or suppress the
    /// watch while it performs a multi-file mutation.
    fn on_file_watcher_event(&self, _event: &FileChangeEvent, _lens: &WatcherLens) {}

    /// Called before every runner start or restart, in registration order.
    ///
    /// Returning a patch updates the options used for the upcoming start.
    fn on_before_watcher_start_or_restart(&self, _change: &RestartTrigger) -> Option<RunnerPatch> {
        None
    }

    /// Called just before the runner is told to restart.
    fn on_before_watcher_restart(&self) {}

    /// Called after a restarted runner has signaled readiness.
    fn on_after_watcher_restart(&self) {}
}

/// [`DevHooks`] backed by a discovered manifest.
///
/// Manifest plugins only contribute declarative watcher settings; every
/// imperative hook keeps its default body.
pub struct ManifestHooks {
    manifest: PluginManifest,
}

impl ManifestHooks {
    /// Wraps a manifest.
    pub fn new(manifest: PluginManifest) -> Arc<dyn DevHooks> {
        Arc::new(Self { manifest })
    }
}

impl DevHooks for ManifestHooks {
    fn watcher_settings(&self) -> WatcherSettings {
        self.manifest.watcher_settings.clone()
    }
}
