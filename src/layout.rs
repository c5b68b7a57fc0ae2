// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Project layout collaborator.
//!
//! The layout locates the project root (nearest `package.json`), the source
//! root, the application entrypoint and the list of source modules. The
//! watcher only consumes this surface: it asks for a full rescan when the
//! directory structure changes and a cheap module refresh otherwise.
//!
//! The serialized form travels to reflection children in the spawn handshake,
//! so field names are part of the wire contract.

use crate::error::LayoutError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Entrypoint candidates tried in order when none is given explicitly.
const ENTRYPOINT_CANDIDATES: &[&str] = &["app.ts", "index.ts", "server.ts"];

/// Resolved project layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    /// Absolute path to the project root (directory holding `package.json`).
    pub project_root: PathBuf,
    /// Absolute path to the source root (`src/` when present, else the
    /// project root).
    pub source_root: PathBuf,
    /// Absolute path to the application entrypoint, if one was found.
    pub entrypoint_path: Option<PathBuf>,
    /// Source modules under the source root.
    pub modules: Vec<PathBuf>,
}

impl Layout {
    /// Resolves the layout by scanning upward and downward from `cwd`.
    ///
    /// # Errors
    ///
    /// Fails when no `package.json` exists upward from `cwd`, or when an
    /// explicitly requested entrypoint does not exist.
    pub fn scan(cwd: &Path, entrypoint_override: Option<&Path>) -> Result<Self, LayoutError> {
        let project_root = find_project_root(cwd)?;
        let source_root = if project_root.join("src").is_dir() {
            project_root.join("src")
        } else {
            project_root.clone()
        };

        let entrypoint_path = match entrypoint_override {
            Some(path) => {
                let absolute = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    cwd.join(path)
                };
                if !absolute.is_file() {
                    return Err(LayoutError::EntrypointNotFound(absolute));
                }
                Some(absolute)
            }
            None => ENTRYPOINT_CANDIDATES
                .iter()
                .map(|candidate| source_root.join(candidate))
                .find(|candidate| candidate.is_file()),
        };

        let modules = scan_modules(&source_root)?;

        Ok(Layout {
            project_root,
            source_root,
            entrypoint_path,
            modules,
        })
    }

    /// Re-derives the module list without rescanning the directory structure.
    ///
    /// Used for plain `change` events where roots and entrypoint are known to
    /// be stable.
    pub fn refresh_modules(&mut self) -> Result<(), LayoutError> {
        self.modules = scan_modules(&self.source_root)?;
        Ok(())
    }
}

fn find_project_root(cwd: &Path) -> Result<PathBuf, LayoutError> {
    let mut dir = cwd;
    loop {
        if dir.join("package.json").is_file() {
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return Err(LayoutError::ProjectRootNotFound(cwd.to_path_buf())),
        }
    }
}

fn scan_modules(source_root: &Path) -> Result<Vec<PathBuf>, LayoutError> {
    let pattern = format!("{}/**/*.ts", source_root.display());
    let mut modules: Vec<PathBuf> = glob::glob(&pattern)?
        .filter_map(Result::ok)
        .filter(|path| {
            !path
                .components()
                .any(|component| component.as_os_str() == "node_modules")
        })
        .collect();
    modules.sort();
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup_project(dir: &Path) {
        fs::write(dir.join("package.json"), "{\"name\": \"demo\"}").unwrap();
        fs::create_dir_all(dir.join("src/graphql")).unwrap();
        fs::write(dir.join("src/app.ts"), "// app").unwrap();
        fs::write(dir.join("src/graphql/User.ts"), "// user").unwrap();
    }

    #[test]
    fn test_scan_finds_root_entrypoint_and_modules() {
        let dir = tempfile::tempdir().unwrap();
        setup_project(dir.path());

        let layout = Layout::scan(dir.path(), None).unwrap();
        assert_eq!(layout.project_root, dir.path());
        assert_eq!(layout.source_root, dir.path().join("src"));
        assert_eq!(layout.entrypoint_path, Some(dir.path().join("src/app.ts")));
        assert_eq!(layout.modules.len(), 2);
    }

    #[test]
    fn test_scan_from_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        setup_project(dir.path());

        let layout = Layout::scan(&dir.path().join("src/graphql"), None).unwrap();
        assert_eq!(layout.project_root, dir.path());
    }

    #[test]
    fn test_missing_package_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // Note: assumes no package.json in the temp dir's ancestors.
        assert!(matches!(
            Layout::scan(dir.path(), None),
            Err(LayoutError::ProjectRootNotFound(_))
        ));
    }

    #[test]
    fn test_explicit_entrypoint_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        setup_project(dir.path());

        let missing = dir.path().join("src/missing.ts");
        assert!(matches!(
            Layout::scan(dir.path(), Some(&missing)),
            Err(LayoutError::EntrypointNotFound(_))
        ));
    }

    #[test]
    fn test_refresh_modules_picks_up_new_files() {
        let dir = tempfile::tempdir().unwrap();
        setup_project(dir.path());

        let mut layout = Layout::scan(dir.path(), None).unwrap();
        fs::write(dir.path().join("src/extra.ts"), "// extra").unwrap();
        layout.refresh_modules().unwrap();
        assert!(layout
            .modules
            .contains(&dir.path().join("src/extra.ts")));
    }

    #[test]
    fn test_serializes_with_camel_case_field_names() {
        let layout = Layout {
            project_root: PathBuf::from("/p"),
            source_root: PathBuf::from("/p/src"),
            entrypoint_path: None,
            modules: vec![],
        };
        let json = serde_json::to_value(&layout).unwrap();
        assert!(json.get("projectRoot").is_some());
        assert!(json.get("sourceRoot").is_some());
        assert!(json.get("entrypointPath").is_some());
    }
}
