// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Allow/deny path matching for watch listeners.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Compiled allow/deny matcher over posix-style relative paths.
///
/// A path matches when it matches any allow pattern (an empty allow list
/// matches everything) and no deny pattern. Deny takes precedence. Patterns
/// use shell-glob semantics; `*` does not cross path separators.
pub struct PathMatcher {
    allow: Option<GlobSet>,
    deny: GlobSet,
}

impl PathMatcher {
    /// Compiles the given pattern lists.
    pub fn new(allow: &[String], deny: &[String]) -> Result<Self, globset::Error> {
        let allow = if allow.is_empty() {
            None
        } else {
            Some(build_set(allow)?)
        };
        Ok(Self {
            allow,
            deny: build_set(deny)?,
        })
    }

    /// True when the path is relevant to this listener.
    pub fn matches(&self, path: &str) -> bool {
        if self.deny.is_match(path) {
            return false;
        }
        match &self.allow {
            None => true,
            Some(allow) => allow.is_match(path),
        }
    }
}

fn build_set(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()?,
        );
    }
    builder.build()
}
