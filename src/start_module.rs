// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Generated start scripts for the runner and reflection children.
//!
//! The runner does not execute the user's entrypoint directly: it evaluates a
//! small generated script that installs the IPC harness (frame emission,
//! module-import tracing, server-readiness signaling) and then loads the
//! entrypoint. The reflection child evaluates a different script that reads
//! the spawn handshake from stdin and hands it to the framework runtime's
//! reflection entrypoint.

use crate::ipc::FRAME_PREFIX;
use crate::layout::Layout;

/// npm package providing the framework runtime inside the child.
const RUNTIME_PACKAGE: &str = "girder";

/// Shared JS prelude: frame emission and import tracing.
fn harness(layout: &Layout) -> String {
    format!(
        r#"'use strict';
const __girderEmit = (message) => {{
  process.stdout.write({prefix:?} + JSON.stringify(message) + '\\n');
}};
const __girderRoot = {root};
const Module = require('module');
const __girderLoad = Module._load;
Module._load = function (request, parent, isMain) {{
  const exported = __girderLoad.apply(this, arguments);
  try {{
    const file = Module._resolveFilename(request, parent, isMain);
    if (file.startsWith(__girderRoot) && !file.includes('node_modules')) {{
      __girderEmit({{ type: 'module-imported', data: {{ filePath: file }} }});
    }}
  }} catch (_) {{}}
  return exported;
}};
const __girderNet = require('net');
const __girderListen = __girderNet.Server.prototype.listen;
__girderNet.Server.prototype.listen = function (...args) {{
  this.once('listening', () => __girderEmit({{ type: 'server-listening' }}));
  return __girderListen.apply(this, args);
}};
globalThis.__girder = {{ emit: __girderEmit }};
"#,
        prefix = FRAME_PREFIX,
        root = js_string(&layout.project_root.display().to_string()),
    )
}

/// Builds the runner's start script.
///
/// In reflection-only mode the script is empty so the user's app never runs
/// (and never binds a port); the watch loop and reflection passes continue
/// regardless.
pub fn dev_script(layout: &Layout, reflection_mode: bool) -> String {
    if reflection_mode {
        return String::new();
    }
    let entrypoint = match &layout.entrypoint_path {
        Some(path) => js_string(&path.display().to_string()),
        None => return String::new(),
    };
    format!("{}require({});\n", harness(layout), entrypoint)
}

/// Builds the reflection child's script for the given stage.
///
/// The script reads one handshake line from stdin (stage + serialized
/// layout), forwards it to the runtime's reflection entrypoint and reports
/// any initialization throw as a `runtime-error` frame.
pub fn reflection_script(layout: &Layout) -> String {
    format!(
        r#"{harness}(async () => {{
  const chunks = [];
  for await (const chunk of process.stdin) chunks.push(chunk);
  const handshake = JSON.parse(Buffer.concat(chunks).toString());
  const runtime = require({runtime});
  try {{
    await runtime.reflect(handshake, __girderEmit);
  }} catch (err) {{
    __girderEmit({{
      type: 'runtime-error',
      data: {{ serializedError: {{ name: err.name, message: err.message, stack: err.stack, ...err }} }},
    }});
    process.exit(1);
  }}
}})();
"#,
        harness = harness(layout),
        runtime = js_string(RUNTIME_PACKAGE),
    )
}

/// Quotes a string as a JS string literal.
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn layout() -> Layout {
        Layout {
            project_root: PathBuf::from("/p"),
            source_root: PathBuf::from("/p/src"),
            entrypoint_path: Some(PathBuf::from("/p/src/app.ts")),
            modules: vec![],
        }
    }

    #[test]
    fn test_reflection_mode_yields_empty_script() {
        assert_eq!(dev_script(&layout(), true), "");
    }

    #[test]
    fn test_dev_script_requires_the_entrypoint() {
        let script = dev_script(&layout(), false);
        assert!(script.contains(r#"require("/p/src/app.ts");"#));
        assert!(script.contains(FRAME_PREFIX));
    }

    #[test]
    fn test_missing_entrypoint_yields_empty_script() {
        let mut layout = layout();
        layout.entrypoint_path = None;
        assert_eq!(dev_script(&layout, false), "");
    }

    #[test]
    fn test_reflection_script_reads_handshake() {
        let script = reflection_script(&layout());
        assert!(script.contains("process.stdin"));
        assert!(script.contains("runtime-error"));
    }
}
