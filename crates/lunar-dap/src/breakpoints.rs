//! Breakpoint bookkeeping, keyed by canonical source key.
//!
//! The line hook fires for every executed line, so the index keeps a union
//! set of all breakpoint lines across all sources: `has(line)` rejects the
//! common no-hit case without touching the frame's source string.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use lunar_vm::LuaVm;

#[derive(Clone, Debug)]
pub struct Breakpoint {
    pub line: u32,
    pub condition: Option<String>,
}

#[derive(Debug, Default)]
pub struct BreakpointIndex {
    sources: HashMap<PathBuf, BTreeMap<u32, Breakpoint>>,
    lines: HashSet<u32>,
}

impl BreakpointIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all breakpoints of one source. `setBreakpoints` has replace
    /// semantics: clear first, then insert the new set.
    pub fn clear(&mut self, key: &Path) {
        if self.sources.remove(key).is_some() {
            self.rebuild_lines();
        }
    }

    pub fn insert(&mut self, key: PathBuf, line: u32, condition: Option<String>) {
        self.sources
            .entry(key)
            .or_default()
            .insert(line, Breakpoint { line, condition });
        self.lines.insert(line);
    }

    /// Fast reject test for the line hook: false means no source can have a
    /// breakpoint on this line.
    pub fn has(&self, line: u32) -> bool {
        self.lines.contains(&line)
    }

    pub fn source(&self, key: &Path) -> Option<&BTreeMap<u32, Breakpoint>> {
        self.sources.get(key)
    }

    /// Whether the breakpoint at `(key, line)` fires in the current frame.
    ///
    /// A condition is evaluated in the stopped frame; a truthy result fires.
    /// An evaluation error also fires: a paused debugger is preferred to a
    /// silently missed breakpoint.
    pub fn fires<V: LuaVm>(&self, vm: &mut V, key: &Path, line: u32, depth: u32) -> bool {
        let Some(breakpoint) = self.sources.get(key).and_then(|lines| lines.get(&line)) else {
            return false;
        };
        let Some(condition) = &breakpoint.condition else {
            return true;
        };
        match vm.eval_in_frame(depth, &format!("return {condition}")) {
            Ok(values) => values.first().is_some_and(|v| v.is_truthy()),
            Err(_) => true,
        }
    }

    fn rebuild_lines(&mut self) {
        self.lines = self
            .sources
            .values()
            .flat_map(|lines| lines.keys().copied())
            .collect();
    }
}
