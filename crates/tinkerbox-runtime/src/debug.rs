//! Breakpoint table and debug hook installation.
//!
//! A computer's breakpoints are kept in id order. While at least one exists,
//! a hook with every event mask and a large instruction count is installed on
//! both the calling context and the main coroutine; the count keeps the hook
//! firing now and then even on code without a matching line, so a forced
//! interrupt can still be delivered.

use crate::script::{
    Hook, HookControl, HookTarget, HOOK_CALL, HOOK_COUNT, HOOK_ERROR, HOOK_LINE, HOOK_RESUME,
    HOOK_RETURN, HOOK_YIELD,
};
use std::collections::BTreeMap;

/// Instructions between forced hook firings
pub const BREAKPOINT_HOOK_COUNT: u32 = 1_000_000;

/// Hook installed while any breakpoint exists
pub const BREAKPOINT_HOOK: Hook = Hook {
    mask: HOOK_COUNT | HOOK_LINE | HOOK_RETURN | HOOK_CALL | HOOK_ERROR | HOOK_RESUME | HOOK_YIELD,
    count: BREAKPOINT_HOOK_COUNT,
};

/// A source location to stop at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// Normalized chunk name (`@/path/to/file`)
    pub source: String,
    /// Line number
    pub line: i64,
}

/// Breakpoints of one computer, keyed by id
#[derive(Debug, Default)]
pub struct BreakpointTable {
    entries: BTreeMap<u32, Breakpoint>,
    has_breakpoints: bool,
    force_check_timeout: bool,
}

impl BreakpointTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a breakpoint at `path:line` and install the hook.
    ///
    /// The id is one more than the largest id in the table, so ids start
    /// over at 1 once every breakpoint has been cleared.
    pub fn set(&mut self, path: &str, line: i64, hooks: &mut dyn HookControl) -> u32 {
        let id = self.entries.keys().next_back().map_or(1, |max| max + 1);
        self.entries.insert(
            id,
            Breakpoint {
                source: source_reference(path),
                line,
            },
        );
        if !self.has_breakpoints {
            self.force_check_timeout = true;
        }
        self.has_breakpoints = true;
        hooks.set_hook(HookTarget::Main, Some(BREAKPOINT_HOOK));
        hooks.set_hook(HookTarget::Current, Some(BREAKPOINT_HOOK));
        id
    }

    /// Remove a breakpoint. Removing the last one uninstalls the hook.
    pub fn clear(&mut self, id: u32, hooks: &mut dyn HookControl) -> bool {
        if self.entries.remove(&id).is_none() {
            return false;
        }
        if self.entries.is_empty() {
            self.has_breakpoints = false;
            hooks.set_hook(HookTarget::Main, None);
            hooks.set_hook(HookTarget::Current, None);
        }
        true
    }

    /// Look up a breakpoint
    pub fn get(&self, id: u32) -> Option<&Breakpoint> {
        self.entries.get(&id)
    }

    /// Is there a breakpoint at this location?
    pub fn matches(&self, source: &str, line: i64) -> Option<u32> {
        self.entries
            .iter()
            .find(|(_, bp)| bp.line == line && bp.source == source)
            .map(|(id, _)| *id)
    }

    /// Iterate in id order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Breakpoint)> {
        self.entries.iter().map(|(id, bp)| (*id, bp))
    }

    /// Number of breakpoints
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Is the breakpoint hook currently wanted?
    pub fn has_breakpoints(&self) -> bool {
        self.has_breakpoints
    }

    /// Consume the "check the abort timeout on the next hook" flag raised
    /// when the first breakpoint is set
    pub fn take_force_check_timeout(&mut self) -> bool {
        std::mem::take(&mut self.force_check_timeout)
    }
}

/// Normalize a computer path into the chunk name the interpreter reports:
/// `@/` followed by the path with `.`, `..` and repeated separators removed.
pub fn source_reference(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("@/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    #[derive(Default)]
    struct Hooks {
        installed: FxHashMap<HookTarget, Hook>,
        calls: usize,
    }

    impl HookControl for Hooks {
        fn set_hook(&mut self, target: HookTarget, hook: Option<Hook>) {
            self.calls += 1;
            match hook {
                Some(hook) => {
                    self.installed.insert(target, hook);
                }
                None => {
                    self.installed.remove(&target);
                }
            }
        }
    }

    #[test]
    fn test_ids_are_max_plus_one() {
        let mut hooks = Hooks::default();
        let mut table = BreakpointTable::new();

        assert_eq!(table.set("startup.lua", 1, &mut hooks), 1);
        assert_eq!(table.set("startup.lua", 2, &mut hooks), 2);
        assert_eq!(table.set("startup.lua", 3, &mut hooks), 3);

        // Clearing a middle id does not free it for reuse
        assert!(table.clear(2, &mut hooks));
        assert_eq!(table.set("startup.lua", 4, &mut hooks), 4);

        // Clearing the max lets the next id drop back
        assert!(table.clear(4, &mut hooks));
        assert_eq!(table.set("startup.lua", 5, &mut hooks), 4);
    }

    #[test]
    fn test_ids_restart_after_full_clear() {
        let mut hooks = Hooks::default();
        let mut table = BreakpointTable::new();

        let a = table.set("a", 1, &mut hooks);
        let b = table.set("b", 1, &mut hooks);
        assert!(table.clear(a, &mut hooks));
        assert!(table.clear(b, &mut hooks));
        assert!(table.is_empty());
        assert_eq!(table.set("c", 1, &mut hooks), 1);
    }

    #[test]
    fn test_hook_lifecycle() {
        let mut hooks = Hooks::default();
        let mut table = BreakpointTable::new();

        let id = table.set("prog", 10, &mut hooks);
        assert!(table.has_breakpoints());
        assert_eq!(hooks.installed.get(&HookTarget::Main), Some(&BREAKPOINT_HOOK));
        assert_eq!(hooks.installed.get(&HookTarget::Current), Some(&BREAKPOINT_HOOK));

        assert!(table.clear(id, &mut hooks));
        assert!(!table.has_breakpoints());
        assert!(hooks.installed.is_empty());
    }

    #[test]
    fn test_clear_unknown_id() {
        let mut hooks = Hooks::default();
        let mut table = BreakpointTable::new();
        table.set("prog", 1, &mut hooks);
        let calls = hooks.calls;

        assert!(!table.clear(99, &mut hooks));
        assert_eq!(table.len(), 1);
        assert_eq!(hooks.calls, calls);
    }

    #[test]
    fn test_force_check_timeout_only_on_first() {
        let mut hooks = Hooks::default();
        let mut table = BreakpointTable::new();

        table.set("a", 1, &mut hooks);
        assert!(table.take_force_check_timeout());
        table.set("a", 2, &mut hooks);
        assert!(!table.take_force_check_timeout());
    }

    #[test]
    fn test_source_reference() {
        assert_eq!(source_reference("startup.lua"), "@/startup.lua");
        assert_eq!(source_reference("/rom//programs/./ls.lua"), "@/rom/programs/ls.lua");
        assert_eq!(source_reference("a/b/../c"), "@/a/c");
        assert_eq!(source_reference("../../x"), "@/x");
    }

    #[test]
    fn test_matches() {
        let mut hooks = Hooks::default();
        let mut table = BreakpointTable::new();
        let id = table.set("prog.lua", 7, &mut hooks);
        assert_eq!(table.matches("@/prog.lua", 7), Some(id));
        assert_eq!(table.matches("@/prog.lua", 8), None);
        assert_eq!(table.get(id).unwrap().source, "@/prog.lua");
    }
}
