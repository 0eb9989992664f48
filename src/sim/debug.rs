//! Debugging support for the simulator.
//!
//! This module holds the read-only observer activated by `--debug`:
//! - [`DebugObserver`]: traces each retired instruction as disassembly
//!   and stops the run when a breakpoint matches
//! - [`Breakpoint`] and [`BreakpointList`]: the conditions that stop a run
//!
//! The observer never mutates guest state; it only watches the PC and
//! writes to the `message` sink.

use slotmap::{new_key_type, SlotMap};

use crate::ast::sim::SimInstr;

use super::io::Sink;

new_key_type! {
    /// A key to a breakpoint in a [`BreakpointList`].
    pub struct BreakpointKey;
}

/// A condition that stops the run before an instruction executes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Breakpoint {
    /// Break when the PC reaches this address.
    Pc(u32),
}
impl Breakpoint {
    /// Whether this breakpoint matches the given PC.
    pub fn matches(&self, pc: u32) -> bool {
        match *self {
            Breakpoint::Pc(addr) => addr == pc,
        }
    }
}

/// The set of active breakpoints.
///
/// Breakpoints are added and removed by key, so two identical breakpoints
/// can coexist and be removed independently.
#[derive(Debug, Default)]
pub struct BreakpointList {
    map: SlotMap<BreakpointKey, Breakpoint>,
}
impl BreakpointList {
    /// Creates an empty breakpoint list.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a breakpoint, returning the key that removes it.
    pub fn insert(&mut self, bp: Breakpoint) -> BreakpointKey {
        self.map.insert(bp)
    }
    /// Removes a breakpoint by key, returning it if it was present.
    pub fn remove(&mut self, key: BreakpointKey) -> Option<Breakpoint> {
        self.map.remove(key)
    }
    /// The number of active breakpoints.
    pub fn len(&self) -> usize {
        self.map.len()
    }
    /// Whether there are no active breakpoints.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
    /// Iterates over the active breakpoints.
    pub fn values(&self) -> slotmap::basic::Values<'_, BreakpointKey, Breakpoint> {
        self.map.values()
    }
}

/// The `--debug` observer: an instruction trace plus breakpoint checks.
#[derive(Debug, Default)]
pub struct DebugObserver {
    /// The active breakpoints.
    pub breakpoints: BreakpointList,
}
impl DebugObserver {
    /// Creates an observer with no breakpoints.
    pub fn new() -> Self {
        Default::default()
    }

    /// Whether any breakpoint matches the given PC.
    pub fn should_break(&self, pc: u32) -> bool {
        self.breakpoints.values().any(|bp| bp.matches(pc))
    }

    /// Writes one trace line for an instruction about to execute.
    pub fn trace(&self, step: u64, pc: u32, instr: &SimInstr, out: &mut Sink) {
        use std::fmt::Write;
        let _ = writeln!(out, "[{step:>8}] {pc:#010x}: {instr}");
    }

    /// Writes one trace line for a libc dispatch.
    pub fn trace_libc(&self, step: u64, pc: u32, name: &str, out: &mut Sink) {
        use std::fmt::Write;
        let _ = writeln!(out, "[{step:>8}] {pc:#010x}: <{name}>");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_lifecycle() {
        let mut obs = DebugObserver::new();
        assert!(!obs.should_break(0x10000));

        let key = obs.breakpoints.insert(Breakpoint::Pc(0x10000));
        assert!(obs.should_break(0x10000));
        assert!(!obs.should_break(0x10004));
        assert_eq!(obs.breakpoints.len(), 1);

        assert_eq!(obs.breakpoints.remove(key), Some(Breakpoint::Pc(0x10000)));
        assert!(!obs.should_break(0x10000));
        assert!(obs.breakpoints.is_empty());
    }

    #[test]
    fn test_trace_format() {
        let (mut sink, buf) = Sink::buffer();
        let obs = DebugObserver::new();
        let instr = SimInstr::decode(0x0070_0513).unwrap();
        obs.trace(3, 0x10000, &instr, &mut sink);

        let text = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "[       3] 0x00010000: addi a0, zero, 7\n");
    }
}
