//! Stub engine - scripted in-process debugger backend
//!
//! Stands in for a live debugger when the monitor runs without a target:
//! the test suite scripts vtable observations through it, and the CLI uses
//! it as a dry-run backend so every command path works without a debuggee.

use std::collections::{BTreeMap, VecDeque};

use super::{DebugEngine, EngineError, EngineEvent, NativeBreakpointId};
use crate::core::guid::Guid;
use crate::core::registry::BitWidth;

/// Scripted [`DebugEngine`]: observations are queued by the caller, native
/// breakpoints are tracked in a map instead of being patched into memory.
#[derive(Debug)]
pub struct StubEngine {
    pid: u32,
    width: BitWidth,
    next_id: u32,
    breakpoints: BTreeMap<NativeBreakpointId, u64>,
    events: VecDeque<EngineEvent>,
    /// Addresses where set_breakpoint is scripted to fail.
    refuse: Vec<u64>,
}

impl StubEngine {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            width: BitWidth::X64,
            next_id: 0,
            breakpoints: BTreeMap::new(),
            events: VecDeque::new(),
            refuse: Vec::new(),
        }
    }

    pub fn with_width(pid: u32, width: BitWidth) -> Self {
        Self {
            width,
            ..Self::new(pid)
        }
    }

    /// Script a vtable observation; delivered on the next drain.
    pub fn push_vtable(
        &mut self,
        module: &str,
        clsid: Guid,
        iid: Guid,
        width: BitWidth,
        address: u64,
    ) {
        self.events.push_back(EngineEvent::VTableObserved {
            module: module.to_string(),
            clsid,
            iid,
            width,
            address,
        });
    }

    /// Script a native breakpoint hit.
    pub fn push_hit(&mut self, native_id: NativeBreakpointId, address: u64) {
        self.events
            .push_back(EngineEvent::BreakpointHit { native_id, address });
    }

    /// Make the next set_breakpoint at `address` fail.
    pub fn refuse_address(&mut self, address: u64) {
        self.refuse.push(address);
    }

    /// Addresses of all currently placed native breakpoints, ascending.
    pub fn breakpoint_addresses(&self) -> Vec<u64> {
        let mut addresses: Vec<u64> = self.breakpoints.values().copied().collect();
        addresses.sort_unstable();
        addresses
    }

    pub fn breakpoint_count(&self) -> usize {
        self.breakpoints.len()
    }
}

impl DebugEngine for StubEngine {
    fn process_id(&self) -> u32 {
        self.pid
    }

    fn target_width(&self) -> BitWidth {
        self.width
    }

    fn set_breakpoint(&mut self, address: u64) -> Result<NativeBreakpointId, EngineError> {
        if let Some(pos) = self.refuse.iter().position(|&a| a == address) {
            self.refuse.remove(pos);
            return Err(EngineError::BreakpointFailed {
                address,
                reason: "scripted failure".into(),
            });
        }
        let id = NativeBreakpointId(self.next_id);
        self.next_id += 1;
        self.breakpoints.insert(id, address);
        Ok(id)
    }

    fn remove_breakpoint(&mut self, id: NativeBreakpointId) -> Result<(), EngineError> {
        self.breakpoints
            .remove(&id)
            .map(|_| ())
            .ok_or(EngineError::UnknownBreakpoint(id))
    }

    fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain(..).collect()
    }
}
