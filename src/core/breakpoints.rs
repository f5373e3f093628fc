//! Breakpoint manager - COM breakpoints anchored to vtable slots
//!
//! A COM breakpoint targets one virtual-method slot of a (CLSID, IID) pair
//! and owns one native breakpoint per known vtable backing that pair. When
//! no vtable is known yet the breakpoint stays pending and materializes
//! silently as matching vtables are discovered. Ids are stable for the
//! monitor's lifetime and never reused.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::guid::Guid;
use crate::core::registry::{VTableEntry, VTableRegistry};
use crate::debug::{DebugEngine, EngineError, NativeBreakpointId};

/// COM breakpoint errors
#[derive(Error, Debug)]
pub enum BreakpointError {
    #[error("interface {iid} has no recorded method named '{name}'")]
    UnknownMethodName { iid: Guid, name: String },

    #[error("no COM breakpoint with id {0}")]
    NotFound(u32),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// One native placement owned by a COM breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointLocation {
    pub address: u64,
    pub native_id: NativeBreakpointId,
}

/// A COM breakpoint: stable id, operator-facing description, the owning
/// (CLSID, IID, slot) triple, and the native placements made so far.
#[derive(Debug, Clone)]
pub struct CoBreakpoint {
    pub id: u32,
    pub description: String,
    pub clsid: Guid,
    pub iid: Guid,
    pub method_index: u32,
    pub locations: Vec<BreakpointLocation>,
}

impl CoBreakpoint {
    /// True while no vtable for the owning pair has been discovered.
    pub fn is_pending(&self) -> bool {
        self.locations.is_empty()
    }
}

/// Owner of every active COM breakpoint for one monitor lifetime.
#[derive(Debug, Default)]
pub struct BreakpointManager {
    next_id: u32,
    breakpoints: BTreeMap<u32, CoBreakpoint>,
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a COM breakpoint on `method_index` of `(clsid, iid)`, placing
    /// a native breakpoint at `base + index * pointer_size` for every vtable
    /// the registry currently knows for the pair. Placement is atomic: a
    /// failure on any vtable rolls back the placements already made and
    /// leaves the manager unchanged. Returns the new breakpoint's id.
    pub fn create_cobreakpoint(
        &mut self,
        engine: &mut dyn DebugEngine,
        registry: &VTableRegistry,
        clsid: Guid,
        iid: Guid,
        method_index: u32,
        description: String,
    ) -> Result<u32, BreakpointError> {
        let mut locations = Vec::new();
        for entry in registry.find_vtables(clsid, iid) {
            let address = slot_address(entry, method_index);
            match engine.set_breakpoint(address) {
                Ok(native_id) => locations.push(BreakpointLocation { address, native_id }),
                Err(e) => {
                    for placed in &locations {
                        if let Err(undo) = engine.remove_breakpoint(placed.native_id) {
                            log::warn!(
                                "rollback failed for native breakpoint {}: {}",
                                placed.native_id,
                                undo
                            );
                        }
                    }
                    return Err(e.into());
                }
            }
        }

        let id = self.next_id;
        self.next_id += 1;

        if locations.is_empty() {
            log::info!(
                "breakpoint {} is pending: no vtable known yet for clsid={} iid={}",
                id,
                clsid,
                iid
            );
        } else {
            log::info!(
                "breakpoint {} placed at {} location(s)",
                id,
                locations.len()
            );
        }

        self.breakpoints.insert(
            id,
            CoBreakpoint {
                id,
                description,
                clsid,
                iid,
                method_index,
                locations,
            },
        );
        Ok(id)
    }

    /// Remove a COM breakpoint and its native placements. Native removal is
    /// best effort; an unknown id is the only failure.
    pub fn remove_cobreakpoint(
        &mut self,
        engine: &mut dyn DebugEngine,
        id: u32,
    ) -> Result<(), BreakpointError> {
        let breakpoint = self
            .breakpoints
            .remove(&id)
            .ok_or(BreakpointError::NotFound(id))?;
        for location in &breakpoint.locations {
            if let Err(e) = engine.remove_breakpoint(location.native_id) {
                log::warn!(
                    "failed to remove native breakpoint {} at {:#x}: {}",
                    location.native_id,
                    location.address,
                    e
                );
            }
        }
        log::info!("removed breakpoint {}", id);
        Ok(())
    }

    /// Active breakpoints ordered by id.
    pub fn list_breakpoints(&self) -> Vec<&CoBreakpoint> {
        self.breakpoints.values().collect()
    }

    /// Place matching breakpoints on a newly registered vtable. Placement
    /// failures here are logged, not fatal: discovery must not be aborted by
    /// one bad slot address. Returns the number of new placements.
    pub fn materialize(&mut self, engine: &mut dyn DebugEngine, entry: &VTableEntry) -> usize {
        let mut placed = 0;
        for breakpoint in self.breakpoints.values_mut() {
            if breakpoint.clsid != entry.clsid || breakpoint.iid != entry.iid {
                continue;
            }
            let address = slot_address(entry, breakpoint.method_index);
            if breakpoint
                .locations
                .iter()
                .any(|location| location.address == address)
            {
                continue;
            }
            match engine.set_breakpoint(address) {
                Ok(native_id) => {
                    log::info!(
                        "breakpoint {} materialized at {:#x} (vtable {:#x})",
                        breakpoint.id,
                        address,
                        entry.address
                    );
                    breakpoint
                        .locations
                        .push(BreakpointLocation { address, native_id });
                    placed += 1;
                }
                Err(e) => {
                    log::warn!(
                        "could not materialize breakpoint {} at {:#x}: {}",
                        breakpoint.id,
                        address,
                        e
                    );
                }
            }
        }
        placed
    }

    /// Tear down every native placement and forget all breakpoints. Called
    /// exactly once, on detach; no native breakpoint survives the monitor.
    pub fn teardown(&mut self, engine: &mut dyn DebugEngine) {
        for breakpoint in self.breakpoints.values() {
            for location in &breakpoint.locations {
                if let Err(e) = engine.remove_breakpoint(location.native_id) {
                    log::warn!(
                        "failed to remove native breakpoint {} during teardown: {}",
                        location.native_id,
                        e
                    );
                }
            }
        }
        self.breakpoints.clear();
        log::debug!("breakpoint manager torn down");
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }
}

/// Address of one virtual-method slot inside a vtable.
fn slot_address(entry: &VTableEntry, method_index: u32) -> u64 {
    entry.address + u64::from(method_index) * entry.width.pointer_size()
}
