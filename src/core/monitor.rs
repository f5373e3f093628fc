//! Monitor - live COM discovery and breakpoint orchestration
//!
//! One monitor exists per debugging session while attached. It owns the
//! engine handle, the vtable registry, and the breakpoint manager, routes
//! discovery events through the CLSID filter, and keeps pending breakpoints
//! in sync with newly observed vtables. Pause/resume are monitor-side flags:
//! the debuggee keeps running, the monitor just stops taking notes.

use std::collections::BTreeSet;

use crate::core::breakpoints::{BreakpointError, BreakpointManager, CoBreakpoint};
use crate::core::guid::Guid;
use crate::core::metadata::MetadataIndex;
use crate::core::registry::{VTableEntry, VTableRegistry};
use crate::debug::{DebugEngine, EngineEvent};

/// CLSID filter applied to discovery. Immutable once the monitor attaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoFilter {
    /// Monitor everything.
    NoFilter,
    /// Monitor only the listed CLSIDs.
    Including(BTreeSet<Guid>),
    /// Monitor everything except the listed CLSIDs.
    Excluding(BTreeSet<Guid>),
}

impl CoFilter {
    /// Whether discovery should record observations for `clsid`.
    pub fn admits(&self, clsid: Guid) -> bool {
        match self {
            CoFilter::NoFilter => true,
            CoFilter::Including(clsids) => clsids.contains(&clsid),
            CoFilter::Excluding(clsids) => !clsids.contains(&clsid),
        }
    }
}

/// How a breakpoint request names its target slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodTarget {
    /// Slot ordinal, used directly.
    Index(u32),
    /// Method name, resolved against the metadata index.
    Name(String),
}

/// What the monitor noticed while draining engine events; surfaced to the
/// operator by the command layer.
#[derive(Debug, Clone)]
pub enum MonitorNotice {
    VTableRegistered(VTableEntry),
    BreakpointHit { address: u64 },
}

/// Live monitor for one attached process.
pub struct Monitor {
    engine: Box<dyn DebugEngine>,
    filter: CoFilter,
    paused: bool,
    registry: VTableRegistry,
    breakpoints: BreakpointManager,
}

impl Monitor {
    pub fn new(engine: Box<dyn DebugEngine>, filter: CoFilter) -> Self {
        log::info!(
            "monitor attached to pid {} with filter {:?}",
            engine.process_id(),
            filter
        );
        Self {
            engine,
            filter,
            paused: false,
            registry: VTableRegistry::new(),
            breakpoints: BreakpointManager::new(),
        }
    }

    pub fn process_id(&self) -> u32 {
        self.engine.process_id()
    }

    pub fn filter(&self) -> &CoFilter {
        &self.filter
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
        log::info!("monitor paused");
    }

    pub fn resume(&mut self) {
        self.paused = false;
        log::info!("monitor resumed");
    }

    pub fn registry(&self) -> &VTableRegistry {
        &self.registry
    }

    /// Drain engine events and fold vtable observations into the registry.
    /// While paused, events are drained and dropped; the monitor takes no
    /// notes and reports no hits.
    pub fn drain_events(&mut self) -> Vec<MonitorNotice> {
        let events = self.engine.drain_events();
        if self.paused {
            if !events.is_empty() {
                log::debug!("dropped {} event(s) while paused", events.len());
            }
            return Vec::new();
        }

        let mut notices = Vec::new();
        for event in events {
            match event {
                EngineEvent::VTableObserved {
                    module,
                    clsid,
                    iid,
                    width,
                    address,
                } => {
                    if !self.filter.admits(clsid) {
                        log::debug!("filtered out vtable observation for clsid={}", clsid);
                        continue;
                    }
                    let entry = VTableEntry {
                        module,
                        clsid,
                        iid,
                        width,
                        address,
                        manual: false,
                    };
                    if self.admit(entry.clone()) {
                        notices.push(MonitorNotice::VTableRegistered(entry));
                    }
                }
                EngineEvent::BreakpointHit { address, .. } => {
                    notices.push(MonitorNotice::BreakpointHit { address });
                }
                EngineEvent::ModuleLoaded { name, base } => {
                    log::debug!("module loaded: {} at {:#x}", name, base);
                }
            }
        }
        notices
    }

    /// Manual vtable registration (the `reg` command). An explicit operator
    /// request bypasses the filter; width comes from the target.
    pub fn register_vtable(&mut self, clsid: Guid, iid: Guid, address: u64) -> bool {
        let entry = VTableEntry {
            module: String::new(),
            clsid,
            iid,
            width: self.engine.target_width(),
            address,
            manual: true,
        };
        self.admit(entry)
    }

    /// Create a COM breakpoint on a virtual-method slot of `(clsid, iid)`.
    /// Name targets resolve through the metadata index; both target kinds
    /// converge on a slot ordinal before the breakpoint manager is touched.
    pub fn create_cobreakpoint(
        &mut self,
        metadata: &MetadataIndex,
        clsid: Guid,
        iid: Guid,
        target: &MethodTarget,
    ) -> Result<u32, BreakpointError> {
        let method_index = match target {
            MethodTarget::Index(index) => *index,
            MethodTarget::Name(name) => metadata.method_index(iid, name).ok_or_else(|| {
                BreakpointError::UnknownMethodName {
                    iid,
                    name: name.clone(),
                }
            })?,
        };

        let description = describe_slot(metadata, clsid, iid, method_index);
        self.breakpoints.create_cobreakpoint(
            self.engine.as_mut(),
            &self.registry,
            clsid,
            iid,
            method_index,
            description,
        )
    }

    pub fn remove_cobreakpoint(&mut self, id: u32) -> Result<(), BreakpointError> {
        self.breakpoints
            .remove_cobreakpoint(self.engine.as_mut(), id)
    }

    pub fn list_breakpoints(&self) -> Vec<&CoBreakpoint> {
        self.breakpoints.list_breakpoints()
    }

    /// Tear down every native breakpoint ahead of detach. The registry dies
    /// with the monitor itself.
    pub fn teardown(&mut self) {
        self.breakpoints.teardown(self.engine.as_mut());
        log::info!("monitor detached from pid {}", self.engine.process_id());
    }

    // Registers one entry and keeps pending breakpoints in sync. Returns
    // true when the entry was new.
    fn admit(&mut self, entry: VTableEntry) -> bool {
        if !self.registry.register(entry.clone()) {
            return false;
        }
        self.breakpoints.materialize(self.engine.as_mut(), &entry);
        true
    }
}

/// Operator-facing description of a vtable slot, using indexed names where
/// the metadata has them.
fn describe_slot(metadata: &MetadataIndex, clsid: Guid, iid: Guid, method_index: u32) -> String {
    let iface = metadata
        .resolve_type_name(iid)
        .map(str::to_string)
        .unwrap_or_else(|| iid.to_string());
    let method = metadata
        .get_type_methods(iid)
        .and_then(|methods| methods.get(method_index as usize).cloned())
        .unwrap_or_else(|| format!("[{}]", method_index));
    let class = metadata
        .resolve_class_name(clsid)
        .map(str::to_string)
        .unwrap_or_else(|| clsid.to_string());
    format!("{}::{} (class: {})", iface, method, class)
}
