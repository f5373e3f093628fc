//! Debug module - the debugger-engine boundary
//!
//! The monitor core talks to the underlying debugger exclusively through the
//! [`DebugEngine`] trait: native breakpoint set/remove, the target's pointer
//! width, and a drain of engine-driven events (vtable observations and
//! breakpoint hits). Everything behind the trait - event callback plumbing,
//! COM activation hooks, process control - belongs to the hosting debugger.

pub mod stub;

#[cfg(target_os = "windows")]
pub mod windows;

use thiserror::Error;

use crate::core::guid::Guid;
use crate::core::registry::BitWidth;

/// Errors surfaced by a debugger-engine backend.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to attach to process {pid}: {reason}")]
    AttachFailed { pid: u32, reason: String },

    #[error("failed to place breakpoint at {address:#x}: {reason}")]
    BreakpointFailed { address: u64, reason: String },

    #[error("no native breakpoint with id {0}")]
    UnknownBreakpoint(NativeBreakpointId),
}

/// Identifier the engine assigns to a placed native breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NativeBreakpointId(pub u32);

impl std::fmt::Display for NativeBreakpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events the engine delivers to the monitor between commands.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The target exposed a vtable for a (CLSID, IID) pair.
    VTableObserved {
        module: String,
        clsid: Guid,
        iid: Guid,
        width: BitWidth,
        address: u64,
    },
    /// A native breakpoint fired in the target.
    BreakpointHit {
        native_id: NativeBreakpointId,
        address: u64,
    },
    /// A module was mapped into the target.
    ModuleLoaded { name: String, base: u64 },
}

/// Where an attach request gets its engine from, decided once at startup.
#[derive(Debug, Clone, Copy)]
pub enum EngineTarget {
    /// In-process scripted engine: every command path works without a
    /// debuggee.
    Stub { pid: u32 },
    /// Live process on the local machine.
    #[cfg(target_os = "windows")]
    Live { pid: u32 },
}

impl EngineTarget {
    pub fn connect(self) -> Result<Box<dyn DebugEngine>, EngineError> {
        match self {
            EngineTarget::Stub { pid } => Ok(Box::new(stub::StubEngine::new(pid))),
            #[cfg(target_os = "windows")]
            EngineTarget::Live { pid } => Ok(Box::new(windows::LiveEngine::attach(pid)?)),
        }
    }
}

/// Engine-agnostic debugger backend.
///
/// Commands run synchronously inside the host's callback context, so no
/// method blocks on the target; `drain_events` only returns what has already
/// happened.
pub trait DebugEngine {
    /// Identity of the attached process.
    fn process_id(&self) -> u32;

    /// Pointer width of the target (stride between vtable slots).
    fn target_width(&self) -> BitWidth;

    /// Place a native breakpoint at `address`.
    fn set_breakpoint(&mut self, address: u64) -> Result<NativeBreakpointId, EngineError>;

    /// Remove a previously placed native breakpoint.
    fn remove_breakpoint(&mut self, id: NativeBreakpointId) -> Result<(), EngineError>;

    /// Drain pending engine events, oldest first.
    fn drain_events(&mut self) -> Vec<EngineEvent>;
}
