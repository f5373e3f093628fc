//! Windows live backend using the Win32 Debug API.
//!
//! Attaches to a running process and implements native breakpoints by
//! patching INT3 into target memory. COM-activation hooking (the source of
//! vtable observations) is owned by the hosting debugger; this backend only
//! forwards what the debug-event stream reports.

use std::collections::BTreeMap;

use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Diagnostics::Debug::{
    ContinueDebugEvent, DebugActiveProcess, DebugActiveProcessStop, FlushInstructionCache,
    ReadProcessMemory, WaitForDebugEvent, WriteProcessMemory, DEBUG_EVENT, EXCEPTION_DEBUG_EVENT,
    LOAD_DLL_DEBUG_EVENT,
};
use windows::Win32::System::Threading::{
    IsWow64Process, OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION, PROCESS_VM_READ,
    PROCESS_VM_WRITE,
};
use windows::Win32::Foundation::{BOOL, NTSTATUS};

use super::{DebugEngine, EngineError, EngineEvent, NativeBreakpointId};
use crate::core::registry::BitWidth;

const DBG_CONTINUE: NTSTATUS = NTSTATUS(0x00010002i32);
const EXCEPTION_BREAKPOINT_CODE: u32 = 0x80000003;
const INT3: u8 = 0xCC;

struct PatchedBreakpoint {
    address: u64,
    original_byte: u8,
}

/// Live [`DebugEngine`] backed by the Win32 Debug API.
pub struct LiveEngine {
    pid: u32,
    process: HANDLE,
    width: BitWidth,
    next_id: u32,
    breakpoints: BTreeMap<NativeBreakpointId, PatchedBreakpoint>,
}

impl LiveEngine {
    /// Attach to `pid` and open it for memory patching.
    pub fn attach(pid: u32) -> Result<Self, EngineError> {
        unsafe {
            DebugActiveProcess(pid).map_err(|e| EngineError::AttachFailed {
                pid,
                reason: e.to_string(),
            })?;
        }

        let opened = unsafe {
            OpenProcess(
                PROCESS_QUERY_INFORMATION | PROCESS_VM_READ | PROCESS_VM_WRITE | PROCESS_VM_OPERATION,
                false,
                pid,
            )
        };
        let process = match opened {
            Ok(handle) => handle,
            Err(e) => {
                unsafe {
                    let _ = DebugActiveProcessStop(pid);
                }
                return Err(EngineError::AttachFailed {
                    pid,
                    reason: e.to_string(),
                });
            }
        };

        let mut wow64 = BOOL(0);
        let width = unsafe {
            match IsWow64Process(process, &mut wow64) {
                Ok(()) if wow64.as_bool() => BitWidth::X86,
                _ => BitWidth::X64,
            }
        };

        log::info!("attached live engine to pid {} ({})", pid, width);
        Ok(Self {
            pid,
            process,
            width,
            next_id: 0,
            breakpoints: BTreeMap::new(),
        })
    }

    fn read_byte(&self, address: u64) -> Result<u8, EngineError> {
        let mut byte = 0u8;
        let mut read = 0usize;
        unsafe {
            ReadProcessMemory(
                self.process,
                address as *const std::ffi::c_void,
                (&mut byte as *mut u8).cast(),
                1,
                Some(&mut read),
            )
            .map_err(|e| EngineError::BreakpointFailed {
                address,
                reason: e.to_string(),
            })?;
        }
        Ok(byte)
    }

    fn write_byte(&self, address: u64, byte: u8) -> Result<(), EngineError> {
        let mut written = 0usize;
        unsafe {
            WriteProcessMemory(
                self.process,
                address as *const std::ffi::c_void,
                (&byte as *const u8).cast(),
                1,
                Some(&mut written),
            )
            .map_err(|e| EngineError::BreakpointFailed {
                address,
                reason: e.to_string(),
            })?;
            let _ = FlushInstructionCache(self.process, Some(address as *const std::ffi::c_void), 1);
        }
        Ok(())
    }
}

impl DebugEngine for LiveEngine {
    fn process_id(&self) -> u32 {
        self.pid
    }

    fn target_width(&self) -> BitWidth {
        self.width
    }

    fn set_breakpoint(&mut self, address: u64) -> Result<NativeBreakpointId, EngineError> {
        let original_byte = self.read_byte(address)?;
        self.write_byte(address, INT3)?;

        let id = NativeBreakpointId(self.next_id);
        self.next_id += 1;
        self.breakpoints.insert(
            id,
            PatchedBreakpoint {
                address,
                original_byte,
            },
        );
        log::debug!("patched INT3 at {:#x} (native id {})", address, id);
        Ok(id)
    }

    fn remove_breakpoint(&mut self, id: NativeBreakpointId) -> Result<(), EngineError> {
        let patched = self
            .breakpoints
            .remove(&id)
            .ok_or(EngineError::UnknownBreakpoint(id))?;
        self.write_byte(patched.address, patched.original_byte)?;
        log::debug!("restored byte at {:#x} (native id {})", patched.address, id);
        Ok(())
    }

    fn drain_events(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        let mut debug_event = DEBUG_EVENT::default();

        // Poll without blocking; commands must never wait on the target.
        while unsafe { WaitForDebugEvent(&mut debug_event, 0) }.is_ok() {
            let proc_id = debug_event.dwProcessId;
            let thread_id = debug_event.dwThreadId;

            match debug_event.dwDebugEventCode {
                EXCEPTION_DEBUG_EVENT => {
                    let record = unsafe { debug_event.u.Exception.ExceptionRecord };
                    let address = record.ExceptionAddress as u64;
                    if record.ExceptionCode.0 as u32 == EXCEPTION_BREAKPOINT_CODE {
                        if let Some((&native_id, _)) = self
                            .breakpoints
                            .iter()
                            .find(|(_, patched)| patched.address == address)
                        {
                            events.push(EngineEvent::BreakpointHit { native_id, address });
                        }
                    }
                }
                LOAD_DLL_DEBUG_EVENT => {
                    let base = unsafe { debug_event.u.LoadDll.lpBaseOfDll } as u64;
                    events.push(EngineEvent::ModuleLoaded {
                        name: String::new(),
                        base,
                    });
                }
                _ => {}
            }

            unsafe {
                let _ = ContinueDebugEvent(proc_id, thread_id, DBG_CONTINUE);
            }
        }

        events
    }
}

impl Drop for LiveEngine {
    fn drop(&mut self) {
        for (_, patched) in std::mem::take(&mut self.breakpoints) {
            let _ = self.write_byte(patched.address, patched.original_byte);
        }
        unsafe {
            let _ = DebugActiveProcessStop(self.pid);
            let _ = CloseHandle(self.process);
        }
        log::info!("live engine detached from pid {}", self.pid);
    }
}
