//! Session - process-wide lifetime holder
//!
//! Owns the one metadata index for the whole debugging session and the
//! optional active monitor. At most one monitor exists at a time; attach
//! and detach mutate the held optional instead of hiding a global.

use thiserror::Error;

use crate::core::metadata::MetadataIndex;
use crate::core::monitor::{CoFilter, Monitor};
use crate::debug::DebugEngine;

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("COM monitor is already enabled for the current process")]
    AlreadyAttached,
}

/// Process-wide session state: the metadata index singleton plus the
/// currently attached monitor, if any.
#[derive(Default)]
pub struct Session {
    metadata: MetadataIndex,
    monitor: Option<Monitor>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&self) -> &MetadataIndex {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataIndex {
        &mut self.metadata
    }

    /// Start monitoring. Valid only while detached.
    pub fn attach(
        &mut self,
        engine: Box<dyn DebugEngine>,
        filter: CoFilter,
    ) -> Result<(), SessionError> {
        if self.monitor.is_some() {
            return Err(SessionError::AlreadyAttached);
        }
        self.monitor = Some(Monitor::new(engine, filter));
        Ok(())
    }

    /// Stop monitoring: tear down breakpoints and drop the monitor together
    /// with its registry. Detaching while already detached is a no-op.
    pub fn detach(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.teardown();
        }
    }

    /// The active monitor, or `None` when monitoring is not enabled. `None`
    /// is the normal precondition signal for every attached-only command.
    pub fn find_active_monitor(&mut self) -> Option<&mut Monitor> {
        self.monitor.as_mut()
    }

    pub fn monitor(&self) -> Option<&Monitor> {
        self.monitor.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.monitor.is_some()
    }

    /// Metadata and monitor borrowed together, for commands that resolve
    /// names while mutating monitor state.
    pub fn metadata_and_monitor(&mut self) -> (&MetadataIndex, Option<&mut Monitor>) {
        (&self.metadata, self.monitor.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::Guid;
    use crate::debug::stub::StubEngine;

    fn attach_stub(session: &mut Session) -> Result<(), SessionError> {
        session.attach(Box::new(StubEngine::new(1)), CoFilter::NoFilter)
    }

    #[test]
    fn attach_twice_fails() {
        let mut session = Session::new();
        attach_stub(&mut session).unwrap();
        assert!(matches!(
            attach_stub(&mut session),
            Err(SessionError::AlreadyAttached)
        ));
    }

    #[test]
    fn detach_is_idempotent() {
        let mut session = Session::new();
        attach_stub(&mut session).unwrap();
        session.detach();
        assert!(!session.is_attached());
        // Second detach: no error, no state change.
        session.detach();
        assert!(!session.is_attached());
    }

    #[test]
    fn reattach_starts_empty() {
        let mut session = Session::new();
        attach_stub(&mut session).unwrap();
        let monitor = session.find_active_monitor().unwrap();
        monitor.register_vtable(Guid::new(1, 0, 0, [0; 8]), Guid::new(2, 0, 0, [0; 8]), 0x1000);
        assert_eq!(monitor.registry().len(), 1);

        session.detach();
        attach_stub(&mut session).unwrap();
        let monitor = session.find_active_monitor().unwrap();
        assert!(monitor.registry().is_empty());
        assert!(monitor.list_breakpoints().is_empty());
    }

    #[test]
    fn metadata_survives_attach_cycles() {
        use crate::core::metadata::ClassRecord;

        let mut session = Session::new();
        session.metadata_mut().put_class(ClassRecord {
            clsid: Guid::new(5, 0, 0, [0; 8]),
            name: "ShellLink".into(),
        });
        attach_stub(&mut session).unwrap();
        session.detach();
        assert_eq!(session.metadata().class_count(), 1);
    }
}
