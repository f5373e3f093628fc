//! VTable registry - observed (CLSID, IID) → vtable associations
//!
//! Process-scoped bookkeeping for every vtable the monitor has seen, either
//! through live discovery or through explicit operator registration. The
//! registry records observations as facts; whether an address really is a
//! vtable in the target is only checked at breakpoint-placement time.

use std::collections::BTreeMap;

use crate::core::guid::Guid;

/// Bit-width of the module that owns a vtable. Decides the pointer stride
/// between virtual-method slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitWidth {
    X86,
    X64,
}

impl BitWidth {
    /// Size of one vtable slot in bytes.
    pub const fn pointer_size(self) -> u64 {
        match self {
            BitWidth::X86 => 4,
            BitWidth::X64 => 8,
        }
    }
}

impl std::fmt::Display for BitWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BitWidth::X86 => write!(f, "32-bit"),
            BitWidth::X64 => write!(f, "64-bit"),
        }
    }
}

/// One observed vtable: a (CLSID, IID) pair backed by a base address inside
/// a module of the target process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VTableEntry {
    /// Module that owns the vtable (best effort; may be empty for manual
    /// registrations).
    pub module: String,
    pub clsid: Guid,
    pub iid: Guid,
    pub width: BitWidth,
    /// Base address of slot 0.
    pub address: u64,
    /// True when the entry came from the `reg` command rather than discovery.
    pub manual: bool,
}

/// Registry of every vtable observed for the current monitor lifetime.
///
/// Keyed by (CLSID, IID, address) so repeated observations of the same
/// vtable collapse into one entry. Dropped wholesale on detach.
#[derive(Debug, Default)]
pub struct VTableRegistry {
    entries: BTreeMap<(Guid, Guid, u64), VTableEntry>,
}

impl VTableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation. Idempotent: re-registering an identical
    /// (clsid, iid, address) triple is a no-op. Returns true when the entry
    /// is new.
    pub fn register(&mut self, entry: VTableEntry) -> bool {
        let key = (entry.clsid, entry.iid, entry.address);
        if self.entries.contains_key(&key) {
            log::debug!(
                "vtable already known: clsid={} iid={} address={:#x}",
                entry.clsid,
                entry.iid,
                entry.address
            );
            return false;
        }
        log::debug!(
            "vtable registered: clsid={} iid={} address={:#x} ({})",
            entry.clsid,
            entry.iid,
            entry.address,
            entry.width
        );
        self.entries.insert(key, entry);
        true
    }

    /// All vtables implementing `iid`, ordered by CLSID then address.
    /// Empty when nothing matches.
    pub fn find_vtables_by_iid(&self, iid: Guid) -> Vec<&VTableEntry> {
        self.entries
            .values()
            .filter(|entry| entry.iid == iid)
            .collect()
    }

    /// All vtables belonging to `clsid`, ordered by IID then address.
    /// Empty when nothing matches.
    pub fn find_vtables_by_clsid(&self, clsid: Guid) -> Vec<&VTableEntry> {
        let mut found: Vec<&VTableEntry> = self
            .entries
            .values()
            .filter(|entry| entry.clsid == clsid)
            .collect();
        found.sort_by_key(|entry| (entry.iid, entry.address));
        found
    }

    /// Vtables known for a specific (CLSID, IID) pair, ordered by address.
    pub fn find_vtables(&self, clsid: Guid, iid: Guid) -> Vec<&VTableEntry> {
        self.entries
            .range((clsid, iid, 0)..=(clsid, iid, u64::MAX))
            .map(|(_, entry)| entry)
            .collect()
    }

    /// CLSID → (vtable address, IID) associations for status reporting.
    pub fn list_cotypes(&self) -> BTreeMap<Guid, Vec<(u64, Guid)>> {
        let mut cotypes: BTreeMap<Guid, Vec<(u64, Guid)>> = BTreeMap::new();
        for entry in self.entries.values() {
            cotypes
                .entry(entry.clsid)
                .or_default()
                .push((entry.address, entry.iid));
        }
        cotypes
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
