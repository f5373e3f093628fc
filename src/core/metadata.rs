//! Metadata index - GUID → human-name and method-signature store
//!
//! Offline-buildable index over registered COM type information. Built from
//! the system-wide source (the registry's Interface/CLSID names on Windows)
//! or merged from named JSON sources, persisted with save/load, and queried
//! by every command that needs a readable name for a GUID. Lookups never
//! fail: absence is an `Option::None`, not an error.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::guid::Guid;

/// Metadata index errors
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("metadata source unavailable: {path}: {reason}")]
    SourceUnavailable { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A known COM interface: identifier, name, and (when captured) its ordered
/// virtual-method list starting at slot 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRecord {
    pub iid: Guid,
    pub name: String,
    /// `None` when the interface is known by name only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
}

/// A known COM class: identifier and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub clsid: Guid,
    pub name: String,
}

/// Counts reported after an indexing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub indexed: usize,
    pub skipped: usize,
}

/// On-disk shape of a metadata source and of the persisted index.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MetadataFile {
    #[serde(default)]
    interfaces: Vec<serde_json::Value>,
    #[serde(default)]
    classes: Vec<serde_json::Value>,
}

/// Queryable GUID → name/method index. One instance lives for the whole
/// debugging session, independent of monitor attach/detach cycles.
#[derive(Debug, Default)]
pub struct MetadataIndex {
    types: BTreeMap<Guid, TypeRecord>,
    classes: BTreeMap<Guid, ClassRecord>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full rebuild from the default system-wide source of registered COM
    /// type information. Windows only; elsewhere the system source does not
    /// exist and the call fails with `SourceUnavailable`.
    pub fn index(&mut self) -> Result<IndexStats, MetadataError> {
        #[cfg(target_os = "windows")]
        {
            // Scan first, replace after: a failing scan leaves the index
            // untouched.
            let (types, classes, stats) = Self::scan_system_registry()?;
            self.types = types;
            self.classes = classes;
            log::info!(
                "indexed system metadata: {} records, {} skipped",
                stats.indexed,
                stats.skipped
            );
            Ok(stats)
        }

        #[cfg(not(target_os = "windows"))]
        {
            Err(MetadataError::SourceUnavailable {
                path: "<system>".into(),
                reason: "no registered COM type information on this platform".into(),
            })
        }
    }

    /// Merge records from an explicitly named JSON source. Existing records
    /// with the same identifier are replaced; everything else is kept.
    pub fn index_source(&mut self, path: &Path) -> Result<IndexStats, MetadataError> {
        let stats = self.merge_file(path)?;
        log::info!(
            "indexed {}: {} records, {} skipped",
            path.display(),
            stats.indexed,
            stats.skipped
        );
        Ok(stats)
    }

    /// Replace the whole index from a persisted file.
    pub fn load(&mut self, path: &Path) -> Result<IndexStats, MetadataError> {
        self.types.clear();
        self.classes.clear();
        self.merge_file(path)
    }

    /// Persist the index as JSON at `path`. Writes to a temporary sibling
    /// first and renames over the target, so an existing file survives a
    /// failed write intact.
    pub fn save(&self, path: &Path) -> Result<(), MetadataError> {
        let file = MetadataFile {
            interfaces: self
                .types
                .values()
                .map(|record| serde_json::to_value(record).unwrap_or_default())
                .collect(),
            classes: self
                .classes
                .values()
                .map(|record| serde_json::to_value(record).unwrap_or_default())
                .collect(),
        };

        let text = serde_json::to_string_pretty(&file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let tmp: PathBuf = {
            let mut name = path.as_os_str().to_os_string();
            name.push(".tmp");
            PathBuf::from(name)
        };
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)?;
        log::info!(
            "saved metadata index to {} ({} interfaces, {} classes)",
            path.display(),
            self.types.len(),
            self.classes.len()
        );
        Ok(())
    }

    /// Look up a known interface. Absence is a normal outcome.
    pub fn resolve_type(&self, iid: Guid) -> Option<&TypeRecord> {
        self.types.get(&iid)
    }

    /// Look up a known class. Absence is a normal outcome.
    pub fn resolve_class(&self, clsid: Guid) -> Option<&ClassRecord> {
        self.classes.get(&clsid)
    }

    pub fn resolve_type_name(&self, iid: Guid) -> Option<&str> {
        self.types.get(&iid).map(|record| record.name.as_str())
    }

    pub fn resolve_class_name(&self, clsid: Guid) -> Option<&str> {
        self.classes.get(&clsid).map(|record| record.name.as_str())
    }

    /// Ordered method list for a known interface; `None` when the interface
    /// is unknown or its methods were not captured.
    pub fn get_type_methods(&self, iid: Guid) -> Option<&[String]> {
        self.types
            .get(&iid)
            .and_then(|record| record.methods.as_deref())
    }

    /// Slot index of `name` in the interface's method list, matched
    /// ASCII-case-insensitively.
    pub fn method_index(&self, iid: Guid, name: &str) -> Option<u32> {
        self.get_type_methods(iid)?
            .iter()
            .position(|method| method.eq_ignore_ascii_case(name))
            .map(|index| index as u32)
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Insert or replace a single interface record.
    pub fn put_type(&mut self, record: TypeRecord) {
        self.types.insert(record.iid, record);
    }

    /// Insert or replace a single class record.
    pub fn put_class(&mut self, record: ClassRecord) {
        self.classes.insert(record.clsid, record);
    }

    // Merges one JSON file. Unreadable or structurally invalid files fail
    // the whole call; individually malformed records are skipped and
    // counted.
    fn merge_file(&mut self, path: &Path) -> Result<IndexStats, MetadataError> {
        let text = fs::read_to_string(path).map_err(|e| MetadataError::SourceUnavailable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let file: MetadataFile =
            serde_json::from_str(&text).map_err(|e| MetadataError::SourceUnavailable {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut stats = IndexStats::default();
        for value in file.interfaces {
            match serde_json::from_value::<TypeRecord>(value) {
                Ok(record) => {
                    self.types.insert(record.iid, record);
                    stats.indexed += 1;
                }
                Err(e) => {
                    log::warn!("skipping malformed interface record: {}", e);
                    stats.skipped += 1;
                }
            }
        }
        for value in file.classes {
            match serde_json::from_value::<ClassRecord>(value) {
                Ok(record) => {
                    self.classes.insert(record.clsid, record);
                    stats.indexed += 1;
                }
                Err(e) => {
                    log::warn!("skipping malformed class record: {}", e);
                    stats.skipped += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Walks HKCR\Interface and HKCR\CLSID for registered names. Method
    /// lists are not present in the registry; they enter the index through
    /// named sources or persisted files.
    #[cfg(target_os = "windows")]
    fn scan_system_registry() -> Result<
        (
            BTreeMap<Guid, TypeRecord>,
            BTreeMap<Guid, ClassRecord>,
            IndexStats,
        ),
        MetadataError,
    > {
        use windows::core::PCWSTR;
        use windows::Win32::System::Registry::{
            RegCloseKey, RegEnumKeyExW, RegOpenKeyExW, RegQueryValueExW, HKEY, HKEY_CLASSES_ROOT,
            KEY_READ,
        };

        fn wide(s: &str) -> Vec<u16> {
            s.encode_utf16().chain(std::iter::once(0)).collect()
        }

        fn open_key(root: HKEY, subkey: &str) -> Result<HKEY, MetadataError> {
            let mut key = HKEY::default();
            let name = wide(subkey);
            let status =
                unsafe { RegOpenKeyExW(root, PCWSTR(name.as_ptr()), 0, KEY_READ, &mut key) };
            if status.is_err() {
                return Err(MetadataError::SourceUnavailable {
                    path: format!("HKCR\\{}", subkey),
                    reason: format!("registry error {:?}", status),
                });
            }
            Ok(key)
        }

        // Default value of a key, or None when unset/non-string.
        fn default_value(root: HKEY, subkey: &[u16]) -> Option<String> {
            let mut key = HKEY::default();
            let status =
                unsafe { RegOpenKeyExW(root, PCWSTR(subkey.as_ptr()), 0, KEY_READ, &mut key) };
            if status.is_err() {
                return None;
            }
            let mut buffer = [0u16; 512];
            let mut size = (buffer.len() * 2) as u32;
            let status = unsafe {
                RegQueryValueExW(
                    key,
                    PCWSTR::null(),
                    None,
                    None,
                    Some(buffer.as_mut_ptr().cast()),
                    Some(&mut size),
                )
            };
            unsafe {
                let _ = RegCloseKey(key);
            }
            if status.is_err() || size < 2 {
                return None;
            }
            let chars = (size as usize / 2).saturating_sub(1);
            Some(String::from_utf16_lossy(&buffer[..chars]))
        }

        let mut types = BTreeMap::new();
        let mut classes = BTreeMap::new();
        let mut stats = IndexStats::default();

        for (branch, is_interface) in [("Interface", true), ("CLSID", false)] {
            let key = open_key(HKEY_CLASSES_ROOT, branch)?;
            let mut index = 0u32;
            loop {
                let mut name_buf = [0u16; 256];
                let mut name_len = name_buf.len() as u32;
                let status = unsafe {
                    RegEnumKeyExW(
                        key,
                        index,
                        windows::core::PWSTR(name_buf.as_mut_ptr()),
                        &mut name_len,
                        None,
                        windows::core::PWSTR::null(),
                        None,
                        None,
                    )
                };
                if status.is_err() {
                    break;
                }
                index += 1;

                let key_name = String::from_utf16_lossy(&name_buf[..name_len as usize]);
                let Ok(guid) = key_name.parse::<Guid>() else {
                    stats.skipped += 1;
                    continue;
                };
                let subkey = wide(&format!("{}\\{}", branch, key_name));
                let Some(display_name) = default_value(HKEY_CLASSES_ROOT, &subkey) else {
                    stats.skipped += 1;
                    continue;
                };

                if is_interface {
                    types.insert(
                        guid,
                        TypeRecord {
                            iid: guid,
                            name: display_name,
                            methods: None,
                        },
                    );
                } else {
                    classes.insert(
                        guid,
                        ClassRecord {
                            clsid: guid,
                            name: display_name,
                        },
                    );
                }
                stats.indexed += 1;
            }
            unsafe {
                let _ = RegCloseKey(key);
            }
        }

        Ok((types, classes, stats))
    }
}
