//! GUID - 128-bit COM identifier type
//!
//! Shared value type for CLSIDs and IIDs. Parses the usual registry
//! spelling (`{00000000-0000-0000-C000-000000000046}`, braces optional,
//! case-insensitive) and prints the canonical braced lowercase form.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// GUID parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuidParseError {
    #[error("GUID has wrong shape: expected 8-4-4-4-12 hex groups, got '{0}'")]
    WrongShape(String),

    #[error("GUID contains non-hex characters: '{0}'")]
    InvalidHex(String),
}

/// A 128-bit COM identifier (CLSID or IID), laid out like the Windows GUID
/// struct so discovery observations can be compared byte-for-byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    /// Construct from the four Windows GUID fields.
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}}}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

impl FromStr for Guid {
    type Err = GuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let body = s
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or(s);

        let groups: Vec<&str> = body.split('-').collect();
        if groups.len() != 5 {
            return Err(GuidParseError::WrongShape(s.to_string()));
        }
        let expected_lens = [8usize, 4, 4, 4, 12];
        for (group, expected) in groups.iter().zip(expected_lens) {
            if group.len() != expected {
                return Err(GuidParseError::WrongShape(s.to_string()));
            }
        }

        let decode = |group: &str| -> Result<Vec<u8>, GuidParseError> {
            hex::decode(group).map_err(|_| GuidParseError::InvalidHex(s.to_string()))
        };

        let g1 = decode(groups[0])?;
        let g2 = decode(groups[1])?;
        let g3 = decode(groups[2])?;
        let g4 = decode(groups[3])?;
        let g5 = decode(groups[4])?;

        let mut data4 = [0u8; 8];
        data4[..2].copy_from_slice(&g4);
        data4[2..].copy_from_slice(&g5);

        Ok(Self {
            data1: u32::from_be_bytes([g1[0], g1[1], g1[2], g1[3]]),
            data2: u16::from_be_bytes([g2[0], g2[1]]),
            data3: u16::from_be_bytes([g3[0], g3[1]]),
            data4,
        })
    }
}

// Persisted as the braced string form: the index files stay greppable and
// diffable, and the key ordering matches the display ordering.
impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Guid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}
