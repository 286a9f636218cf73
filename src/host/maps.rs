//! Reading the host process's own mapping table.

use crate::error::{Error, Result};

/// One entry of the host mapping table, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostMapping {
    pub start: u64,
    pub end: u64,
}

/// Source of the host mapping table in `/proc/self/maps` format.
///
/// Each line starts with `start-end` in hexadecimal; everything after the
/// first whitespace is ignored.
pub trait MappingTable {
    /// Read the whole table as text.
    fn read_maps(&self) -> Result<String>;
}

/// The live table of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcSelfMaps;

impl ProcSelfMaps {
    pub const PATH: &'static str = "/proc/self/maps";
}

impl MappingTable for ProcSelfMaps {
    fn read_maps(&self) -> Result<String> {
        Ok(std::fs::read_to_string(Self::PATH)?)
    }
}

/// A fixed listing, for hosts without procfs or for replaying a table.
#[derive(Debug, Clone, Default)]
pub struct StaticMaps(pub String);

impl MappingTable for StaticMaps {
    fn read_maps(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Parse a mapping table into entries sorted by start address.
///
/// Blank lines are skipped; any other line without a valid `start-end`
/// prefix is an error.
pub fn parse_mappings(text: &str) -> Result<Vec<HostMapping>> {
    let mut mappings = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let malformed = || Error::MalformedMapping {
            line: index + 1,
            text: line.to_string(),
        };

        let range = line.split_whitespace().next().ok_or_else(malformed)?;
        let (start, end) = range.split_once('-').ok_or_else(malformed)?;
        let start = u64::from_str_radix(start, 16).map_err(|_| malformed())?;
        let end = u64::from_str_radix(end, 16).map_err(|_| malformed())?;
        if end < start {
            return Err(malformed());
        }

        mappings.push(HostMapping { start, end });
    }

    mappings.sort_by_key(|mapping| mapping.start);
    Ok(mappings)
}
