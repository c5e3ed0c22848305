use std::io::BufRead;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, trace};

use crate::{
    obj::SectionType,
    util::{attach_path, parse_hex, MalformedInputError},
};

/// A named symbol inside of a unit.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MapSymbol {
    pub name: String,
    pub vram: u32,
    /// `None` when the map does not allow the size to be derived.
    pub size: Option<u32>,
}

/// A compiled object's contribution to one input section of a segment.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MapUnit {
    pub path: String,
    pub vram: u32,
    pub size: u32,
    /// Input section name as written in the map (`.text`, `.rodata`, `COMMON`, ...)
    pub section: String,
    pub symbols: Vec<MapSymbol>,
}

impl MapUnit {
    #[inline]
    pub fn section_type(&self) -> Option<SectionType> { SectionType::from_name(&self.section) }

    #[inline]
    pub fn end(&self) -> u32 { self.vram.wrapping_add(self.size) }
}

/// A named region of the link, e.g. `..boot`, `..code.bss` or `..ovl_file_choose`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MapSegment {
    pub name: String,
    pub vram: u32,
    pub size: u32,
    pub vrom: u32,
    pub units: Vec<MapUnit>,
}

impl MapSegment {
    /// Segments loaded at runtime at a relocated address.
    #[inline]
    pub fn is_overlay(&self) -> bool {
        self.name.starts_with(OVERLAY_SEGMENT_PREFIX) && !self.name.ends_with(BSS_SEGMENT_SUFFIX)
    }
}

pub const SEGMENT_PREFIX: &str = "..";
pub const OVERLAY_SEGMENT_PREFIX: &str = "..ovl_";
pub const BSS_SEGMENT_SUFFIX: &str = ".bss";

/// Parsed GNU ld map: segments in map order.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct LinkMap {
    pub segments: Vec<MapSegment>,
}

impl LinkMap {
    pub fn segment(&self, name: &str) -> Option<&MapSegment> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn units(&self) -> impl Iterator<Item = (&MapSegment, &MapUnit)> {
        self.segments.iter().flat_map(|s| s.units.iter().map(move |u| (s, u)))
    }
}

static MEMORY_MAP_START: Lazy<Regex> =
    Lazy::new(|| Regex::new("^Linker script and memory map\\s*$").unwrap());
static SEGMENT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^(?P<name>\\S+)(?:\\s+(?P<rest>\\S.*?))?\\s*$").unwrap());
static SEGMENT_ADDRS: Lazy<Regex> = Lazy::new(|| {
    Regex::new("^0x(?P<vram>\\S+)\\s+0x(?P<size>\\S+)(?:\\s+load address\\s+0x(?P<vrom>\\S+))?$")
        .unwrap()
});
static UNIT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new("^\\s+(?P<section>\\.[A-Za-z_][\\w.$]*|COMMON)(?:\\s+(?P<rest>\\S.*?))?\\s*$")
        .unwrap()
});
static UNIT_ADDRS: Lazy<Regex> = Lazy::new(|| {
    Regex::new("^0x(?P<vram>\\S+)\\s+0x(?P<size>\\S+)(?:\\s+(?P<path>\\S.*))?$").unwrap()
});
static CONTINUATION_LINE: Lazy<Regex> = Lazy::new(|| Regex::new("^\\s+0x\\S+\\s+0x\\S+").unwrap());
static SYMBOL_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^\\s+0x(?P<vram>\\S+)\\s+(?P<name>[^\\s=]+)\\s*$").unwrap());

fn hex_capture(captures: &Captures, name: &str, line: usize) -> Result<u32> {
    let value = &captures[name];
    parse_hex(value).map_err(|e| {
        MalformedInputError::at_line(line, format!("Invalid {name} '0x{value}': {e}")).into()
    })
}

/// Parses a GNU ld map into its segment → unit → symbol tree.
///
/// Parsing starts after the `Linker script and memory map` marker when present,
/// otherwise at the first line.
pub fn process_map<R: BufRead>(reader: R) -> Result<LinkMap> {
    let lines = reader.lines().collect::<std::io::Result<Vec<String>>>()?;
    let start = lines
        .iter()
        .position(|l| MEMORY_MAP_START.is_match(l))
        .map(|idx| idx + 1)
        .unwrap_or(0);

    let mut map = LinkMap::default();
    let mut in_segment = false;
    let mut in_unit = false;
    let mut idx = start;
    while idx < lines.len() {
        let line = &lines[idx];
        let line_no = idx + 1;
        idx += 1;
        if line.trim().is_empty() {
            continue;
        }

        if !line.starts_with(char::is_whitespace) {
            in_unit = false;
            let Some(captures) = SEGMENT_LINE.captures(line) else {
                in_segment = false;
                continue;
            };
            let name = captures["name"].to_string();
            let addrs = match captures.name("rest").map(|m| m.as_str()) {
                Some(rest) if rest.starts_with("0x") => rest.to_string(),
                Some(_) => {
                    // LOAD, OUTPUT(...), START GROUP and similar
                    in_segment = false;
                    continue;
                }
                None => match lines.get(idx) {
                    Some(next) if CONTINUATION_LINE.is_match(next) => {
                        idx += 1;
                        next.trim().to_string()
                    }
                    _ => {
                        // Output section without addresses (e.g. /DISCARD/)
                        in_segment = false;
                        continue;
                    }
                },
            };
            let captures = SEGMENT_ADDRS.captures(&addrs).ok_or_else(|| {
                MalformedInputError::at_line(line_no, format!("Malformed segment header '{name}'"))
            })?;
            let vram = hex_capture(&captures, "vram", line_no)?;
            let size = hex_capture(&captures, "size", line_no)?;
            let vrom = match captures.name("vrom") {
                Some(_) => hex_capture(&captures, "vrom", line_no)?,
                None => 0,
            };
            trace!("Segment {} @ {:#010X} (size {:#X})", name, vram, size);
            map.segments.push(MapSegment { name, vram, size, vrom, units: vec![] });
            in_segment = true;
        } else if let Some(captures) = UNIT_LINE.captures(line) {
            in_unit = false;
            if !in_segment {
                continue;
            }
            let section = captures["section"].to_string();
            let addrs = match captures.name("rest").map(|m| m.as_str()) {
                Some(rest) if rest.starts_with("0x") => rest.to_string(),
                Some(_) => continue,
                None => match lines.get(idx) {
                    Some(next) if CONTINUATION_LINE.is_match(next) => {
                        idx += 1;
                        next.trim().to_string()
                    }
                    _ => continue,
                },
            };
            let captures = UNIT_ADDRS.captures(&addrs).ok_or_else(|| {
                MalformedInputError::at_line(line_no, format!("Malformed {section} entry"))
            })?;
            let vram = hex_capture(&captures, "vram", line_no)?;
            let size = hex_capture(&captures, "size", line_no)?;
            let Some(path) = captures.name("path").map(|m| m.as_str().trim().to_string()) else {
                // Linker-generated input section
                continue;
            };
            // in_segment guarantees a segment exists
            if let Some(segment) = map.segments.last_mut() {
                segment.units.push(MapUnit { path, vram, size, section, symbols: vec![] });
                in_unit = true;
            }
        } else if in_unit {
            if let Some(captures) = SYMBOL_LINE.captures(line) {
                let vram = hex_capture(&captures, "vram", line_no)?;
                let name = captures["name"].to_string();
                if let Some(unit) = map.segments.last_mut().and_then(|s| s.units.last_mut()) {
                    unit.symbols.push(MapSymbol { name, vram, size: None });
                }
            }
        }
    }

    for unit in map.segments.iter_mut().flat_map(|s| s.units.iter_mut()) {
        resolve_symbol_sizes(unit);
    }
    debug!(
        "Parsed {} segments, {} units",
        map.segments.len(),
        map.segments.iter().map(|s| s.units.len()).sum::<usize>()
    );
    Ok(map)
}

/// Parses a map from a string.
pub fn parse_map(text: &str) -> Result<LinkMap> { process_map(text.as_bytes()) }

/// Parses a map file from disk, attaching the path to shape errors.
pub fn read_map<P: AsRef<std::path::Path>>(path: P) -> Result<LinkMap> {
    let path = path.as_ref();
    let file = crate::util::file::map_file(path)?;
    process_map(file.as_reader()).map_err(|e| attach_path(e, path))
}

/// Symbol sizes are the distance to the next symbol in the unit, or to the end
/// of the unit for the last one. Anything that would be negative stays unknown.
fn resolve_symbol_sizes(unit: &mut MapUnit) {
    let end = unit.end();
    let count = unit.symbols.len();
    for i in 0..count {
        let vram = unit.symbols[i].vram;
        let next = if i + 1 < count { unit.symbols[i + 1].vram } else { end };
        unit.symbols[i].size = next.checked_sub(vram);
    }
}
