use anyhow::Result;
use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::{
    obj::{LayoutEntry, LayoutTable, SectionType},
    util::{
        map::{LinkMap, MapSegment, BSS_SEGMENT_SUFFIX, SEGMENT_PREFIX},
        MalformedInputError,
    },
};

/// Only compiled objects have content worth splitting.
pub const OBJECT_EXTENSION: &str = "o";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NameMatch {
    /// The unit's full path contains the string.
    PathContains(&'static str),
    /// The unit's base name (without extension) equals the string.
    NameEquals(&'static str),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NameRewrite {
    Prefix(&'static str),
    Replace(&'static str),
}

/// A unit naming special case. The first matching rule wins.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct NameRule {
    pub matches: NameMatch,
    pub rewrite: NameRewrite,
}

impl NameRule {
    pub const fn new(matches: NameMatch, rewrite: NameRewrite) -> Self { Self { matches, rewrite } }

    fn is_match(&self, path: &str, name: &str) -> bool {
        match self.matches {
            NameMatch::PathContains(s) => path.contains(s),
            NameMatch::NameEquals(s) => name == s,
        }
    }

    fn apply(&self, name: &str) -> String {
        match self.rewrite {
            NameRewrite::Prefix(prefix) => format!("{prefix}{name}"),
            NameRewrite::Replace(replacement) => replacement.to_string(),
        }
    }
}

/// Audio sources share base names with other units, and the fault handlers keep
/// their `.bss` variants in separate objects.
pub const DEFAULT_NAME_RULES: &[NameRule] = &[
    NameRule::new(NameMatch::PathContains("/audio/lib/"), NameRewrite::Prefix("audio_lib_")),
    NameRule::new(NameMatch::PathContains("/audio/"), NameRewrite::Prefix("audio_")),
    NameRule::new(NameMatch::NameEquals("fault.bss"), NameRewrite::Replace("fault")),
    NameRule::new(NameMatch::NameEquals("fault_drawer.bss"), NameRewrite::Replace("fault_drawer")),
];

/// Regions that get a layout table when none are requested.
pub const DEFAULT_REGIONS: &[&str] = &["boot", "code", "ovl_file_choose", "ovl_kaleido_scope"];

/// Splits a path's base name into stem and extension, like Python's `splitext`.
fn split_file_name(path: &str) -> (&str, Option<&str>) {
    let base = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match base.rfind('.') {
        Some(idx) if idx > 0 => (&base[..idx], Some(&base[idx + 1..])),
        _ => (base, None),
    }
}

/// Derives a layout table name for a unit path, or `None` when the unit is
/// not a compiled object.
pub fn unit_name(path: &str, rules: &[NameRule]) -> Option<String> {
    let (name, ext) = split_file_name(path);
    if ext != Some(OBJECT_EXTENSION) {
        return None;
    }
    Some(match rules.iter().find(|rule| rule.is_match(path, name)) {
        Some(rule) => rule.apply(name),
        None => name.to_string(),
    })
}

/// The logical region a segment contributes to. `..code` and `..code.bss`
/// both belong to `code`.
pub fn segment_region(segment: &MapSegment) -> Option<&str> {
    let name = segment.name.strip_prefix(SEGMENT_PREFIX)?;
    Some(name.strip_suffix(BSS_SEGMENT_SUFFIX).unwrap_or(name))
}

struct LastUnit {
    offset: u32,
    vram: u32,
    size: u32,
    section_type: SectionType,
}

/// Builds one layout table per requested region, in request order.
///
/// Units are taken in map order. A region without units yields an empty table.
pub fn build_layout_tables<S: AsRef<str>>(
    map: &LinkMap,
    regions: &[S],
    rules: &[NameRule],
) -> Result<IndexMap<String, LayoutTable>> {
    let mut tables = IndexMap::with_capacity(regions.len());
    for region in regions {
        let region = region.as_ref();
        let table = build_layout_table(map, region, rules)?;
        debug!("Region {}: {} entries", region, table.entries.len());
        tables.insert(region.to_string(), table);
    }
    Ok(tables)
}

fn build_layout_table(map: &LinkMap, region: &str, rules: &[NameRule]) -> Result<LayoutTable> {
    let mut table = LayoutTable::default();
    let mut last: Option<LastUnit> = None;
    for (segment, unit) in map.units() {
        if segment_region(segment) != Some(region) {
            continue;
        }
        let Some(section_type) = unit.section_type() else {
            continue;
        };
        let Some(name) = unit_name(&unit.path, rules) else {
            trace!("Skipping {} in {}", unit.path, segment.name);
            continue;
        };

        let offset = match &last {
            None => 0,
            Some(last) => unit
                .vram
                .checked_sub(last.vram)
                .and_then(|delta| last.offset.checked_add(delta))
                .ok_or_else(|| {
                    MalformedInputError::new(format!(
                        "{} {} @ {:#010X} precedes the previous unit @ {:#010X} in {}",
                        unit.path, unit.section, unit.vram, last.vram, region
                    ))
                })?,
        };
        if last.as_ref().map(|l| l.section_type) != Some(section_type) {
            table.entries.push(LayoutEntry::header(section_type));
        }
        table.entries.push(LayoutEntry::unit(offset, unit.vram, name));
        last = Some(LastUnit { offset, vram: unit.vram, size: unit.size, section_type });
    }

    if let Some(last) = last {
        let end = last.offset.checked_add(last.size).ok_or_else(|| {
            MalformedInputError::new(format!("Region {region} overflows the address space"))
        })?;
        table.entries.push(LayoutEntry::end(end, last.vram.wrapping_add(last.size)));
    }
    Ok(table)
}
