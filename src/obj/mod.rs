pub mod addresses;
pub mod layout;
pub mod overlay;
pub mod split;

use std::fmt;

/// Kind of a section, ordered by analysis priority.
///
/// Code is analyzed first: references discovered in code seed the symbols
/// used when interpreting data.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SectionType {
    Text,
    Data,
    Rodata,
    Bss,
    /// Overlay relocation metadata (`.ovl`).
    Reloc,
}

impl SectionType {
    pub const ALL: [SectionType; 5] = [
        SectionType::Text,
        SectionType::Data,
        SectionType::Rodata,
        SectionType::Bss,
        SectionType::Reloc,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|section_type| section_type.name() == name)
    }

    /// Section name as written in maps and layout tables.
    pub fn name(self) -> &'static str {
        match self {
            SectionType::Text => ".text",
            SectionType::Data => ".data",
            SectionType::Rodata => ".rodata",
            SectionType::Bss => ".bss",
            SectionType::Reloc => ".ovl",
        }
    }

    /// Directory name used for output paths.
    pub fn dir_name(self) -> &'static str {
        match self {
            SectionType::Text => "text",
            SectionType::Data => "data",
            SectionType::Rodata => "rodata",
            SectionType::Bss => "bss",
            SectionType::Reloc => "reloc",
        }
    }

    #[inline]
    pub fn is_code(self) -> bool { self == SectionType::Text }

    /// Sections without backing bytes in the image.
    #[inline]
    pub fn is_noload(self) -> bool { self == SectionType::Bss }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

pub const END_MARKER: &str = ".end";
pub const PADDING_NAME: &str = "[PADDING]";

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum LayoutEntryKind {
    /// Starts a run of units of the given section type.
    Header(SectionType),
    /// A unit starting at this offset.
    Unit(String),
    /// Exclusive end of the region.
    End,
}

/// One record of a layout table.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct LayoutEntry {
    pub offset: u32,
    pub vram: u32,
    pub kind: LayoutEntryKind,
}

impl LayoutEntry {
    #[inline]
    pub fn header(section_type: SectionType) -> Self {
        Self { offset: 0, vram: 0, kind: LayoutEntryKind::Header(section_type) }
    }

    #[inline]
    pub fn unit(offset: u32, vram: u32, name: impl Into<String>) -> Self {
        Self { offset, vram, kind: LayoutEntryKind::Unit(name.into()) }
    }

    #[inline]
    pub fn end(offset: u32, vram: u32) -> Self { Self { offset, vram, kind: LayoutEntryKind::End } }

    #[inline]
    pub fn is_header(&self) -> bool { matches!(self.kind, LayoutEntryKind::Header(_)) }
}

/// Offset table for one logical region (`boot`, `code`, an overlay).
///
/// Offsets are running deltas between consecutive units' VRAM, so they stay
/// valid when the region is relocated.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct LayoutTable {
    pub entries: Vec<LayoutEntry>,
}

impl LayoutTable {
    #[inline]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Records that carry data, i.e. without headers.
    pub fn records(&self) -> impl Iterator<Item = &LayoutEntry> {
        self.entries.iter().filter(|e| !e.is_header())
    }

    /// The terminal record, if any.
    pub fn end(&self) -> Option<&LayoutEntry> {
        self.entries.last().filter(|e| e.kind == LayoutEntryKind::End)
    }
}

/// One row of `file_addresses.csv`.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct FileAddressRecord {
    pub name: String,
    pub vrom_start: u32,
    pub vrom_end: u32,
    pub rom_start: u32,
    pub rom_end: u32,
    pub size_vrom: u32,
    pub compressed: bool,
    pub vram_start: Option<u32>,
    pub vram_end: Option<u32>,
    pub size_vram: Option<u32>,
    pub bss: String,
    pub kind: String,
    pub number: String,
}

/// Overlay row produced from a map. Only the name and VRAM start are consumed
/// downstream; the remaining columns are written with placeholder values.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OverlayAddressRecord {
    pub name: String,
    pub vrom_start: u32,
    pub vram_start: u32,
}

/// Physical placement of a file whose ROM storage differs from its VROM range.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DmaEntry {
    pub vrom_start: u32,
    pub vrom_end: u32,
    pub rom_start: u32,
    pub rom_end: u32,
}

impl DmaEntry {
    /// A zero physical end marks an uncompressed file.
    pub fn is_compressed(&self) -> bool {
        let rom_size = self.rom_end.wrapping_sub(self.rom_start);
        self.rom_end != 0 && rom_size != self.vrom_end.wrapping_sub(self.vrom_start)
    }
}

/// A known function address from `functions.csv`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FunctionEntry {
    pub vram: u32,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_type_names() {
        for section_type in SectionType::ALL {
            assert_eq!(SectionType::from_name(section_type.name()), Some(section_type));
        }
        assert_eq!(SectionType::from_name(".sdata"), None);
        assert_eq!(SectionType::from_name("COMMON"), None);
    }

    #[test]
    fn test_code_sorts_first() {
        let mut types = vec![
            SectionType::Bss,
            SectionType::Reloc,
            SectionType::Rodata,
            SectionType::Text,
            SectionType::Data,
        ];
        types.sort();
        assert_eq!(types, SectionType::ALL);
    }

    #[test]
    fn test_layout_table_accessors() {
        let table = LayoutTable {
            entries: vec![
                LayoutEntry::header(SectionType::Text),
                LayoutEntry::unit(0, 0x1000, "a"),
                LayoutEntry::end(0x20, 0x1020),
            ],
        };
        assert_eq!(table.records().count(), 2);
        assert_eq!(table.end(), Some(&LayoutEntry::end(0x20, 0x1020)));
        assert!(LayoutTable::default().end().is_none());
    }

    #[test]
    fn test_dma_compressed() {
        let raw = DmaEntry { vrom_start: 0x1000, vrom_end: 0x2000, rom_start: 0x1000, rom_end: 0 };
        assert!(!raw.is_compressed());
        let packed =
            DmaEntry { vrom_start: 0x1000, vrom_end: 0x2000, rom_start: 0x1000, rom_end: 0x1800 };
        assert!(packed.is_compressed());
    }
}
