use anyhow::{ensure, Result};

use crate::{
    obj::SectionType,
    util::{read_u32, MalformedInputError},
};

/// `.text`, `.data`, `.rodata` and `.bss` sizes followed by the relocation count.
pub const RELOC_HEADER_SIZE: u32 = 0x14;
/// Minimum trailer value: an empty header plus the trailer word itself.
pub const MIN_RELOC_SECTION_SIZE: u32 = RELOC_HEADER_SIZE + 4;

pub const R_MIPS_32: u8 = 2;
pub const R_MIPS_26: u8 = 4;
pub const R_MIPS_HI16: u8 = 5;
pub const R_MIPS_LO16: u8 = 6;

/// A packed overlay relocation word.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OverlayReloc {
    /// 1 = `.text`, 2 = `.data`, 3 = `.rodata`
    pub section: u8,
    pub kind: u8,
    /// Offset from the start of `section`.
    pub offset: u32,
}

impl OverlayReloc {
    pub fn from_word(word: u32) -> Self {
        Self {
            section: (word >> 30) as u8,
            kind: ((word >> 24) & 0x3F) as u8,
            offset: word & 0xFFFFFF,
        }
    }

    pub fn to_word(self) -> u32 {
        ((self.section as u32) << 30)
            | (((self.kind as u32) & 0x3F) << 24)
            | (self.offset & 0xFFFFFF)
    }

    pub fn section_type(self) -> Option<SectionType> {
        match self.section {
            1 => Some(SectionType::Text),
            2 => Some(SectionType::Data),
            3 => Some(SectionType::Rodata),
            _ => None,
        }
    }

    pub fn kind_name(self) -> &'static str {
        match self.kind {
            R_MIPS_32 => "R_MIPS_32",
            R_MIPS_26 => "R_MIPS_26",
            R_MIPS_HI16 => "R_MIPS_HI16",
            R_MIPS_LO16 => "R_MIPS_LO16",
            _ => "R_MIPS_UNKNOWN",
        }
    }
}

/// Relocation metadata stored at the end of an overlay image.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OverlayRelocInfo {
    /// Offset of the relocation section within the image.
    pub offset: u32,
    pub text_size: u32,
    pub data_size: u32,
    pub rodata_size: u32,
    pub bss_size: u32,
    pub relocs: Vec<OverlayReloc>,
}

impl OverlayRelocInfo {
    /// Size of the loadable body preceding the relocation section.
    #[inline]
    pub fn body_size(&self) -> u64 {
        self.text_size as u64 + self.data_size as u64 + self.rodata_size as u64
    }
}

fn malformed(message: String) -> anyhow::Error { MalformedInputError::new(message).into() }

/// Locates the relocation section through the image's final word, which holds
/// the section's size counted back from the end of the image.
pub fn locate_reloc_section(data: &[u8]) -> Result<u32> {
    let len = u32::try_from(data.len()).map_err(|_| malformed("Overlay image too large".into()))?;
    ensure!(
        len >= MIN_RELOC_SECTION_SIZE && len % 4 == 0,
        malformed(format!("Overlay image size {len:#X} cannot hold a relocation section"))
    );
    let trailer = read_u32(data, (len - 4) as usize).unwrap_or(0);
    ensure!(
        (MIN_RELOC_SECTION_SIZE..=len).contains(&trailer) && trailer % 4 == 0,
        malformed(format!("Invalid overlay relocation trailer {trailer:#X} (image size {len:#X})"))
    );
    Ok(len - trailer)
}

/// Parses a relocation block on its own, e.g. a split relocation section.
/// Section sizes are not checked against the preceding image.
pub fn parse_reloc_block(data: &[u8]) -> Result<OverlayRelocInfo> {
    let offset = locate_reloc_section(data)?;
    let word = |idx: u32| read_u32(data, (offset + idx * 4) as usize).unwrap_or(0);
    let (text_size, data_size, rodata_size, bss_size, count) =
        (word(0), word(1), word(2), word(3), word(4));
    let end = data.len() as u64 - 4;
    let relocs_end = offset as u64 + RELOC_HEADER_SIZE as u64 + count as u64 * 4;
    ensure!(
        relocs_end <= end,
        malformed(format!("Overlay relocation count {count} overruns the image"))
    );
    let relocs = (0..count).map(|i| OverlayReloc::from_word(word(5 + i))).collect();
    Ok(OverlayRelocInfo { offset, text_size, data_size, rodata_size, bss_size, relocs })
}

/// Parses the relocation section of a whole overlay image.
pub fn parse_reloc_section(data: &[u8]) -> Result<OverlayRelocInfo> {
    let info = parse_reloc_block(data)?;
    let body_size = info.body_size();
    ensure!(
        body_size <= info.offset as u64,
        malformed(format!(
            "Overlay section sizes ({body_size:#X}) exceed the relocation offset {:#X}",
            info.offset
        ))
    );
    Ok(info)
}

pub const OVERLAY_TABLE_ENTRY_SIZE: usize = 0x20;

/// An entry of a runtime overlay table in a static region.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OverlayTableEntry {
    pub vrom_start: u32,
    pub vrom_end: u32,
    pub vram_start: u32,
    pub vram_end: u32,
    pub loaded_ram_addr: u32,
    pub init_info: u32,
    pub name_addr: u32,
    pub alloc_type: u16,
    pub num_loaded: u8,
}

impl OverlayTableEntry {
    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure!(
            data.len() >= OVERLAY_TABLE_ENTRY_SIZE,
            malformed(format!("Overlay table entry needs {OVERLAY_TABLE_ENTRY_SIZE:#X} bytes"))
        );
        let words: Vec<u32> = data[..OVERLAY_TABLE_ENTRY_SIZE]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self {
            vrom_start: words[0],
            vrom_end: words[1],
            vram_start: words[2],
            vram_end: words[3],
            loaded_ram_addr: words[4],
            init_info: words[5],
            name_addr: words[6],
            // u16 at +0x1C, u8 at +0x1E
            alloc_type: (words[7] >> 16) as u16,
            num_loaded: ((words[7] >> 8) & 0xFF) as u8,
        })
    }

    /// Parses `count` consecutive entries starting at `offset`.
    pub fn parse_table(data: &[u8], offset: usize, count: usize) -> Result<Vec<Self>> {
        let end = count
            .checked_mul(OVERLAY_TABLE_ENTRY_SIZE)
            .and_then(|size| offset.checked_add(size))
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                malformed(format!(
                    "Overlay table @ {offset:#X} with {count} entries exceeds image size {:#X}",
                    data.len()
                ))
            })?;
        data[offset..end].chunks_exact(OVERLAY_TABLE_ENTRY_SIZE).map(Self::parse).collect()
    }

    /// Unused slots have no ROM range.
    #[inline]
    pub fn is_empty(&self) -> bool { self.vrom_start == 0 && self.vrom_end == 0 }
}
