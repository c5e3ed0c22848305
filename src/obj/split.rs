use std::{
    ops::Range,
    path::{Path, PathBuf},
};

use anyhow::Result;
use tracing::trace;

use crate::{
    obj::{overlay::parse_reloc_section, LayoutEntryKind, LayoutTable, SectionType, PADDING_NAME},
    util::MalformedInputError,
};

/// A byte range of a region image, ready for analysis.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Split<'a> {
    /// Unit name, or the overlay name for an opaque overlay.
    pub name: String,
    /// Owning image (`boot`, `code`, `ovl_*`).
    pub region: String,
    pub section_type: SectionType,
    /// Offsets within the region image.
    pub rom: Range<u32>,
    pub vram: Range<u32>,
    /// Empty for `.bss`.
    pub data: &'a [u8],
}

impl Split<'_> {
    #[inline]
    pub fn size(&self) -> u32 { self.rom.end - self.rom.start }

    /// Output path below `asm_dir`: `<kind>/<region>/<name>.s`.
    pub fn output_path(&self, asm_dir: &Path) -> PathBuf {
        asm_dir
            .join(self.section_type.dir_name())
            .join(&self.region)
            .join(format!("{}.s", self.name))
    }
}

fn vram_range(region: &str, name: &str, start: u32, size: u32) -> Result<Range<u32>> {
    let end = start.checked_add(size).ok_or_else(|| {
        MalformedInputError::new(format!(
            "{region}: {name} @ {start:#010X} with size {size:#X} overflows the address space"
        ))
    })?;
    Ok(start..end)
}

/// Splits a region image along a layout table.
///
/// Each unit spans from its offset to the next record's offset. `.end` rows
/// only delimit the preceding run; a later header starts a new one. A final
/// unit without a terminal record extends to the end of the image. With
/// `vram_base`, addresses are rebased onto the region's load address instead of
/// taken from the table.
pub fn split_by_table<'a>(
    region: &str,
    table: &LayoutTable,
    data: &'a [u8],
    vram_base: Option<u32>,
) -> Result<Vec<Split<'a>>> {
    let len = u32::try_from(data.len())
        .map_err(|_| MalformedInputError::new(format!("Image {region} too large")))?;
    let mut out = Vec::new();
    let mut section_type = None;
    let mut entries = table.entries.iter();
    while let Some(entry) = entries.next() {
        let name = match &entry.kind {
            LayoutEntryKind::Header(kind) => {
                section_type = Some(*kind);
                continue;
            }
            LayoutEntryKind::Unit(name) => name,
            LayoutEntryKind::End => {
                section_type = None;
                continue;
            }
        };
        let Some(section_type) = section_type else {
            return Err(MalformedInputError::new(format!(
                "{region}: unit {name} is not preceded by a section header"
            ))
            .into());
        };
        let end = entries
            .clone()
            .find(|e| !e.is_header())
            .map(|e| e.offset)
            .unwrap_or(if section_type.is_noload() { entry.offset } else { len });
        if end < entry.offset {
            return Err(MalformedInputError::new(format!(
                "{region}: unit {name} ends at {end:#X} before its start {:#X}",
                entry.offset
            ))
            .into());
        }
        if name == PADDING_NAME {
            trace!("Skipping padding {region} [{:#X}, {end:#X})", entry.offset);
            continue;
        }

        let bytes: &[u8] = if section_type.is_noload() {
            &[]
        } else {
            data.get(entry.offset as usize..end as usize).ok_or_else(|| {
                MalformedInputError::new(format!(
                    "{region}: unit {name} [{:#X}, {end:#X}) exceeds image size {len:#X}",
                    entry.offset
                ))
            })?
        };
        let vram_start = match vram_base {
            Some(base) => vram_range(region, name, base, entry.offset)?.end,
            None => entry.vram,
        };
        out.push(Split {
            name: name.clone(),
            region: region.to_string(),
            section_type,
            vram: vram_range(region, name, vram_start, end - entry.offset)?,
            rom: entry.offset..end,
            data: bytes,
        });
    }
    Ok(out)
}

/// Splits a static region (`boot`, `code`) along its layout table.
pub fn split_static<'a>(
    region: &str,
    table: &LayoutTable,
    data: &'a [u8],
) -> Result<Vec<Split<'a>>> {
    split_by_table(region, table, data, None)
}

/// Splits an overlay image loaded at `vram_start`.
///
/// Without a layout table the overlay is a single code section followed by
/// its relocation section.
pub fn split_overlay<'a>(
    name: &str,
    table: Option<&LayoutTable>,
    data: &'a [u8],
    vram_start: u32,
) -> Result<Vec<Split<'a>>> {
    if let Some(table) = table.filter(|t| !t.is_empty()) {
        return split_by_table(name, table, data, Some(vram_start));
    }
    let reloc_start = parse_reloc_section(data)
        .map_err(|e| match e.downcast::<MalformedInputError>() {
            Ok(malformed) => anyhow::Error::from(MalformedInputError::new(format!(
                "{name}: {}",
                malformed.message
            ))),
            Err(e) => e,
        })?
        .offset;
    let len = data.len() as u32;
    let split = move |section_type: SectionType, range: Range<u32>| -> Result<Split<'a>> {
        let vram = vram_range(name, section_type.name(), vram_start, range.end)?;
        Ok(Split {
            name: name.to_string(),
            region: name.to_string(),
            section_type,
            vram: vram.start + range.start..vram.end,
            data: &data[range.start as usize..range.end as usize],
            rom: range,
        })
    };
    Ok(vec![
        split(SectionType::Text, 0..reloc_start)?,
        split(SectionType::Reloc, reloc_start..len)?,
    ])
}

/// Orders splits so that every code section precedes every data section.
/// The sort is stable: splits of the same kind keep their discovery order.
pub fn sort_splits(splits: &mut [Split]) { splits.sort_by_key(|s| s.section_type); }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::{overlay::tests::make_overlay, LayoutEntry};

    fn table(entries: Vec<LayoutEntry>) -> LayoutTable { LayoutTable { entries } }

    #[test]
    fn test_split_static() {
        let data: Vec<u8> = (0..0x40u8).collect();
        let table = table(vec![
            LayoutEntry::header(SectionType::Text),
            LayoutEntry::unit(0, 0x80000460, "boot_main"),
            LayoutEntry::unit(0x10, 0x80000470, PADDING_NAME),
            LayoutEntry::header(SectionType::Rodata),
            LayoutEntry::unit(0x20, 0x80000480, "boot_main"),
            LayoutEntry::header(SectionType::Bss),
            LayoutEntry::unit(0x40, 0x800004A0, "fault"),
            LayoutEntry::end(0x70, 0x800004D0),
        ]);
        let splits = split_static("boot", &table, &data).unwrap();
        assert_eq!(splits.len(), 3);
        assert_eq!(splits[0].section_type, SectionType::Text);
        assert_eq!(splits[0].rom, 0..0x10);
        assert_eq!(splits[0].vram, 0x80000460..0x80000470);
        assert_eq!(splits[0].data, &data[..0x10]);
        assert_eq!(splits[1].section_type, SectionType::Rodata);
        assert_eq!(splits[1].data, &data[0x20..0x40]);
        // bss extends past the image without bytes
        assert_eq!(splits[2].section_type, SectionType::Bss);
        assert_eq!(splits[2].size(), 0x30);
        assert!(splits[2].data.is_empty());
        assert_eq!(
            splits[1].output_path(Path::new("oot/ntsc/asm")),
            Path::new("oot/ntsc/asm/rodata/boot/boot_main.s")
        );
    }

    #[test]
    fn test_split_without_end_extends_to_image_end() {
        let data = [0u8; 0x30];
        let table = table(vec![
            LayoutEntry::header(SectionType::Data),
            LayoutEntry::unit(0, 0x1000, "a"),
            LayoutEntry::unit(0x10, 0x1010, "b"),
        ]);
        let splits = split_static("code", &table, &data).unwrap();
        assert_eq!(splits[1].rom, 0x10..0x30);
    }

    #[test]
    fn test_split_end_per_section() {
        let data = [0u8; 0x10];
        let table = table(vec![
            LayoutEntry::header(SectionType::Text),
            LayoutEntry::unit(0, 0x80000460, "boot_main"),
            LayoutEntry::end(8, 0x80000468),
            LayoutEntry::header(SectionType::Data),
            LayoutEntry::unit(8, 0x80000468, "boot_main"),
            LayoutEntry::end(0x10, 0x80000470),
        ]);
        let splits = split_static("boot", &table, &data).unwrap();
        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].section_type, SectionType::Text);
        assert_eq!(splits[0].rom, 0..8);
        assert_eq!(splits[1].section_type, SectionType::Data);
        assert_eq!(splits[1].rom, 8..0x10);
        assert_eq!(splits[1].vram, 0x80000468..0x80000470);

        // A run after `.end` needs its own header
        let table = self::table(vec![
            LayoutEntry::header(SectionType::Text),
            LayoutEntry::unit(0, 0x1000, "a"),
            LayoutEntry::end(8, 0x1008),
            LayoutEntry::unit(8, 0x1008, "b"),
        ]);
        let err = split_static("boot", &table, &data).unwrap_err();
        assert!(err.downcast_ref::<MalformedInputError>().is_some());
    }

    #[test]
    fn test_split_vram_overflow() {
        let data = [0u8; 0x20];
        let table = table(vec![
            LayoutEntry::header(SectionType::Text),
            LayoutEntry::unit(0, 0xFFFFFFF0, "wrap"),
            LayoutEntry::end(0x20, 0x10),
        ]);
        let err = split_static("code", &table, &data).unwrap_err();
        assert!(err.downcast_ref::<MalformedInputError>().is_some());

        let image = make_overlay(0x20, 0, 0, &[]);
        let err = split_overlay("ovl_high", None, &image, 0xFFFFFFE0).unwrap_err();
        assert!(err.downcast_ref::<MalformedInputError>().is_some());
    }

    #[test]
    fn test_split_out_of_bounds() {
        let data = [0u8; 0x10];
        let table = table(vec![
            LayoutEntry::header(SectionType::Text),
            LayoutEntry::unit(0, 0x1000, "a"),
            LayoutEntry::end(0x20, 0x1020),
        ]);
        let err = split_static("code", &table, &data).unwrap_err();
        assert!(err.downcast_ref::<MalformedInputError>().is_some());

        let table = self::table(vec![LayoutEntry::unit(0, 0x1000, "a")]);
        assert!(split_static("code", &table, &data).is_err());
    }

    #[test]
    fn test_overlay_without_table() {
        let image = make_overlay(0x40, 0x10, 0x10, &[0x45000000, 0x46000004]);
        let splits = split_overlay("ovl_test", None, &image, 0xA0000000).unwrap();
        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].section_type, SectionType::Text);
        assert_eq!(splits[0].rom, 0..0x60);
        assert_eq!(splits[0].vram, 0xA0000000..0xA0000060);
        assert_eq!(splits[1].section_type, SectionType::Reloc);
        assert_eq!(splits[1].rom, 0x60..image.len() as u32);
        assert_eq!(splits[1].vram.start, 0xA0000060);
        assert!(splits.iter().all(|s| s.name == "ovl_test" && s.region == "ovl_test"));
        assert_eq!(
            splits[1].output_path(Path::new("asm")),
            Path::new("asm/reloc/ovl_test/ovl_test.s")
        );
    }

    #[test]
    fn test_overlay_with_table_is_rebased() {
        let data = [0u8; 0x40];
        let table = table(vec![
            LayoutEntry::header(SectionType::Text),
            LayoutEntry::unit(0, 0x80800000, "z_file_choose"),
            LayoutEntry::header(SectionType::Data),
            LayoutEntry::unit(0x30, 0x80800030, "z_file_choose"),
            LayoutEntry::end(0x40, 0x80800040),
        ]);
        let splits = split_overlay("ovl_file_choose", Some(&table), &data, 0x80900000).unwrap();
        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].vram, 0x80900000..0x80900030);
        assert_eq!(splits[1].vram, 0x80900030..0x80900040);
    }

    #[test]
    fn test_overlay_bad_trailer() {
        let data = [0u8; 0x40];
        let err = split_overlay("ovl_bad", None, &data, 0x80800000).unwrap_err();
        let malformed = err.downcast_ref::<MalformedInputError>().unwrap();
        assert!(malformed.message.starts_with("ovl_bad: "));
    }

    #[test]
    fn test_overlay_header_overruns_body() {
        // Section sizes claim more bytes than precede the relocation block
        let image = make_overlay(0x20, 0, 0, &[]);
        let start = image.len() - 0x20;
        let mut image = image;
        image[start..start + 4].copy_from_slice(&0x100u32.to_be_bytes());
        let err = split_overlay("ovl_long", None, &image, 0x80800000).unwrap_err();
        let malformed = err.downcast_ref::<MalformedInputError>().unwrap();
        assert!(malformed.message.starts_with("ovl_long: "));
    }

    #[test]
    fn test_code_sorts_before_data() {
        let code = [0u8; 0x20];
        let image = make_overlay(0x20, 0, 0, &[]);
        let static_table = table(vec![
            LayoutEntry::header(SectionType::Bss),
            LayoutEntry::unit(0, 0x1000, "z"),
            LayoutEntry::header(SectionType::Rodata),
            LayoutEntry::unit(0, 0x1000, "a"),
            LayoutEntry::header(SectionType::Text),
            LayoutEntry::unit(0x10, 0x1010, "b"),
            LayoutEntry::end(0x20, 0x1020),
        ]);
        let mut splits = split_static("code", &static_table, &code).unwrap();
        splits.extend(split_overlay("ovl_a", None, &image, 0x80800000).unwrap());
        splits.reverse();
        sort_splits(&mut splits);
        let last_text = splits.iter().rposition(|s| s.section_type.is_code()).unwrap();
        let first_data = splits.iter().position(|s| !s.section_type.is_code()).unwrap();
        assert!(last_text < first_data);
        assert_eq!(splits.iter().filter(|s| s.section_type.is_code()).count(), 2);
    }
}
