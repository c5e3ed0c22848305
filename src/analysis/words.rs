use std::{collections::BTreeMap, io::Write};

use anyhow::{Context, Result};
use itertools::Itertools;

use crate::{
    analysis::{context::{ordered, SymbolContext}, Analysis, Analyzer},
    obj::{
        overlay::{parse_reloc_block, RELOC_HEADER_SIZE},
        split::Split,
        SectionType,
    },
    util::read_u32,
};

/// Word-granular analyzer that does not decode instructions.
///
/// Code is scanned for aligned words inside the global RAM range, which are
/// reported as references. Data is rendered as words with pointers replaced by
/// symbol names.
#[derive(Debug, Default, Copy, Clone)]
pub struct WordAnalyzer;

fn words<'a>(split: &'a Split<'a>) -> impl Iterator<Item = (u32, u32)> + 'a {
    split.data.chunks_exact(4).enumerate().map(|(i, chunk)| {
        let word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        (split.vram.start.wrapping_add(i as u32 * 4), word)
    })
}

impl Analyzer for WordAnalyzer {
    fn analyze(&self, split: &Split, context: &SymbolContext) -> Result<Analysis> {
        let mut analysis = Analysis::default();
        match split.section_type {
            SectionType::Text => {
                analysis.labels.extend(
                    context.functions_in(split.vram.clone()).map(|(v, n)| (v, n.to_string())),
                );
                if !context.config.trust_user_functions
                    && !analysis.labels.contains_key(&split.vram.start)
                {
                    let start = split.vram.start;
                    analysis.labels.insert(start, format!("func_{start:08X}"));
                }
                let ram = context.config.global_ram_range;
                analysis.references.extend(
                    words(split).map(|(_, word)| word).filter(|&w| ram.contains(w) && w % 4 == 0),
                );
            }
            SectionType::Data | SectionType::Rodata | SectionType::Bss => {
                let symbols = context.symbols_in(split.vram.clone());
                analysis.labels.extend(symbols.into_iter().map(|(v, n)| (v, n.to_string())));
                let ram = context.config.global_ram_range;
                analysis
                    .references
                    .extend(words(split).map(|(_, word)| word).filter(|&w| ram.contains(w)));
            }
            SectionType::Reloc => {
                let info = parse_reloc_block(split.data).with_context(|| {
                    format!("Failed to parse relocations of {}", split.region)
                })?;
                analysis.relocs = Some(info);
            }
        }
        Ok(analysis)
    }

    fn write(
        &self,
        split: &Split,
        analysis: &Analysis,
        context: &SymbolContext,
        w: &mut dyn Write,
    ) -> Result<()> {
        writeln!(w, ".include \"macro.inc\"")?;
        writeln!(w)?;
        writeln!(w, ".section {}", split.section_type)?;
        writeln!(w)?;
        writeln!(w, ".balign 16")?;
        match split.section_type {
            SectionType::Text => write_code(w, split, &analysis.labels),
            SectionType::Data | SectionType::Rodata => {
                write_data(w, split, &analysis.labels, context)
            }
            SectionType::Bss => write_bss(w, split, &analysis.labels),
            SectionType::Reloc => write_relocs(w, split, analysis),
        }
    }
}

fn write_labels(
    w: &mut dyn Write,
    labels: &BTreeMap<u32, String>,
    vram: u32,
    size: u32,
) -> Result<()> {
    for name in labels.range(vram..vram.saturating_add(size)).map(|(_, name)| name) {
        writeln!(w)?;
        writeln!(w, "glabel {name}")?;
    }
    Ok(())
}

fn write_tail(w: &mut dyn Write, split: &Split, labels: &BTreeMap<u32, String>) -> Result<()> {
    let tail = split.data.chunks_exact(4).remainder();
    if tail.is_empty() {
        return Ok(());
    }
    let vram = split.vram.start.wrapping_add((split.data.len() - tail.len()) as u32);
    write_labels(w, labels, vram, tail.len() as u32)?;
    writeln!(w, "    .byte {}", tail.iter().map(|b| format!("0x{b:02X}")).join(", "))?;
    Ok(())
}

fn write_code(w: &mut dyn Write, split: &Split, labels: &BTreeMap<u32, String>) -> Result<()> {
    for (i, (vram, word)) in words(split).enumerate() {
        write_labels(w, labels, vram, 4)?;
        let rom = split.rom.start + i as u32 * 4;
        writeln!(w, "/* {rom:06X} {vram:08X} {word:08X} */  .word 0x{word:08X}")?;
    }
    write_tail(w, split, labels)
}

fn write_data(
    w: &mut dyn Write,
    split: &Split,
    labels: &BTreeMap<u32, String>,
    context: &SymbolContext,
) -> Result<()> {
    let ram = context.config.global_ram_range;
    for (vram, word) in words(split) {
        write_labels(w, labels, vram, 4)?;
        let symbol = context.symbol_at(word).map(str::to_string).or_else(|| {
            if !context.config.symbols_plus_offset {
                return None;
            }
            context.symbol_containing(word).map(|(name, offset)| format!("{name} + 0x{offset:X}"))
        });
        match symbol {
            Some(symbol) if ram.contains(word) => writeln!(w, "    .word {symbol}")?,
            _ => writeln!(w, "    .word 0x{word:08X}")?,
        }
    }
    write_tail(w, split, labels)
}

fn write_bss(w: &mut dyn Write, split: &Split, labels: &BTreeMap<u32, String>) -> Result<()> {
    let mut current = split.vram.start;
    let end = split.vram.end;
    for (&vram, name) in labels.range(ordered(split.vram.clone())) {
        if vram > current {
            writeln!(w, "    .space 0x{:X}", vram - current)?;
        }
        writeln!(w)?;
        writeln!(w, "glabel {name}")?;
        current = vram;
    }
    if end > current {
        writeln!(w, "    .space 0x{:X}", end - current)?;
    }
    Ok(())
}

fn write_relocs(w: &mut dyn Write, split: &Split, analysis: &Analysis) -> Result<()> {
    let Some(info) = &analysis.relocs else {
        return Ok(());
    };
    writeln!(w)?;
    writeln!(w, "glabel {}_OverlayInfo", split.region)?;
    writeln!(w, "    .word 0x{:08X} # .text size", info.text_size)?;
    writeln!(w, "    .word 0x{:08X} # .data size", info.data_size)?;
    writeln!(w, "    .word 0x{:08X} # .rodata size", info.rodata_size)?;
    writeln!(w, "    .word 0x{:08X} # .bss size", info.bss_size)?;
    writeln!(w, "    .word {} # relocation count", info.relocs.len())?;
    writeln!(w)?;
    writeln!(w, "glabel {}_OverlayRelocations", split.region)?;
    for reloc in &info.relocs {
        let section = reloc.section_type().map(SectionType::name).unwrap_or("?");
        writeln!(
            w,
            "    .word 0x{:08X} # {} {} 0x{:06X}",
            reloc.to_word(),
            reloc.kind_name(),
            section,
            reloc.offset
        )?;
    }
    // Padding between the entries and the trailer
    let entries_end = info.offset as usize + RELOC_HEADER_SIZE as usize + info.relocs.len() * 4;
    let trailer_offset = split.data.len() - 4;
    for offset in (entries_end..trailer_offset).step_by(4) {
        let word = read_u32(split.data, offset).unwrap_or(0);
        writeln!(w, "    .word 0x{word:08X}")?;
    }
    writeln!(w)?;
    writeln!(w, "glabel {}_OverlayInfoOffset", split.region)?;
    writeln!(w, "    .word 0x{:08X}", read_u32(split.data, trailer_offset).unwrap_or(0))?;
    Ok(())
}
