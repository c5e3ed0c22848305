use std::{
    io::{BufRead, Write},
    path::Path,
};

use anyhow::Result;
use indexmap::IndexMap;
use tracing::debug;

use crate::{
    obj::{
        DmaEntry, FileAddressRecord, FunctionEntry, LayoutEntry, LayoutEntryKind, LayoutTable,
        OverlayAddressRecord, SectionType, END_MARKER,
    },
    util::{
        attach_path,
        file::{buf_writer, map_file},
        parse_hex, MalformedInputError,
    },
};

pub const LAYOUT_HEADER_PREFIX: &str = "offset,vram,";
pub const FILE_ADDRESSES_HEADER: &str = "File name,VROM start,VROM end,ROM start,ROM end,\
Size (VROM),Compressed?,VRAM start,VRAM end,Size (VRAM),bss,type,number";
const FILE_ADDRESSES_COLUMNS: usize = 13;

pub fn layout_table_name(region: &str) -> String { format!("files_{region}.csv") }
pub const FILE_ADDRESSES_NAME: &str = "file_addresses.csv";
pub const FUNCTIONS_NAME: &str = "functions.csv";
pub const DMA_ADDRESSES_NAME: &str = "dma_addresses.csv";

fn hex_field(field: &str, what: &str, line: usize) -> Result<u32> {
    parse_hex(field).map_err(|e| {
        MalformedInputError::at_line(line, format!("Invalid {what} '{field}': {e}")).into()
    })
}

fn opt_hex_field(field: &str, what: &str, line: usize) -> Result<Option<u32>> {
    if field.trim().is_empty() {
        Ok(None)
    } else {
        hex_field(field, what, line).map(Some)
    }
}

/// Runs `parse` over the file at `path`, or returns the default value when the
/// file does not exist. Not every region or version defines every table.
fn load_optional<P, T, F>(path: P, parse: F) -> Result<T>
where
    P: AsRef<Path>,
    T: Default,
    F: FnOnce(&mut dyn BufRead) -> Result<T>,
{
    let path = path.as_ref();
    if !path.is_file() {
        debug!("Table '{}' not found, using an empty table", path.display());
        return Ok(T::default());
    }
    let file = map_file(path)?;
    parse(&mut file.as_reader()).map_err(|e| attach_path(e, path))
}

#[inline]
fn write_file<P, F>(path: P, write: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let mut w = buf_writer(path)?;
    write(&mut w)?;
    w.flush()?;
    Ok(())
}

/// Writes a layout table. A header line is written at every section type
/// change, preceded by a blank line unless it is the first line.
pub fn write_layout_table<W: Write + ?Sized>(w: &mut W, table: &LayoutTable) -> Result<()> {
    for (idx, entry) in table.entries.iter().enumerate() {
        match &entry.kind {
            LayoutEntryKind::Header(section_type) => {
                if idx > 0 {
                    writeln!(w)?;
                }
                writeln!(w, "{LAYOUT_HEADER_PREFIX}{section_type}")?;
            }
            LayoutEntryKind::Unit(name) => {
                writeln!(w, "{:X},{:X},{}", entry.offset, entry.vram, name)?
            }
            LayoutEntryKind::End => {
                writeln!(w, "{:X},{:X},{END_MARKER}", entry.offset, entry.vram)?
            }
        }
    }
    Ok(())
}

#[inline]
pub fn write_layout_table_file<P: AsRef<Path>>(path: P, table: &LayoutTable) -> Result<()> {
    write_file(path, |w| write_layout_table(w, table))
}

pub fn parse_layout_table<R: BufRead + ?Sized>(r: &mut R) -> Result<LayoutTable> {
    let mut table = LayoutTable::default();
    for (idx, line) in r.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(kind) = line.strip_prefix(LAYOUT_HEADER_PREFIX) {
            let section_type = SectionType::from_name(kind).ok_or_else(|| {
                MalformedInputError::at_line(line_no, format!("Unknown section type '{kind}'"))
            })?;
            table.entries.push(LayoutEntry::header(section_type));
            continue;
        }
        let mut fields = line.splitn(3, ',');
        let (Some(offset), Some(vram), Some(name)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(
                MalformedInputError::at_line(line_no, format!("Malformed layout row '{line}'"))
                    .into(),
            );
        };
        let offset = hex_field(offset, "offset", line_no)?;
        let vram = hex_field(vram, "vram", line_no)?;
        table.entries.push(if name == END_MARKER {
            LayoutEntry::end(offset, vram)
        } else {
            LayoutEntry::unit(offset, vram, name)
        });
    }
    Ok(table)
}

/// Loads `files_<region>.csv`. A missing file yields an empty table.
pub fn load_layout_table<P: AsRef<Path>>(path: P) -> Result<LayoutTable> {
    load_optional(path, |r| parse_layout_table(r))
}

/// Writes overlay rows in the full file address schema. Only the name, VROM
/// start and VRAM start carry information.
pub fn write_file_addresses<W: Write + ?Sized>(
    w: &mut W,
    records: &[OverlayAddressRecord],
) -> Result<()> {
    writeln!(w, "{FILE_ADDRESSES_HEADER}")?;
    for record in records {
        writeln!(
            w,
            "{},{:08X},0,0,0,0,N,{:08X},,,,,",
            record.name, record.vrom_start, record.vram_start
        )?;
    }
    Ok(())
}

#[inline]
pub fn write_file_addresses_file<P: AsRef<Path>>(
    path: P,
    records: &[OverlayAddressRecord],
) -> Result<()> {
    write_file(path, |w| write_file_addresses(w, records))
}

/// Parses a file address table keyed by file name. The first row is always a
/// header.
pub fn parse_file_address_table<R: BufRead + ?Sized>(
    r: &mut R,
) -> Result<IndexMap<String, FileAddressRecord>> {
    let mut table = IndexMap::new();
    for (idx, line) in r.lines().enumerate().skip(1) {
        let line = line?;
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != FILE_ADDRESSES_COLUMNS {
            return Err(MalformedInputError::at_line(
                line_no,
                format!("Expected {FILE_ADDRESSES_COLUMNS} columns, found {}", fields.len()),
            )
            .into());
        }
        let record = FileAddressRecord {
            name: fields[0].to_string(),
            vrom_start: hex_field(fields[1], "VROM start", line_no)?,
            vrom_end: hex_field(fields[2], "VROM end", line_no)?,
            rom_start: hex_field(fields[3], "ROM start", line_no)?,
            rom_end: hex_field(fields[4], "ROM end", line_no)?,
            size_vrom: hex_field(fields[5], "VROM size", line_no)?,
            compressed: fields[6] == "Y",
            vram_start: opt_hex_field(fields[7], "VRAM start", line_no)?,
            vram_end: opt_hex_field(fields[8], "VRAM end", line_no)?,
            size_vram: opt_hex_field(fields[9], "VRAM size", line_no)?,
            bss: fields[10].to_string(),
            kind: fields[11].to_string(),
            number: fields[12].to_string(),
        };
        table.insert(record.name.clone(), record);
    }
    Ok(table)
}

/// Loads `file_addresses.csv`. A missing file yields an empty table.
pub fn load_file_address_table<P: AsRef<Path>>(
    path: P,
) -> Result<IndexMap<String, FileAddressRecord>> {
    load_optional(path, |r| parse_file_address_table(r))
}

pub fn parse_dma_table<R: BufRead + ?Sized>(r: &mut R) -> Result<IndexMap<String, DmaEntry>> {
    let mut table = IndexMap::new();
    for (idx, line) in r.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        let [name, vrom_start, vrom_end, rom_start, rom_end] = fields[..] else {
            return Err(
                MalformedInputError::at_line(line_no, format!("Malformed DMA row '{line}'")).into()
            );
        };
        table.insert(name.to_string(), DmaEntry {
            vrom_start: hex_field(vrom_start, "VROM start", line_no)?,
            vrom_end: hex_field(vrom_end, "VROM end", line_no)?,
            rom_start: hex_field(rom_start, "ROM start", line_no)?,
            rom_end: hex_field(rom_end, "ROM end", line_no)?,
        });
    }
    Ok(table)
}

/// Loads `dma_addresses.csv`. A missing file yields an empty table.
pub fn load_dma_table<P: AsRef<Path>>(path: P) -> Result<IndexMap<String, DmaEntry>> {
    load_optional(path, |r| parse_dma_table(r))
}

pub fn write_function_table<W: Write + ?Sized>(
    w: &mut W,
    functions: &[FunctionEntry],
) -> Result<()> {
    for function in functions {
        writeln!(w, "{:08X},{}", function.vram, function.name)?;
    }
    Ok(())
}

#[inline]
pub fn write_function_table_file<P: AsRef<Path>>(
    path: P,
    functions: &[FunctionEntry],
) -> Result<()> {
    write_file(path, |w| write_function_table(w, functions))
}

pub fn parse_function_table<R: BufRead + ?Sized>(r: &mut R) -> Result<Vec<FunctionEntry>> {
    let mut functions = Vec::new();
    for (idx, line) in r.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((vram, name)) = line.split_once(',') else {
            return Err(MalformedInputError::at_line(
                line_no,
                format!("Malformed function row '{line}'"),
            )
            .into());
        };
        functions.push(FunctionEntry {
            vram: hex_field(vram, "address", line_no)?,
            name: name.trim().to_string(),
        });
    }
    Ok(functions)
}

/// Loads `functions.csv`. A missing file yields an empty table.
pub fn load_function_table<P: AsRef<Path>>(path: P) -> Result<Vec<FunctionEntry>> {
    load_optional(path, |r| parse_function_table(r))
}
