use std::{
    io::{stdout, Write},
    path::PathBuf,
};

use anyhow::{anyhow, Result};
use argp::FromArgs;
use tracing::info;

use crate::{
    cmd::parse_hex_arg,
    obj::overlay::OverlayTableEntry,
    util::file::map_file,
};

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Lists an overlay table stored in a static image.
#[argp(subcommand, name = "overlays")]
pub struct Args {
    #[argp(positional)]
    /// path to the image containing the table
    image: PathBuf,
    #[argp(option, from_str_fn(parse_hex_arg))]
    /// table offset in hex; a VRAM address when --vram is given
    offset: u32,
    #[argp(option)]
    /// number of table entries
    count: usize,
    #[argp(option, from_str_fn(parse_hex_arg))]
    /// load address of the image in hex
    vram: Option<u32>,
    #[argp(switch)]
    /// include unused entries
    all: bool,
}

pub fn run(args: Args) -> Result<()> {
    let offset = match args.vram {
        Some(vram) => args.offset.checked_sub(vram).ok_or_else(|| {
            anyhow!("Table address {:#010X} is below image address {:#010X}", args.offset, vram)
        })?,
        None => args.offset,
    };
    let file = map_file(&args.image)?;
    let entries = OverlayTableEntry::parse_table(file.as_slice(), offset as usize, args.count)?;
    let mut out = stdout().lock();
    let written = write_overlay_table(&mut out, &entries, args.all)?;
    out.flush()?;
    info!("{} of {} entries in use", written, entries.len());
    Ok(())
}

/// Writes one CSV row per entry and returns the number of rows.
fn write_overlay_table<W: Write + ?Sized>(
    w: &mut W,
    entries: &[OverlayTableEntry],
    include_unused: bool,
) -> Result<usize> {
    writeln!(
        w,
        "index,vrom_start,vrom_end,vram_start,vram_end,loaded_ram_addr,init_info,name,\
         alloc_type,num_loaded"
    )?;
    let mut count = 0;
    for (idx, entry) in entries.iter().enumerate() {
        if entry.is_empty() && !include_unused {
            continue;
        }
        writeln!(
            w,
            "{},{:08X},{:08X},{:08X},{:08X},{:08X},{:08X},{:08X},{},{}",
            idx,
            entry.vrom_start,
            entry.vrom_end,
            entry.vram_start,
            entry.vram_end,
            entry.loaded_ram_addr,
            entry.init_info,
            entry.name_addr,
            entry.alloc_type,
            entry.num_loaded
        )?;
        count += 1;
    }
    Ok(count)
}
