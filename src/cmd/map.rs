use std::{
    io::{stdout, Write},
    path::PathBuf,
};

use anyhow::Result;
use argp::FromArgs;
use tracing::{info, warn};

use crate::{
    cmd::GameDir,
    obj::{
        addresses::{extract_function_table, extract_overlay_addresses},
        layout::{build_layout_tables, DEFAULT_NAME_RULES, DEFAULT_REGIONS},
    },
    util::{
        config::{
            layout_table_name, write_file_addresses_file, write_function_table_file,
            write_layout_table_file, FILE_ADDRESSES_NAME, FUNCTIONS_NAME,
        },
        map::{read_map, LinkMap},
    },
};

#[derive(FromArgs, PartialEq, Debug)]
/// Commands for processing linker maps.
#[argp(subcommand, name = "map")]
pub struct Args {
    #[argp(subcommand)]
    command: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argp(subcommand)]
enum SubCommand {
    Print(PrintArgs),
    Tables(TablesArgs),
}

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Dumps the parsed segments, units and symbols.
#[argp(subcommand, name = "print")]
pub struct PrintArgs {
    #[argp(positional)]
    /// path to input map
    map_file: PathBuf,
}

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Writes layout, file address and function tables.
#[argp(subcommand, name = "tables")]
pub struct TablesArgs {
    #[argp(positional)]
    /// path to input map
    map_file: PathBuf,
    #[argp(option)]
    /// game directory
    game: String,
    #[argp(option)]
    /// game version
    version: String,
    #[argp(option, short = 'r')]
    /// region to build a layout table for (repeatable)
    region: Vec<String>,
    #[argp(option, short = 'o')]
    /// output directory (default: GAME/VERSION/tables)
    out_dir: Option<PathBuf>,
}

pub fn run(args: Args) -> Result<()> {
    match args.command {
        SubCommand::Print(c_args) => print(c_args),
        SubCommand::Tables(c_args) => tables(c_args),
    }
}

fn print(args: PrintArgs) -> Result<()> {
    let map = read_map(&args.map_file)?;
    let mut out = stdout().lock();
    write_map_summary(&mut out, &map)?;
    out.flush()?;
    Ok(())
}

fn write_map_summary<W: Write + ?Sized>(w: &mut W, map: &LinkMap) -> Result<()> {
    for segment in &map.segments {
        writeln!(
            w,
            "segment {:<40} vram={:08X} size={:08X} vrom={:08X}",
            segment.name, segment.vram, segment.size, segment.vrom
        )?;
        for unit in &segment.units {
            writeln!(
                w,
                "  file {:<40} vram={:08X} size={:08X} type={}",
                unit.path, unit.vram, unit.size, unit.section
            )?;
            for symbol in &unit.symbols {
                let size = match symbol.size {
                    Some(size) => format!("{size:X}"),
                    None => "???".to_string(),
                };
                writeln!(
                    w,
                    "    symbol {:<40} vram={:08X} size={}",
                    symbol.name, symbol.vram, size
                )?;
            }
        }
    }
    Ok(())
}

fn tables(args: TablesArgs) -> Result<()> {
    let map = read_map(&args.map_file)?;
    if let Some(dmadata) = map.segment("..dmadata") {
        info!("File table offset: {:#X}", dmadata.vrom);
    }

    let regions = if args.region.is_empty() {
        DEFAULT_REGIONS.iter().map(|s| s.to_string()).collect()
    } else {
        args.region
    };
    let out_dir = args
        .out_dir
        .unwrap_or_else(|| GameDir::new(&args.game, &args.version).tables_dir());

    let tables = build_layout_tables(&map, &regions, DEFAULT_NAME_RULES)?;
    for (region, table) in &tables {
        if table.is_empty() {
            warn!("No units found for region {}, not writing a layout table", region);
            continue;
        }
        write_layout_table_file(out_dir.join(layout_table_name(region)), table)?;
    }

    let overlays = extract_overlay_addresses(&map);
    write_file_addresses_file(out_dir.join(FILE_ADDRESSES_NAME), &overlays)?;
    let functions = extract_function_table(&map);
    write_function_table_file(out_dir.join(FUNCTIONS_NAME), &functions)?;
    info!(
        "Wrote {} layout tables, {} overlays and {} functions to '{}'",
        tables.values().filter(|t| !t.is_empty()).count(),
        overlays.len(),
        functions.len(),
        out_dir.display()
    );
    Ok(())
}
