use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use argp::FromArgs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    analysis::{context::SymbolContext, pass::run_passes, words::WordAnalyzer, AnalyzerConfig},
    cmd::GameDir,
    obj::{
        split::{split_overlay, split_static, Split},
        LayoutTable,
    },
    util::{
        config::{
            layout_table_name, load_dma_table, load_file_address_table, load_function_table,
            load_layout_table, DMA_ADDRESSES_NAME, FILE_ADDRESSES_NAME, FUNCTIONS_NAME,
        },
        file::{map_file, read_text, MappedFile},
    },
};

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Splits and disassembles the ROM images of a game version.
#[argp(subcommand, name = "disasm")]
pub struct Args {
    #[argp(option)]
    /// game directory
    game: String,
    #[argp(option)]
    /// game version
    version: String,
    #[argp(option, short = 'c')]
    /// YAML configuration file
    config: Option<PathBuf>,
    #[argp(option, short = 'j')]
    /// number of worker threads (default: one per core)
    jobs: Option<usize>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisasmConfig {
    /// Images split along their own layout table.
    pub static_files: Vec<String>,
    /// File address rows with this prefix are overlays.
    pub overlay_prefix: String,
    #[serde(flatten)]
    pub analyzer: AnalyzerConfig,
}

impl Default for DisasmConfig {
    fn default() -> Self {
        Self {
            static_files: vec!["boot".to_string(), "code".to_string()],
            overlay_prefix: "ovl_".to_string(),
            analyzer: AnalyzerConfig::default(),
        }
    }
}

fn load_config(path: &Path) -> Result<DisasmConfig> {
    serde_yaml::from_str(&read_text(path)?)
        .with_context(|| format!("Failed to parse config '{}'", path.display()))
}

enum ImageKind {
    Static,
    Overlay { vram_start: u32 },
}

/// A region image together with its layout.
struct Image {
    name: String,
    kind: ImageKind,
    table: LayoutTable,
    file: MappedFile,
}

impl Image {
    fn splits(&self) -> Result<Vec<Split>> {
        match self.kind {
            ImageKind::Static => {
                match self.table.end() {
                    Some(end) => debug!(
                        "{}: {} units, {:#X} of {:#X} bytes",
                        self.name,
                        self.table.records().count(),
                        end.offset,
                        self.file.len()
                    ),
                    None => warn!("No layout table for {}", self.name),
                }
                split_static(&self.name, &self.table, self.file.as_slice())
            }
            ImageKind::Overlay { vram_start } => {
                split_overlay(&self.name, Some(&self.table), self.file.as_slice(), vram_start)
            }
        }
    }
}

pub fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => DisasmConfig::default(),
    };
    let dir = GameDir::new(&args.game, &args.version);
    match args.jobs {
        Some(jobs) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(jobs)
                .build()
                .context("Failed to create thread pool")?;
            pool.install(|| disasm(&dir, &config))
        }
        None => disasm(&dir, &config),
    }
}

fn load_images(dir: &GameDir, config: &DisasmConfig) -> Result<Vec<Image>> {
    let mut images = Vec::new();
    for name in &config.static_files {
        images.push(Image {
            name: name.clone(),
            kind: ImageKind::Static,
            table: load_layout_table(dir.table(&layout_table_name(name)))?,
            file: map_file(dir.baserom(name))?,
        });
    }

    let file_addresses = load_file_address_table(dir.table(FILE_ADDRESSES_NAME))?;
    let dma = load_dma_table(dir.table(DMA_ADDRESSES_NAME))?;
    for (name, record) in &file_addresses {
        if !name.starts_with(&config.overlay_prefix) {
            continue;
        }
        let Some(vram_start) = record.vram_start else {
            warn!("Overlay {} has no VRAM start, skipping", name);
            continue;
        };
        if let Some(entry) = dma.get(name) {
            debug!(
                "{}: VROM {:#X}..{:#X}, ROM {:#X}..{:#X}, compressed: {}",
                name,
                entry.vrom_start,
                entry.vrom_end,
                entry.rom_start,
                entry.rom_end,
                entry.is_compressed()
            );
        }
        images.push(Image {
            name: name.clone(),
            kind: ImageKind::Overlay { vram_start },
            table: load_layout_table(dir.table(&layout_table_name(name)))?,
            file: map_file(dir.baserom(name))?,
        });
    }
    Ok(images)
}

fn disasm(dir: &GameDir, config: &DisasmConfig) -> Result<()> {
    let mut context = SymbolContext::new(config.analyzer.clone());
    let functions = load_function_table(dir.table(FUNCTIONS_NAME))?;
    let added = context.add_functions(&functions);
    info!(
        "Loaded {} functions ({} duplicates ignored)",
        context.function_count(),
        functions.len() - added
    );

    let images = load_images(dir, config)?;
    let mut splits = Vec::new();
    for image in &images {
        splits.extend(image.splits()?);
    }
    info!(
        "Split {} images into {} sections ({:#X} bytes)",
        images.len(),
        splits.len(),
        splits.iter().map(Split::size).sum::<u32>()
    );

    let result = run_passes(&WordAnalyzer, &mut splits, &mut context, &dir.asm_dir())?;
    info!(
        "Wrote {} of {} sections, {} data symbols discovered",
        result.written, result.analyzed, result.data_symbols
    );
    if !result.failures.is_empty() {
        bail!("{} of {} sections failed to write", result.failures.len(), result.analyzed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::obj::overlay::tests::make_overlay;

    fn setup(root: &Path) -> GameDir {
        let tables = root.join("oot/ntsc/tables");
        let baserom = root.join("oot/ntsc/baserom");
        fs::create_dir_all(&tables).unwrap();
        fs::create_dir_all(&baserom).unwrap();
        fs::write(
            tables.join("files_boot.csv"),
            "offset,vram,.text\n0,80000460,boot_main\n8,80000468,.end\n\n\
             offset,vram,.data\n8,80000468,boot_main\n10,80000470,.end\n",
        )
        .unwrap();
        fs::write(tables.join("functions.csv"), "80000460,bootclear\n80000460,bootclear_alias\n")
            .unwrap();
        fs::write(
            tables.join("file_addresses.csv"),
            "File name,VROM start,VROM end,ROM start,ROM end,Size (VROM),Compressed?,\
             VRAM start,VRAM end,Size (VRAM),bss,Type,Number\n\
             ovl_test,00B9DA40,0,0,0,0,N,80800000,,,,,\n\
             ovl_nowhere,00B9E000,0,0,0,0,N,,,,,,\n\
             gameplay_keep,00F03000,0,0,0,0,N,,,,,,\n",
        )
        .unwrap();
        let boot: Vec<u8> = [0x27BDFFE8u32, 0x03E00008, 0x80000464, 0x00000001]
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        fs::write(baserom.join("boot"), boot).unwrap();
        fs::write(baserom.join("ovl_test"), make_overlay(0x20, 0, 0, &[0x45000000])).unwrap();
        GameDir::new(&root.join("oot").to_string_lossy(), "ntsc")
    }

    #[test]
    fn test_disasm_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let game_dir = setup(dir.path());
        let config = DisasmConfig { static_files: vec!["boot".to_string()], ..Default::default() };
        disasm(&game_dir, &config).unwrap();

        let asm = game_dir.asm_dir();
        let text = fs::read_to_string(asm.join("text/boot/boot_main.s")).unwrap();
        assert!(text.contains("glabel bootclear\n"));
        assert!(!text.contains("bootclear_alias"));
        assert!(asm.join("data/boot/boot_main.s").is_file());
        assert!(asm.join("text/ovl_test/ovl_test.s").is_file());
        assert!(asm.join("reloc/ovl_test/ovl_test.s").is_file());
        assert!(!asm.join("text/ovl_nowhere").exists());
    }

    #[test]
    fn test_missing_static_image() {
        let dir = tempfile::tempdir().unwrap();
        let game_dir = setup(dir.path());
        assert!(disasm(&game_dir, &DisasmConfig::default()).is_err());
    }

    #[test]
    fn test_config_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disasm.yml");
        fs::write(&path, "static_files: [boot]\nglobal_ram_range: [0x80000000, 0x80800000]\n")
            .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.static_files, ["boot"]);
        assert_eq!(config.overlay_prefix, "ovl_");
        assert_eq!(config.analyzer.global_ram_range.1, 0x80800000);
        assert!(config.analyzer.trust_user_functions);
    }
}
