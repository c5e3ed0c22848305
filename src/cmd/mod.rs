use std::path::{Path, PathBuf};

use crate::util::parse_hex;

pub mod disasm;
pub mod functions;
pub mod map;
pub mod overlays;

/// Per game and version directory: `<game>/<version>/{baserom,tables,asm}`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GameDir {
    root: PathBuf,
}

impl GameDir {
    pub fn new(game: &str, version: &str) -> Self { Self { root: Path::new(game).join(version) } }

    #[inline]
    pub fn baserom(&self, file: &str) -> PathBuf { self.root.join("baserom").join(file) }

    #[inline]
    pub fn tables_dir(&self) -> PathBuf { self.root.join("tables") }

    #[inline]
    pub fn table(&self, name: &str) -> PathBuf { self.tables_dir().join(name) }

    #[inline]
    pub fn asm_dir(&self) -> PathBuf { self.root.join("asm") }
}

/// Parses a hexadecimal command line value, with or without `0x`.
pub fn parse_hex_arg(value: &str) -> Result<u32, String> {
    parse_hex(value).map_err(|e| format!("Invalid hex value '{value}': {e}"))
}
