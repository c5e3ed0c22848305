use std::{
    collections::{BTreeMap, BTreeSet},
    io::Write,
};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{
    analysis::context::SymbolContext,
    obj::{overlay::OverlayRelocInfo, split::Split},
};

pub mod context;
pub mod pass;
pub mod words;

/// Half-open address range `[start, end)`, written as `[start, end]` in YAML.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct AddressRange(pub u32, pub u32);

impl AddressRange {
    #[inline]
    pub fn contains(&self, addr: u32) -> bool { addr >= self.0 && addr < self.1 }
}

/// Settings shared by every analyzed section of a run.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub global_rom_range: AddressRange,
    pub global_ram_range: AddressRange,
    /// Render pointers into a known symbol as `symbol + 0xN`.
    pub symbols_plus_offset: bool,
    /// Only label code with known functions. Otherwise a section without a
    /// function at its start receives an automatic label.
    pub trust_user_functions: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            global_rom_range: AddressRange(0x00000000, 0x01000000),
            global_ram_range: AddressRange(0x80000000, 0x81000000),
            symbols_plus_offset: true,
            trust_user_functions: true,
        }
    }
}

/// Result of analyzing one section.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Analysis {
    /// Labels declared by the section.
    pub labels: BTreeMap<u32, String>,
    /// Addresses referenced from the section's contents.
    pub references: BTreeSet<u32>,
    /// Decoded relocation metadata, for relocation sections.
    pub relocs: Option<OverlayRelocInfo>,
}

/// Interprets section bytes. Implementations are shared across worker threads.
pub trait Analyzer: Sync {
    fn analyze(&self, split: &Split, context: &SymbolContext) -> Result<Analysis>;

    fn write(
        &self,
        split: &Split,
        analysis: &Analysis,
        context: &SymbolContext,
        w: &mut dyn Write,
    ) -> Result<()>;
}
