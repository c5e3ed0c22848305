use std::{collections::BTreeMap, ops::Range};

use crate::{analysis::AnalyzerConfig, obj::FunctionEntry};

/// Known symbols of a run.
///
/// Functions come from the function table; data symbols are discovered by
/// references from code and named `D_XXXXXXXX`.
#[derive(Debug, Clone, Default)]
pub struct SymbolContext {
    pub config: AnalyzerConfig,
    functions: BTreeMap<u32, String>,
    data: BTreeMap<u32, String>,
}

impl SymbolContext {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config, functions: BTreeMap::new(), data: BTreeMap::new() }
    }

    /// Adds a function. The first name registered at an address is kept.
    pub fn add_function(&mut self, vram: u32, name: impl Into<String>) -> bool {
        if self.functions.contains_key(&vram) {
            return false;
        }
        self.data.remove(&vram);
        self.functions.insert(vram, name.into());
        true
    }

    pub fn add_functions(&mut self, functions: &[FunctionEntry]) -> usize {
        functions.iter().filter(|f| self.add_function(f.vram, f.name.clone())).count()
    }

    /// Turns referenced addresses into data symbols, unless a symbol already
    /// exists there. Returns the number of symbols added.
    pub fn add_data_references<I>(&mut self, references: I) -> usize
    where I: IntoIterator<Item = u32> {
        let mut added = 0;
        for vram in references {
            if self.functions.contains_key(&vram) || self.data.contains_key(&vram) {
                continue;
            }
            self.data.insert(vram, format!("D_{vram:08X}"));
            added += 1;
        }
        added
    }

    #[inline]
    pub fn function_count(&self) -> usize { self.functions.len() }

    #[inline]
    pub fn data_count(&self) -> usize { self.data.len() }

    pub fn function_at(&self, vram: u32) -> Option<&str> {
        self.functions.get(&vram).map(String::as_str)
    }

    /// Function or data symbol at exactly `vram`. Functions take precedence.
    pub fn symbol_at(&self, vram: u32) -> Option<&str> {
        self.function_at(vram).or_else(|| self.data.get(&vram).map(String::as_str))
    }

    pub fn functions_in(&self, range: Range<u32>) -> impl Iterator<Item = (u32, &str)> {
        self.functions.range(ordered(range)).map(|(&vram, name)| (vram, name.as_str()))
    }

    /// All symbols in `range`, ordered by address.
    pub fn symbols_in(&self, range: Range<u32>) -> BTreeMap<u32, &str> {
        let range = ordered(range);
        let mut out: BTreeMap<u32, &str> =
            self.data.range(range.clone()).map(|(&vram, name)| (vram, name.as_str())).collect();
        out.extend(self.functions_in(range));
        out
    }

    /// The symbol whose extent contains `vram`, with the offset into it.
    ///
    /// A symbol extends up to the next known symbol, so an address past the
    /// last symbol is not contained by anything.
    pub fn symbol_containing(&self, vram: u32) -> Option<(&str, u32)> {
        let (start, name) = self.symbol_before(vram)?;
        self.symbol_after(vram)?;
        Some((name, vram - start))
    }

    fn symbol_before(&self, vram: u32) -> Option<(u32, &str)> {
        let function = self.functions.range(..=vram).next_back();
        let data = self.data.range(..=vram).next_back();
        let (vram, name) = match (function, data) {
            (Some(f), Some(d)) if d.0 > f.0 => d,
            (Some(f), _) => f,
            (None, d) => d?,
        };
        Some((*vram, name.as_str()))
    }

    fn symbol_after(&self, vram: u32) -> Option<u32> {
        let next = vram.checked_add(1)?;
        let function = self.functions.range(next..).next().map(|(&v, _)| v);
        let data = self.data.range(next..).next().map(|(&v, _)| v);
        match (function, data) {
            (Some(f), Some(d)) => Some(f.min(d)),
            (f, d) => f.or(d),
        }
    }
}

/// A reversed range selects nothing instead of panicking in `BTreeMap::range`.
pub fn ordered(range: Range<u32>) -> Range<u32> { range.start..range.end.max(range.start) }
