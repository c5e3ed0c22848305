use std::{
    collections::HashMap,
    error::Error,
    fmt,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::{
    analysis::{context::SymbolContext, Analysis, Analyzer},
    obj::split::{sort_splits, Split},
    util::file::buf_writer,
};

/// Creating or writing the output of one section failed. Sibling sections are
/// unaffected.
#[derive(Debug)]
pub struct SectionWriteError {
    pub path: PathBuf,
    pub source: anyhow::Error,
}

impl fmt::Display for SectionWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to write '{}': {:#}", self.path.display(), self.source)
    }
}

impl Error for SectionWriteError {}

#[derive(Debug, Default)]
pub struct PassResult {
    pub analyzed: usize,
    pub written: usize,
    /// Data symbols discovered by the code phase.
    pub data_symbols: usize,
    pub failures: Vec<SectionWriteError>,
}

fn display_path(split: &Split, asm_dir: &Path) -> String {
    format!("{}{}", asm_dir.join(&split.region).join(&split.name).display(), split.section_type)
}

fn analyze_phase<A: Analyzer>(
    analyzer: &A,
    splits: &[Split],
    context: &SymbolContext,
    asm_dir: &Path,
) -> Result<Vec<Analysis>> {
    splits
        .par_iter()
        .map(|split| {
            info!("Analyzing {} ...", display_path(split, asm_dir));
            analyzer.analyze(split, context)
        })
        .collect()
}

fn write_split<A: Analyzer>(
    analyzer: &A,
    split: &Split,
    analysis: &Analysis,
    context: &SymbolContext,
    asm_dir: &Path,
) -> Result<(), SectionWriteError> {
    let path = split.output_path(asm_dir);
    info!("Writing {} ...", display_path(split, asm_dir));
    let result = buf_writer(&path).and_then(|mut w| {
        analyzer.write(split, analysis, context, &mut w)?;
        w.flush()?;
        Ok(())
    });
    result.map_err(|source| SectionWriteError { path, source })
}

/// Analyzes and writes every split.
///
/// Splits are ordered by section type first. All code sections are analyzed
/// before any data section, and the references they discover are added to
/// `context` as data symbols in between. Sections are then written
/// independently: a failed write is reported in the result and does not stop
/// the others.
pub fn run_passes<A: Analyzer>(
    analyzer: &A,
    splits: &mut [Split],
    context: &mut SymbolContext,
    asm_dir: &Path,
) -> Result<PassResult> {
    sort_splits(splits);
    let code_count = splits.partition_point(|s| s.section_type.is_code());
    let (code, data) = splits.split_at(code_count);

    // Only the last split in sorted order is written for a shared output path
    let mut keep = vec![true; splits.len()];
    let mut owners = HashMap::new();
    for (idx, split) in splits.iter().enumerate() {
        let path = split.output_path(asm_dir);
        if let Some(prev) = owners.insert(path.clone(), idx) {
            warn!("Multiple sections write to '{}', the last one wins", path.display());
            keep[prev] = false;
        }
    }

    let mut analyses = analyze_phase(analyzer, code, context, asm_dir)?;
    let data_symbols =
        context.add_data_references(analyses.iter().flat_map(|a| a.references.iter().copied()));
    debug!("Code phase discovered {} data symbols", data_symbols);

    let context = &*context;
    analyses.extend(analyze_phase(analyzer, data, context, asm_dir)?);

    let failures: Vec<SectionWriteError> = splits
        .par_iter()
        .zip(analyses.par_iter())
        .zip(keep.par_iter())
        .filter(|(_, kept)| **kept)
        .filter_map(|((split, analysis), _)| {
            write_split(analyzer, split, analysis, context, asm_dir).err()
        })
        .collect();
    let kept = keep.iter().filter(|&&k| k).count();
    for failure in &failures {
        error!("{failure}");
    }
    Ok(PassResult {
        analyzed: splits.len(),
        written: kept - failures.len(),
        data_symbols,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        analysis::{words::WordAnalyzer, AnalyzerConfig},
        obj::SectionType,
    };

    fn split<'a>(name: &str, section_type: SectionType, vram: u32, data: &'a [u8]) -> Split<'a> {
        let size = if section_type.is_noload() { 0x10 } else { data.len() as u32 };
        Split {
            name: name.to_string(),
            region: "code".to_string(),
            section_type,
            rom: 0..size,
            vram: vram..vram + size,
            data,
        }
    }

    /// Records the order of analysis and the data symbols visible at each step.
    #[derive(Default)]
    struct RecordingAnalyzer {
        log: Mutex<Vec<(SectionType, usize)>>,
    }

    impl Analyzer for RecordingAnalyzer {
        fn analyze(&self, split: &Split, context: &SymbolContext) -> Result<Analysis> {
            self.log.lock().unwrap().push((split.section_type, context.data_count()));
            WordAnalyzer.analyze(split, context)
        }

        fn write(
            &self,
            split: &Split,
            analysis: &Analysis,
            context: &SymbolContext,
            w: &mut dyn Write,
        ) -> Result<()> {
            WordAnalyzer.write(split, analysis, context, w)
        }
    }

    #[test]
    fn test_code_phase_seeds_data() {
        let dir = tempfile::tempdir().unwrap();
        let code = [0x80u8, 0x01, 0x00, 0x10, 0x27, 0xBD, 0xFF, 0xE8];
        let data = [0x80u8, 0x01, 0x00, 0x10];
        let mut splits = vec![
            split("z_b", SectionType::Bss, 0x80020000, &[]),
            split("z_a", SectionType::Data, 0x80010010, &data),
            split("z_a", SectionType::Text, 0x80010000, &code),
        ];
        let mut context = SymbolContext::new(AnalyzerConfig::default());
        context.add_function(0x80010000, "Func_A");
        let analyzer = RecordingAnalyzer::default();
        let result = run_passes(&analyzer, &mut splits, &mut context, dir.path()).unwrap();

        assert_eq!(result.analyzed, 3);
        assert_eq!(result.written, 3);
        assert_eq!(result.data_symbols, 1);
        assert!(result.failures.is_empty());
        assert_eq!(splits[0].section_type, SectionType::Text);
        // Every data section saw the symbol discovered in code
        let log = analyzer.log.into_inner().unwrap();
        assert_eq!(log[0], (SectionType::Text, 0));
        assert!(log[1..].iter().all(|&(kind, count)| kind != SectionType::Text && count == 1));

        let text = std::fs::read_to_string(dir.path().join("data/code/z_a.s")).unwrap();
        assert!(text.contains("glabel D_80010010\n    .word D_80010010\n"));
        let text = std::fs::read_to_string(dir.path().join("text/code/z_a.s")).unwrap();
        assert!(text.contains("glabel Func_A\n"));
        assert!(dir.path().join("bss/code/z_b.s").is_file());
    }

    #[test]
    fn test_write_failure_skips_section() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the text directory should be
        std::fs::write(dir.path().join("text"), b"").unwrap();
        let code = [0u8; 4];
        let data = [0u8; 4];
        let mut splits = vec![
            split("z_a", SectionType::Text, 0x80010000, &code),
            split("z_a", SectionType::Rodata, 0x80010010, &data),
        ];
        let mut context = SymbolContext::new(AnalyzerConfig::default());
        let result = run_passes(&WordAnalyzer, &mut splits, &mut context, dir.path()).unwrap();
        assert_eq!(result.written, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].path, dir.path().join("text/code/z_a.s"));
        assert!(dir.path().join("rodata/code/z_a.s").is_file());
    }

    #[test]
    fn test_duplicate_output_keeps_last() {
        let dir = tempfile::tempdir().unwrap();
        let first = [0x11u8; 4];
        let second = [0x22u8; 4];
        let mut splits = vec![
            split("z_a", SectionType::Data, 0x80010000, &first),
            split("z_a", SectionType::Data, 0x80010010, &second),
        ];
        let mut context = SymbolContext::new(AnalyzerConfig::default());
        let result = run_passes(&WordAnalyzer, &mut splits, &mut context, dir.path()).unwrap();
        assert_eq!(result.analyzed, 2);
        assert_eq!(result.written, 1);
        let text = std::fs::read_to_string(dir.path().join("data/code/z_a.s")).unwrap();
        assert!(text.contains("0x22222222"));
        assert!(!text.contains("0x11111111"));
    }

    #[test]
    fn test_analysis_errors_abort() {
        let dir = tempfile::tempdir().unwrap();
        let junk = [0u8; 0x20];
        let mut splits = vec![split("ovl_bad", SectionType::Reloc, 0x80800000, &junk)];
        let mut context = SymbolContext::new(AnalyzerConfig::default());
        assert!(run_passes(&WordAnalyzer, &mut splits, &mut context, dir.path()).is_err());
    }
}
