use std::{
    collections::HashSet,
    io::{stdout, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use argp::FromArgs;
use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::{
    obj::FunctionEntry,
    util::{
        config::{write_function_table, write_function_table_file},
        file::map_file,
        functions::{match_functions, parse_exclusions, CountMismatchError},
    },
};

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Names unknown functions by pairing two disassembly trees.
#[argp(subcommand, name = "functions")]
pub struct Args {
    #[argp(positional)]
    /// disassembly with automatic function names
    reference_dir: PathBuf,
    #[argp(positional)]
    /// disassembly with assigned function names
    candidate_dir: PathBuf,
    #[argp(option, short = 'x')]
    /// file listing candidate-only functions, one per line
    exclude: Option<PathBuf>,
    #[argp(option, short = 'o')]
    /// output CSV (default: stdout)
    output: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct MatchSummary {
    functions: Vec<FunctionEntry>,
    files: usize,
    mismatched: usize,
}

pub fn run(args: Args) -> Result<()> {
    let excluded = match &args.exclude {
        Some(path) => {
            let file = map_file(path)?;
            parse_exclusions(file.as_reader())
                .with_context(|| format!("Failed to read '{}'", path.display()))?
        }
        None => HashSet::new(),
    };
    let summary = match_trees(&args.reference_dir, &args.candidate_dir, &excluded)?;
    info!(
        "Matched {} functions in {} files, {} files skipped",
        summary.functions.len(),
        summary.files,
        summary.mismatched
    );
    match &args.output {
        Some(path) => write_function_table_file(path, &summary.functions)?,
        None => {
            let mut out = stdout().lock();
            write_function_table(&mut out, &summary.functions)?;
            out.flush()?;
        }
    }
    Ok(())
}

/// Pairs every candidate `.s` file with the reference file at the same relative
/// path. Candidates without a reference are ignored.
fn match_trees(
    reference_dir: &Path,
    candidate_dir: &Path,
    excluded: &HashSet<String>,
) -> Result<MatchSummary> {
    let root = candidate_dir
        .to_str()
        .ok_or_else(|| anyhow!("Non UTF-8 path '{}'", candidate_dir.display()))?;
    let pattern = format!("{}/**/*.s", glob::Pattern::escape(root));
    let candidates = glob::glob(&pattern)?
        .collect::<Result<Vec<PathBuf>, _>>()?
        .into_iter()
        .sorted()
        .collect::<Vec<_>>();

    let mut summary = MatchSummary::default();
    for candidate in candidates {
        let relative = candidate.strip_prefix(candidate_dir)?;
        let reference = reference_dir.join(relative);
        if !reference.is_file() {
            continue;
        }
        match match_functions(&reference, &candidate, excluded) {
            Ok(pairs) => {
                debug!("{}: {} functions", relative.display(), pairs.len());
                summary
                    .functions
                    .extend(pairs.into_iter().map(|(vram, name)| FunctionEntry { vram, name }));
                summary.files += 1;
            }
            Err(e) => match e.downcast::<CountMismatchError>() {
                Ok(mismatch) => {
                    warn!("{}", mismatch);
                    summary.mismatched += 1;
                }
                Err(e) => return Err(e),
            },
        }
    }
    Ok(summary)
}
