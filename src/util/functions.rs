use std::{
    collections::HashSet,
    error::Error,
    fmt,
    io::BufRead,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::util::file::map_file;

/// Prefix of compiler-generated data labels.
pub const DATA_LABEL_PREFIX: &str = "D_";
pub const GLOBAL_LABEL_DIRECTIVE: &str = "glabel ";

static UNKNOWN_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new("^func_(?P<addr>[0-9A-F]{8})_unknown$").unwrap());

/// The two files declare a different number of eligible labels, so their
/// labels cannot be paired by position.
#[derive(Debug)]
pub struct CountMismatchError {
    pub file: PathBuf,
    pub reference: usize,
    pub candidate: usize,
}

impl fmt::Display for CountMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.file.file_name().unwrap_or(self.file.as_os_str());
        write!(
            f,
            "{}: different number of functions reference={} candidate={}",
            name.to_string_lossy(),
            self.reference,
            self.candidate
        )
    }
}

impl Error for CountMismatchError {}

/// Collects `glabel` names in file order, without data labels and `excluded`.
pub fn scan_global_labels<R: BufRead>(r: R, excluded: &HashSet<String>) -> Result<Vec<String>> {
    let mut labels = Vec::new();
    for line in r.lines() {
        let line = line?;
        let Some(rest) = line.strip_prefix(GLOBAL_LABEL_DIRECTIVE) else {
            continue;
        };
        let Some(name) = rest.split_whitespace().next() else {
            continue;
        };
        if name.starts_with(DATA_LABEL_PREFIX) || excluded.contains(name) {
            continue;
        }
        labels.push(name.to_string());
    }
    Ok(labels)
}

/// The address encoded in an automatic `func_XXXXXXXX_unknown` name.
pub fn unknown_function_address(name: &str) -> Option<u32> {
    let captures = UNKNOWN_FUNCTION.captures(name)?;
    u32::from_str_radix(&captures["addr"], 16).ok()
}

/// Pairs labels by position and propagates candidate names onto addresses
/// encoded in automatic reference names.
///
/// Pairing by position only identifies the same function when both trees
/// are structurally identical apart from naming. A label inserted in one tree
/// and removed elsewhere in the same file goes unnoticed.
pub fn pair_labels(
    file: &Path,
    reference: &[String],
    candidate: &[String],
) -> Result<Vec<(u32, String)>, CountMismatchError> {
    if reference.len() != candidate.len() {
        return Err(CountMismatchError {
            file: file.to_path_buf(),
            reference: reference.len(),
            candidate: candidate.len(),
        });
    }
    Ok(reference
        .iter()
        .zip(candidate)
        .filter_map(|(r, c)| unknown_function_address(r).map(|addr| (addr, c.clone())))
        .collect())
}

/// Matches one reference file against a candidate file.
///
/// Exclusions only apply to the candidate: they name functions that exist in
/// the candidate build alone. A [`CountMismatchError`] is returned through
/// `anyhow` so callers can downcast and continue with other pairs.
pub fn match_functions(
    reference: &Path,
    candidate: &Path,
    excluded: &HashSet<String>,
) -> Result<Vec<(u32, String)>> {
    let reference_labels = scan_file(reference, &HashSet::new())?;
    let candidate_labels = scan_file(candidate, excluded)?;
    Ok(pair_labels(candidate, &reference_labels, &candidate_labels)?)
}

fn scan_file(path: &Path, excluded: &HashSet<String>) -> Result<Vec<String>> {
    let file = map_file(path)?;
    scan_global_labels(file.as_reader(), excluded)
        .with_context(|| format!("Failed to scan '{}'", path.display()))
}

/// Reads an exclusion list: one name per line, `#` starts a comment.
pub fn parse_exclusions<R: BufRead>(r: R) -> Result<HashSet<String>> {
    let mut names = HashSet::new();
    for line in r.lines() {
        let line = line?;
        let name = line.split('#').next().unwrap_or_default().trim();
        if !name.is_empty() {
            names.insert(name.to_string());
        }
    }
    Ok(names)
}
