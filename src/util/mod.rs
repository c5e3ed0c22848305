use std::{
    error::Error,
    fmt,
    path::{Path, PathBuf},
};

pub mod config;
pub mod file;
pub mod functions;
pub mod map;

/// Input (map file, table or ROM image) that does not have the expected shape.
///
/// Tables derived from malformed input would be silently wrong, so this error
/// always aborts the run.
#[derive(Debug)]
pub struct MalformedInputError {
    pub path: Option<PathBuf>,
    pub line: Option<usize>,
    pub message: String,
}

impl MalformedInputError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { path: None, line: None, message: message.into() }
    }

    pub fn at_line(line: usize, message: impl Into<String>) -> Self {
        Self { path: None, line: Some(line), message: message.into() }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for MalformedInputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.path, self.line) {
            (Some(path), Some(line)) => write!(f, "{}:{}: {}", path.display(), line, self.message),
            (Some(path), None) => write!(f, "{}: {}", path.display(), self.message),
            (None, Some(line)) => write!(f, "line {}: {}", line, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl Error for MalformedInputError {}

/// Attaches `path` to a [`MalformedInputError`], or adds it as context to any
/// other error.
pub fn attach_path(e: anyhow::Error, path: &Path) -> anyhow::Error {
    match e.downcast::<MalformedInputError>() {
        Ok(malformed) => malformed.with_path(path).into(),
        Err(e) => e.context(format!("Failed to read '{}'", path.display())),
    }
}

/// Parses a hexadecimal field with or without a `0x` prefix.
pub fn parse_hex(s: &str) -> Result<u32, std::num::ParseIntError> {
    let s = s.trim();
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u32::from_str_radix(s, 16)
}

/// Reads a big-endian word at `offset`.
#[inline]
pub fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes(bytes.try_into().ok()?))
}
