use std::{
    fs::{DirBuilder, File},
    io::{BufWriter, Cursor},
    path::Path,
};

use anyhow::{Context, Result};
use memmap2::{Mmap, MmapOptions};

/// A read-only memory mapped file.
pub struct MappedFile {
    mmap: Option<Mmap>,
}

impl MappedFile {
    #[inline]
    pub fn as_slice(&self) -> &[u8] { self.mmap.as_deref().unwrap_or(&[]) }

    #[inline]
    pub fn as_reader(&self) -> Cursor<&[u8]> { Cursor::new(self.as_slice()) }

    #[inline]
    pub fn len(&self) -> usize { self.as_slice().len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.as_slice().is_empty() }
}

/// Opens a memory mapped file.
pub fn map_file<P>(path: P) -> Result<MappedFile>
where P: AsRef<Path> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("Failed to open file '{}'", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("Failed to stat file '{}'", path.display()))?
        .len();
    // Zero-length mappings are rejected on some platforms
    if len == 0 {
        return Ok(MappedFile { mmap: None });
    }
    let mmap = unsafe { MmapOptions::new().map(&file) }
        .with_context(|| format!("Failed to mmap file: '{}'", path.display()))?;
    Ok(MappedFile { mmap: Some(mmap) })
}

/// Reads a whole text file, mapping it first.
pub fn read_text<P>(path: P) -> Result<String>
where P: AsRef<Path> {
    let path = path.as_ref();
    let file = map_file(path)?;
    let text = std::str::from_utf8(file.as_slice())
        .with_context(|| format!("'{}' is not valid UTF-8", path.display()))?;
    Ok(text.to_string())
}

/// Creates a buffered writer around a file (not memory mapped).
pub fn buf_writer<P>(path: P) -> Result<BufWriter<File>>
where P: AsRef<Path> {
    if let Some(parent) = path.as_ref().parent() {
        DirBuilder::new().recursive(true).create(parent).with_context(|| {
            format!("Failed to create directory '{}'", parent.display())
        })?;
    }
    let file = File::create(&path)
        .with_context(|| format!("Failed to create file '{}'", path.as_ref().display()))?;
    Ok(BufWriter::new(file))
}
