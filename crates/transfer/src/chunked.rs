use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::plan::PartRange;
use crate::Error;

/// Returns the size of the regular file at `path`.
pub fn file_size(path: &Path) -> Result<u64, Error> {
    let meta = std::fs::metadata(path).map_err(|e| {
        Error::InvalidInput(format!("cannot stat {}: {e}", path.display()))
    })?;
    if !meta.is_file() {
        return Err(Error::InvalidInput(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    Ok(meta.len())
}

// ---------------------------------------------------------------------------
// PartReader
// ---------------------------------------------------------------------------

/// Reads individual parts of a source file by byte range.
///
/// Only one part is held in memory at a time.
pub struct PartReader {
    file: std::fs::File,
    path: PathBuf,
    file_size: u64,
}

impl PartReader {
    /// Opens `path` for part reads.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            file_size,
        })
    }

    /// Reads exactly `length` bytes starting at `offset`.
    ///
    /// Fails with [`Error::InvalidInput`] if the range runs past the end of
    /// the file, which happens when the file shrank after planning.
    pub fn read_range(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, Error> {
        let end = offset.checked_add(length).ok_or_else(|| {
            Error::InvalidInput(format!("range {offset}+{length} overflows"))
        })?;
        if end > self.file_size {
            return Err(Error::InvalidInput(format!(
                "{} is {} bytes, cannot read {length} bytes at offset {offset}",
                self.path.display(),
                self.file_size
            )));
        }

        let len = usize::try_from(length)
            .map_err(|_| Error::InvalidInput(format!("part of {length} bytes is too large")))?;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads the bytes of one planned part.
    pub fn read_part(&mut self, range: &PartRange) -> Result<Vec<u8>, Error> {
        self.read_range(range.offset, range.length)
    }

    /// Size of the file when it was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Path of the source file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
