//! Opening and re-reading a single redo log file's header (spec.md §3, §6).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use redo_format::header::{FileHeader, HeaderError};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum FileOpenError {
    #[snafu(display("failed to open {}: {source}", path.display()))]
    Open { path: PathBuf, source: std::io::Error },
    #[snafu(display("failed to read header of {}: {source}", path.display()))]
    ReadHeader { path: PathBuf, source: std::io::Error },
    #[snafu(display("bad header in {}: {source}", path.display()))]
    BadHeader { path: PathBuf, source: HeaderError },
}

/// A single on-disk redo log file: its handle and the most recently parsed
/// header (re-parsed on every [`LogFile::reload_header`] call, since an
/// online log's header gains a `next_scn` only after it closes).
pub struct LogFile {
    path: PathBuf,
    file: File,
    pub header: FileHeader,
}

impl LogFile {
    pub fn open(path: impl AsRef<Path>, compat_version: u32) -> Result<LogFile, FileOpenError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).context(OpenSnafu { path: path.clone() })?;
        let header = Self::read_header(&mut file, &path, compat_version)?;
        Ok(LogFile { path, file, header })
    }

    fn read_header(file: &mut File, path: &Path, compat_version: u32) -> Result<FileHeader, FileOpenError> {
        let mut block = [0u8; 512];
        file.seek(SeekFrom::Start(0)).context(ReadHeaderSnafu { path: path.to_path_buf() })?;
        file.read_exact(&mut block).context(ReadHeaderSnafu { path: path.to_path_buf() })?;
        FileHeader::parse(&block, compat_version).context(BadHeaderSnafu { path: path.to_path_buf() })
    }

    /// Re-reads the header; used on an `Empty` outcome for an online log, to
    /// pick up a `next_scn` the database has since written (spec.md §4.2,
    /// "Header reload").
    pub fn reload_header(&mut self, compat_version: u32) -> Result<(), FileOpenError> {
        self.header = Self::read_header(&mut self.file, &self.path, compat_version)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads `len` bytes starting at block `block_number` (blocks are
    /// `header.block_size` bytes, 0-indexed including the header blocks).
    pub fn read_block(&mut self, block_number: u32, len: usize) -> std::io::Result<Vec<u8>> {
        let offset = block_number as u64 * self.header.block_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn file_len(&self) -> std::io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}
