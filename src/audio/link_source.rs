//! Byte-range views of a file for the decoder library.
//!
//! A chained Ogg file holds several logical streams back to back. Each link
//! gets its own [`LinkSource`], a `MediaSource` whose reads, seeks and tells
//! are confined to the link's `[start, end)` interval, so the demuxer inside
//! the decoder library sees what looks like a standalone file.

use std::{
    fs::File,
    io::{Error, ErrorKind, Read, Result as IoResult, Seek, SeekFrom},
    path::Path,
};

use symphonia::core::io::MediaSource;

/// Byte interval of one link inside a physical file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRange {
    /// Offset of the first byte of the link.
    pub start: u64,
    /// Offset one past the last byte, `None` for "through end of file".
    pub end: Option<u64>,
}

impl LinkRange {
    /// The whole file.
    #[must_use]
    pub fn whole_file() -> Self {
        Self {
            start: 0,
            end: None,
        }
    }
}

/// A file handle scoped to a [`LinkRange`].
#[derive(Debug)]
pub struct LinkSource {
    file: File,
    start: u64,
    len: u64,
    pos: u64,
}

impl LinkSource {
    /// Opens a file and binds it to a byte range.
    ///
    /// # Arguments
    ///
    /// * `path` - File to open.
    /// * `range` - Byte interval of the link.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `LinkSource`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened, or `InvalidInput`
    /// when the range lies outside the file or is reversed.
    pub fn open<P: AsRef<Path>>(path: P, range: LinkRange) -> IoResult<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let end = range.end.unwrap_or(file_len).min(file_len);

        if range.start > end {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("link range {}..{end} is outside the file", range.start),
            ));
        }

        file.seek(SeekFrom::Start(range.start))?;

        Ok(Self {
            file,
            start: range.start,
            len: end - range.start,
            pos: 0,
        })
    }

    /// Length of the link in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the link is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Read for LinkSource {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let limit = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let read = self.file.read(&mut buf[..limit])?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl Seek for LinkSource {
    fn seek(&mut self, pos: SeekFrom) -> IoResult<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.pos) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.len) + i128::from(delta),
        };

        // Out-of-range targets land on the nearest link boundary.
        let clamped = target.clamp(0, i128::from(self.len)) as u64;
        self.file.seek(SeekFrom::Start(self.start + clamped))?;
        self.pos = clamped;
        Ok(clamped)
    }
}

impl MediaSource for LinkSource {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len)
    }
}
