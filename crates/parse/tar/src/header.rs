//! TAR header block parsing.
//!
//! A ustar header is one 512-byte block: a 100-byte NUL-padded path, a
//! handful of fixed-width octal ASCII fields, and a one-byte typeflag. Only
//! the path, size and typeflag are interpreted here.

use core::fmt;

/// Size of a TAR block; headers and file data are both 512-aligned.
pub const BLOCK_SIZE: usize = 512;

/// Byte length of the path field.
const PATH_LEN: usize = 100;

/// Offset of the size field within the header block.
const SIZE_OFFSET: usize = 124;

/// Number of octal digits in the size field.
const SIZE_DIGITS: usize = 11;

/// Offset of the typeflag byte within the header block.
const TYPEFLAG_OFFSET: usize = 156;

/// Typeflag for a regular file.
const TF_FILE: u8 = b'0';

/// Typeflag for a directory.
const TF_DIRECTORY: u8 = b'5';

/// Errors that can occur while parsing a TAR blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarError {
    /// The blob ends in the middle of a header or of file data.
    Truncated,
    /// The size field contains something other than octal ASCII digits.
    BadSize,
    /// The path field is not valid UTF-8.
    BadPath,
}

impl fmt::Display for TarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "archive truncated"),
            Self::BadSize => write!(f, "malformed octal size field"),
            Self::BadPath => write!(f, "malformed path field"),
        }
    }
}

/// The interpreted kind of an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file (typeflag `'0'`).
    File,
    /// A directory (typeflag `'5'`).
    Directory,
    /// Any other typeflag; consumers skip these.
    Other(u8),
}

impl EntryKind {
    fn from_typeflag(flag: u8) -> Self {
        match flag {
            TF_FILE => Self::File,
            TF_DIRECTORY => Self::Directory,
            other => Self::Other(other),
        }
    }
}

/// A parsed TAR header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TarHeader<'a> {
    /// Entry path as stored in the archive. Directory paths keep their
    /// trailing slash.
    pub path: &'a str,
    /// Entry kind from the typeflag byte.
    pub kind: EntryKind,
    /// File data size in bytes (0 for directories).
    pub size: usize,
}

impl<'a> TarHeader<'a> {
    /// Parse the header block at `offset` in `blob`.
    ///
    /// Returns `Ok(None)` for the end-of-archive marker (an empty path).
    ///
    /// # Errors
    ///
    /// Returns [`TarError`] if the block is truncated or a field is
    /// malformed.
    pub fn parse(blob: &'a [u8], offset: usize) -> Result<Option<Self>, TarError> {
        let Some(block) = blob.get(offset..offset + BLOCK_SIZE) else {
            return Err(TarError::Truncated);
        };

        if block[0] == 0 {
            return Ok(None);
        }

        let raw_path = &block[..PATH_LEN];
        let path_end = raw_path.iter().position(|&b| b == 0).unwrap_or(PATH_LEN);
        let path = core::str::from_utf8(&raw_path[..path_end]).map_err(|_| TarError::BadPath)?;

        let size = parse_octal(&block[SIZE_OFFSET..SIZE_OFFSET + SIZE_DIGITS])?;
        let kind = EntryKind::from_typeflag(block[TYPEFLAG_OFFSET]);

        Ok(Some(Self { path, kind, size }))
    }

    /// Distance in bytes from this header to the next one: one header block
    /// plus the file data rounded up to whole blocks.
    #[must_use]
    pub fn advance(&self) -> usize {
        let mut off = ((self.size / BLOCK_SIZE) + 1) * BLOCK_SIZE;
        if self.size % BLOCK_SIZE != 0 {
            off += BLOCK_SIZE;
        }
        off
    }
}

/// Parse a fixed-width octal ASCII field.
fn parse_octal(field: &[u8]) -> Result<usize, TarError> {
    let mut value = 0usize;
    for &b in field {
        if !b.is_ascii_digit() || b > b'7' {
            return Err(TarError::BadSize);
        }
        value = value * 8 + (b - b'0') as usize;
    }
    Ok(value)
}
