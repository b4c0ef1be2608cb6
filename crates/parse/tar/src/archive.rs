//! Archive entry iteration.

use crate::header::{BLOCK_SIZE, EntryKind, TarError, TarHeader};

/// One archive entry with the location of its data in the blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TarEntry<'a> {
    /// Entry path as stored in the archive.
    pub path: &'a str,
    /// Entry kind.
    pub kind: EntryKind,
    /// File data size in bytes.
    pub size: usize,
    /// Byte offset of the file data inside the blob (header offset + 512).
    pub data_offset: usize,
}

impl<'a> TarEntry<'a> {
    /// Returns the entry's data slice out of the given blob.
    ///
    /// Returns `None` if the blob is shorter than the declared size.
    #[must_use]
    pub fn data(&self, blob: &'a [u8]) -> Option<&'a [u8]> {
        blob.get(self.data_offset..self.data_offset + self.size)
    }
}

/// An iterator over the entries of a TAR blob.
///
/// Iteration stops at the first empty-path header. Parse errors are yielded
/// once, after which the iterator is exhausted.
pub struct EntryIter<'a> {
    blob: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> EntryIter<'a> {
    /// Creates an iterator over the entries of `blob`.
    #[must_use]
    pub fn new(blob: &'a [u8]) -> Self {
        Self {
            blob,
            offset: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for EntryIter<'a> {
    type Item = Result<TarEntry<'a>, TarError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match TarHeader::parse(self.blob, self.offset) {
            Ok(Some(header)) => {
                let entry = TarEntry {
                    path: header.path,
                    kind: header.kind,
                    size: header.size,
                    data_offset: self.offset + BLOCK_SIZE,
                };
                self.offset += header.advance();
                Some(Ok(entry))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Append a header block plus zero-padded data for `content`.
    fn push_entry(blob: &mut Vec<u8>, path: &str, typeflag: u8, content: &[u8]) {
        let mut block = [0u8; BLOCK_SIZE];
        block[..path.len()].copy_from_slice(path.as_bytes());
        let octal = format!("{:011o}", content.len());
        block[124..135].copy_from_slice(octal.as_bytes());
        block[156] = typeflag;
        blob.extend_from_slice(&block);

        if !content.is_empty() {
            let padded = content.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
            let start = blob.len();
            blob.resize(start + padded, 0);
            blob[start..start + content.len()].copy_from_slice(content);
        }
    }

    fn terminate(blob: &mut Vec<u8>) {
        blob.extend_from_slice(&[0u8; 2 * BLOCK_SIZE]);
    }

    #[test]
    fn iterate_mixed_entries() {
        let mut blob = Vec::new();
        push_entry(&mut blob, "a/", b'5', b"");
        push_entry(&mut blob, "a/hello", b'0', b"hello world");
        push_entry(&mut blob, "a/link", b'2', b"");
        terminate(&mut blob);

        let entries: Vec<_> = EntryIter::new(&blob).map(Result::unwrap).collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].path, "a/");
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[1].path, "a/hello");
        assert_eq!(entries[1].data(&blob).unwrap(), b"hello world");
        assert_eq!(entries[2].kind, EntryKind::Other(b'2'));
    }

    #[test]
    fn data_offset_is_past_header() {
        let mut blob = Vec::new();
        push_entry(&mut blob, "f", b'0', &[0xAA; 700]);
        terminate(&mut blob);

        let entry = EntryIter::new(&blob).next().unwrap().unwrap();
        assert_eq!(entry.data_offset, BLOCK_SIZE);
        assert_eq!(entry.size, 700);
        assert_eq!(entry.data(&blob).unwrap(), &[0xAA; 700][..]);

        // The next entry starts two data blocks later.
        let second = blob.len() - 2 * BLOCK_SIZE;
        assert_eq!(second, BLOCK_SIZE + 2 * BLOCK_SIZE);
    }

    #[test]
    fn empty_blob_yields_nothing() {
        let blob = [0u8; 2 * BLOCK_SIZE];
        assert_eq!(EntryIter::new(&blob).count(), 0);
    }

    #[test]
    fn truncated_blob_yields_error() {
        let mut blob = Vec::new();
        push_entry(&mut blob, "f", b'0', b"data");
        // Strip the padding and terminator so the next header read runs off
        // the end.
        blob.truncate(BLOCK_SIZE + 4);
        blob.extend_from_slice(&[1u8; 8]);

        let results: Vec<_> = EntryIter::new(&blob).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_eq!(results[1], Err(TarError::Truncated));
    }
}
