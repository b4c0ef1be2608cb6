//! Read-only TAR filesystem provider.
//!
//! Mounting attaches a fresh superblock to a caller-supplied directory and
//! builds the inode tree from the blob in two passes: directories first,
//! then files. Pass 1 relies on GNU tar emitting parents before children,
//! so each entry's parent directory already exists when the entry is
//! reached. The blob itself is borrowed, never copied and never freed.

use crate::inode::InodeId;
use crate::superblock::{SbFlags, Superblock};
use crate::vfs::Vfs;
use crate::{FsError, path};
use alloc::boxed::Box;
use alloc::string::String;
use core::any::Any;
use muon_tar::{EntryIter, EntryKind, TarEntry};

/// Per-file descriptor: where the file's bytes live inside the blob.
struct TarFile {
    offset: usize,
    len: usize,
}

/// The TAR provider's superblock.
struct TarFs {
    blob: &'static [u8],
}

impl Superblock for TarFs {
    fn name(&self) -> &'static str {
        "tarfs"
    }

    fn flags(&self) -> SbFlags {
        SbFlags::READ_ONLY | SbFlags::RAM_BACKED
    }

    fn rawptr(&self, data: &(dyn Any + Send)) -> Result<&'static [u8], FsError> {
        let file = data.downcast_ref::<TarFile>().ok_or(FsError::NotAFile)?;
        self.blob
            .get(file.offset..file.offset + file.len)
            .ok_or(FsError::InvalidData)
    }
}

/// Mounts `blob` as a read-only filesystem rooted at `root`.
///
/// `root` must be a directory; it is re-pointed at the new superblock, so a
/// later [`Vfs::umount`] of it tears the whole TAR tree down and returns
/// `root` to the VFS. The caller keeps ownership of the blob.
///
/// # Errors
///
/// Returns [`FsError::InvalidData`] for malformed archives,
/// [`FsError::NotFound`] when an entry's parent directory is missing (the
/// blob violates parent-before-child ordering), or
/// [`FsError::NotADirectory`] if `root` is not a directory.
pub fn mount(vfs: &mut Vfs, root: InodeId, blob: &'static [u8]) -> Result<(), FsError> {
    if !vfs.inode(root)?.is_directory() {
        return Err(FsError::NotADirectory);
    }

    let sb = vfs.register_superblock(Box::new(TarFs { blob }));
    vfs.set_superblock(root, sb)?;

    // Pass 1: directory inodes, in blob order.
    for entry in EntryIter::new(blob) {
        let entry = entry.map_err(|_| FsError::InvalidData)?;
        if entry.kind == EntryKind::Directory {
            let parent = parent_of(vfs, root, &entry)?;
            let name = path::filename(entry.path);
            vfs.new_directory(parent, String::from(name), sb)?;
        }
    }

    // Pass 2: file inodes, now that every parent exists.
    for entry in EntryIter::new(blob) {
        let entry = entry.map_err(|_| FsError::InvalidData)?;
        if entry.kind == EntryKind::File {
            let parent = parent_of(vfs, root, &entry)?;
            let name = path::filename(entry.path);
            let data = TarFile {
                offset: entry.data_offset,
                len: entry.size,
            };
            vfs.new_file(parent, String::from(name), sb, Box::new(data))?;
        }
    }

    Ok(())
}

fn parent_of(vfs: &Vfs, root: InodeId, entry: &TarEntry<'_>) -> Result<InodeId, FsError> {
    vfs.parent_dir(root, entry.path).ok_or(FsError::NotFound)
}
