//! Virtual filesystem layer.
//!
//! A single tree of named inodes addressed by [`InodeId`]. Directories keep
//! their children in insertion order; files carry an opaque data handle
//! owned by their filesystem provider. Providers attach to the tree through
//! the [`Superblock`] capability trait; the only one shipped with the
//! kernel is the read-only TAR provider used for the boot image.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod inode;
pub mod path;
pub mod superblock;
pub mod tarfs;
pub mod vfs;

pub use inode::{Inode, InodeId, InodeKind};
pub use superblock::{SbFlags, SbId, Superblock};
pub use vfs::Vfs;

use core::fmt;

/// Errors returned by VFS operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// No inode exists at the given path or id.
    NotFound,
    /// The operation needs a directory and got something else.
    NotADirectory,
    /// The operation needs a file and got something else.
    NotAFile,
    /// A sibling with the same name already exists.
    AlreadyExists,
    /// The inode's superblock does not provide this capability.
    NotSupported,
    /// The provider's backing data is malformed.
    InvalidData,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such inode"),
            Self::NotADirectory => write!(f, "not a directory"),
            Self::NotAFile => write!(f, "not a file"),
            Self::AlreadyExists => write!(f, "name already exists"),
            Self::NotSupported => write!(f, "operation not supported by provider"),
            Self::InvalidData => write!(f, "malformed filesystem data"),
        }
    }
}
