//! Filesystem provider capabilities.

use crate::FsError;
use bitflags::bitflags;
use core::any::Any;

/// Index of a superblock slot inside the [`crate::Vfs`] registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbId(pub(crate) usize);

bitflags! {
    /// Per-filesystem property flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SbFlags: u32 {
        /// The filesystem cannot be modified.
        const READ_ONLY = 1 << 0;
        /// The filesystem's backing store lives in RAM.
        const RAM_BACKED = 1 << 1;
    }
}

/// The capability set a filesystem provider exposes to the VFS.
///
/// Every method except [`name`](Self::name) has a default-failure or no-op
/// implementation; a provider implements exactly the capabilities it
/// advertises.
pub trait Superblock: Send {
    /// Short provider name for diagnostics.
    fn name(&self) -> &'static str;

    /// Property flags.
    fn flags(&self) -> SbFlags {
        SbFlags::empty()
    }

    /// Whether directories may be created under inodes of this provider.
    fn supports_mkdir(&self) -> bool {
        false
    }

    /// Reads a file as a contiguous buffer, given its per-file data handle.
    ///
    /// # Errors
    ///
    /// [`FsError::NotSupported`] unless the provider implements it.
    fn rawptr(&self, data: &(dyn Any + Send)) -> Result<&'static [u8], FsError> {
        let _ = data;
        Err(FsError::NotSupported)
    }

    /// Notification that the provider's subtree has been torn down. The
    /// inodes themselves are reclaimed by the VFS.
    fn on_umount(&mut self) {}
}
