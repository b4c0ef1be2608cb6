//! The VFS tree and its operations.
//!
//! Inodes live in an id-addressed slot arena owned by [`Vfs`]; sibling and
//! child links are slot indices, and slot 0 is always the root directory.
//! Providers are registered as boxed [`Superblock`]s in a parallel
//! registry. A mounted provider owns the subtree below its mount point;
//! teardown of foreign subtrees is delegated to the owning provider.

use crate::inode::{Inode, InodeId, InodeKind};
use crate::superblock::{SbId, Superblock};
use crate::{FsError, path};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use muon_core::SpinLock;

/// The VFS's own provider: owns the root and every directory created with
/// [`Vfs::mkdir`] under VFS-owned directories.
struct VfsSuper;

impl Superblock for VfsSuper {
    fn name(&self) -> &'static str {
        "vfs"
    }

    fn supports_mkdir(&self) -> bool {
        true
    }
}

/// The virtual filesystem tree.
pub struct Vfs {
    inodes: Vec<Option<Inode>>,
    supers: Vec<Option<Box<dyn Superblock>>>,
    vfs_sb: SbId,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    /// Creates a tree holding only the root directory `/`.
    #[must_use]
    pub fn new() -> Self {
        let mut vfs = Self {
            inodes: Vec::new(),
            supers: Vec::new(),
            vfs_sb: SbId(0),
        };
        vfs.vfs_sb = vfs.register_superblock(Box::new(VfsSuper));
        let root = vfs.alloc_inode(Inode {
            name: String::from("/"),
            kind: InodeKind::Directory {
                first: None,
                last: None,
            },
            sibling: None,
            sb: vfs.vfs_sb,
        });
        debug_assert_eq!(root, InodeId(0));
        vfs
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> InodeId {
        InodeId(0)
    }

    /// The VFS's own superblock id.
    #[must_use]
    pub fn vfs_superblock(&self) -> SbId {
        self.vfs_sb
    }

    // ── Arena access ────────────────────────────────────────────────────

    /// Returns the inode at `id`.
    ///
    /// # Errors
    ///
    /// [`FsError::NotFound`] if the slot is vacant or out of range.
    pub fn inode(&self, id: InodeId) -> Result<&Inode, FsError> {
        self.inodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(FsError::NotFound)
    }

    fn inode_mut(&mut self, id: InodeId) -> Result<&mut Inode, FsError> {
        self.inodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(FsError::NotFound)
    }

    fn alloc_inode(&mut self, inode: Inode) -> InodeId {
        if let Some(slot) = self.inodes.iter().position(Option::is_none) {
            self.inodes[slot] = Some(inode);
            InodeId(slot)
        } else {
            self.inodes.push(Some(inode));
            InodeId(self.inodes.len() - 1)
        }
    }

    /// Number of live inodes, root included. Used by teardown tests.
    #[must_use]
    pub fn live_inodes(&self) -> usize {
        self.inodes.iter().filter(|slot| slot.is_some()).count()
    }

    // ── Superblock registry ─────────────────────────────────────────────

    /// Registers a filesystem provider and returns its id.
    pub fn register_superblock(&mut self, sb: Box<dyn Superblock>) -> SbId {
        if let Some(slot) = self.supers.iter().position(Option::is_none) {
            self.supers[slot] = Some(sb);
            SbId(slot)
        } else {
            self.supers.push(Some(sb));
            SbId(self.supers.len() - 1)
        }
    }

    /// Returns the provider registered under `id`.
    ///
    /// # Errors
    ///
    /// [`FsError::NotFound`] if the slot is vacant or out of range.
    pub fn superblock(&self, id: SbId) -> Result<&dyn Superblock, FsError> {
        self.supers
            .get(id.0)
            .and_then(Option::as_ref)
            .map(Box::as_ref)
            .ok_or(FsError::NotFound)
    }

    /// Re-points an inode at another superblock. Used when mounting a
    /// provider over an existing directory.
    ///
    /// # Errors
    ///
    /// [`FsError::NotFound`] if the inode does not exist.
    pub fn set_superblock(&mut self, id: InodeId, sb: SbId) -> Result<(), FsError> {
        self.inode_mut(id)?.sb = sb;
        Ok(())
    }

    // ── Tree construction ───────────────────────────────────────────────

    fn link_child(&mut self, parent: InodeId, child: InodeId) -> Result<(), FsError> {
        let prev_last = match &self.inode(parent)?.kind {
            InodeKind::Directory { last, .. } => *last,
            InodeKind::File { .. } => return Err(FsError::NotADirectory),
        };
        if let Some(prev_last) = prev_last {
            self.inode_mut(prev_last)?.sibling = Some(child);
        }
        if let InodeKind::Directory { first, last } = &mut self.inode_mut(parent)?.kind {
            if first.is_none() {
                *first = Some(child);
            }
            *last = Some(child);
        }
        Ok(())
    }

    /// Creates a directory inode under `parent`, owned by `sb`, preserving
    /// insertion order in the child list.
    ///
    /// # Errors
    ///
    /// [`FsError::NotADirectory`] if `parent` is not a directory.
    pub fn new_directory(
        &mut self,
        parent: InodeId,
        name: String,
        sb: SbId,
    ) -> Result<InodeId, FsError> {
        if !self.inode(parent)?.is_directory() {
            return Err(FsError::NotADirectory);
        }
        let id = self.alloc_inode(Inode {
            name,
            kind: InodeKind::Directory {
                first: None,
                last: None,
            },
            sibling: None,
            sb,
        });
        self.link_child(parent, id)?;
        Ok(id)
    }

    /// Creates a file inode under `parent`, owned by `sb`, with the given
    /// provider data handle.
    ///
    /// # Errors
    ///
    /// [`FsError::NotADirectory`] if `parent` is not a directory.
    pub fn new_file(
        &mut self,
        parent: InodeId,
        name: String,
        sb: SbId,
        data: Box<dyn core::any::Any + Send>,
    ) -> Result<InodeId, FsError> {
        if !self.inode(parent)?.is_directory() {
            return Err(FsError::NotADirectory);
        }
        let id = self.alloc_inode(Inode {
            name,
            kind: InodeKind::File { data },
            sibling: None,
            sb,
        });
        self.link_child(parent, id)?;
        Ok(id)
    }

    // ── Lookup ──────────────────────────────────────────────────────────

    /// Finds a direct child of `dir` by name with a linear sibling scan.
    ///
    /// Returns `None` if `dir` is not a directory or has no such child.
    #[must_use]
    pub fn find_child(&self, dir: InodeId, name: &str) -> Option<InodeId> {
        self.children(dir).find(|&id| {
            self.inode(id)
                .map(|inode| inode.name() == name)
                .unwrap_or(false)
        })
    }

    /// Iterates the children of `dir` in insertion order.
    pub fn children(&self, dir: InodeId) -> impl Iterator<Item = InodeId> + '_ {
        let first = match self.inode(dir).map(|i| &i.kind) {
            Ok(InodeKind::Directory { first, .. }) => *first,
            _ => None,
        };
        ChildIter { vfs: self, next: first }
    }

    /// Resolves the directory containing the final component of `path`,
    /// starting from `base`. Components are resolved with linear sibling
    /// searches; an intermediate component that is not a directory fails
    /// the resolution.
    #[must_use]
    pub fn parent_dir(&self, base: InodeId, path: &str) -> Option<InodeId> {
        let mut dir = base;
        let mut iter = path::components(path).peekable();
        while let Some(component) = iter.next() {
            if iter.peek().is_none() {
                break;
            }
            dir = self.find_child(dir, component)?;
            if !self.inode(dir).ok()?.is_directory() {
                return None;
            }
        }
        Some(dir)
    }

    /// Resolves an absolute path to an inode.
    ///
    /// Paths are `/`-separated; a trailing slash is tolerated. Returns
    /// `None` for relative paths and unresolvable components.
    #[must_use]
    pub fn find(&self, abs_path: &str) -> Option<InodeId> {
        if !path::is_absolute(abs_path) {
            return None;
        }
        let name = path::filename(abs_path);
        if name.is_empty() {
            return Some(self.root());
        }
        let parent = self.parent_dir(self.root(), abs_path)?;
        self.find_child(parent, name)
    }

    // ── Capabilities ────────────────────────────────────────────────────

    /// Creates a directory named `name` under `dir`, provided `dir` is a
    /// directory, carries no equally named child, and its superblock
    /// advertises mkdir. A trailing slash in `name` is stripped.
    ///
    /// # Errors
    ///
    /// [`FsError::NotADirectory`], [`FsError::AlreadyExists`] or
    /// [`FsError::NotSupported`] when one of the three conditions fails.
    pub fn mkdir(&mut self, dir: InodeId, name: &str) -> Result<InodeId, FsError> {
        let node = self.inode(dir)?;
        if !node.is_directory() {
            return Err(FsError::NotADirectory);
        }
        let sb = node.sb;
        if !self.superblock(sb)?.supports_mkdir() {
            return Err(FsError::NotSupported);
        }
        let clean = name.trim_end_matches('/');
        if self.find_child(dir, clean).is_some() {
            return Err(FsError::AlreadyExists);
        }
        self.new_directory(dir, String::from(clean), sb)
    }

    /// Reads a file as a contiguous buffer by delegating to its provider.
    ///
    /// # Errors
    ///
    /// [`FsError::NotAFile`] for directories, or whatever the provider
    /// returns.
    pub fn rawptr(&self, file: InodeId) -> Result<&'static [u8], FsError> {
        let node = self.inode(file)?;
        let data = node.file_data().ok_or(FsError::NotAFile)?;
        self.superblock(node.sb)?.rawptr(data)
    }

    // ── Teardown ────────────────────────────────────────────────────────

    /// Recursively destroys the subtree below `root`.
    ///
    /// Inodes owned by `root`'s provider are reclaimed directly; a foreign
    /// subtree encountered on the way is delegated to its own provider
    /// (its `on_umount` hook runs and its superblock is unregistered).
    /// When `root` itself is a mount point, it survives as an empty
    /// directory owned by the VFS again.
    ///
    /// # Errors
    ///
    /// [`FsError::NotADirectory`] if `root` is not a directory.
    pub fn umount(&mut self, root: InodeId) -> Result<(), FsError> {
        let owner = self.inode(root)?.sb;
        self.empty_subtree(root, owner)?;
        if owner != self.vfs_sb {
            if let Some(mut sb) = self.supers.get_mut(owner.0).and_then(Option::take) {
                sb.on_umount();
            }
            self.inode_mut(root)?.sb = self.vfs_sb;
        }
        Ok(())
    }

    fn empty_subtree(&mut self, dir: InodeId, owner: SbId) -> Result<(), FsError> {
        let mut next = match &self.inode(dir)?.kind {
            InodeKind::Directory { first, .. } => *first,
            InodeKind::File { .. } => return Err(FsError::NotADirectory),
        };

        while let Some(child) = next {
            let node = self.inode(child)?;
            next = node.sibling;
            let child_sb = node.sb;
            let child_is_dir = node.is_directory();

            if child_sb != owner {
                // Mount point: its provider owns the subtree below.
                if child_is_dir {
                    self.empty_subtree(child, child_sb)?;
                }
                if let Some(mut sb) = self.supers.get_mut(child_sb.0).and_then(Option::take) {
                    sb.on_umount();
                }
            } else if child_is_dir {
                self.empty_subtree(child, owner)?;
            }
            self.inodes[child.0] = None;
        }

        if let InodeKind::Directory { first, last } = &mut self.inode_mut(dir)?.kind {
            *first = None;
            *last = None;
        }
        Ok(())
    }
}

struct ChildIter<'a> {
    vfs: &'a Vfs,
    next: Option<InodeId>,
}

impl Iterator for ChildIter<'_> {
    type Item = InodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = self.vfs.inode(id).ok()?.sibling;
        Some(id)
    }
}

/// Global VFS instance.
static VFS: SpinLock<Option<Vfs>> = SpinLock::new(None);

/// Initialize the global VFS.
///
/// # Panics
///
/// Panics if the VFS has already been initialized.
pub fn init() {
    let mut vfs = VFS.lock();
    assert!(vfs.is_none(), "VFS already initialized");
    *vfs = Some(Vfs::new());
}

/// Execute a closure with a shared reference to the global VFS.
///
/// # Panics
///
/// Panics if the VFS has not been initialized.
pub fn with_vfs<R>(f: impl FnOnce(&Vfs) -> R) -> R {
    VFS.with_init("VFS", |vfs| f(vfs))
}

/// Execute a closure with a mutable reference to the global VFS.
///
/// # Panics
///
/// Panics if the VFS has not been initialized.
pub fn with_vfs_mut<R>(f: impl FnOnce(&mut Vfs) -> R) -> R {
    VFS.with_init("VFS", f)
}
