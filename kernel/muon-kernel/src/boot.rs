//! Kernel bring-up wiring.
//!
//! The board's startup code owns the hardware half of boot (vector table,
//! clocks, debug channel, heap pool and stack region addresses from the
//! linker script, `SchedHw`); [`init_kernel`] wires the software half in
//! dependency order: symbol table, VFS, module registry, `/initrd` mount
//! and the kernel symbol exports.

use crate::module::{self, InvokeFn};
use crate::symbols;
use muon_core::{kinfo, ktrace};
use muon_fs::{FsError, InodeId, Vfs, tarfs, vfs};

/// Brings the kernel subsystems up and mounts the boot image at
/// `/initrd`.
///
/// The heap must already be initialized (`muon_mm::heap::init`); the
/// scheduler is armed separately (`muon_sched::init`) and stays dormant
/// until the first spawn.
///
/// # Errors
///
/// Propagates [`FsError`] when the mount point cannot be created or the
/// TAR blob is rejected.
///
/// # Panics
///
/// Panics if called twice (the subsystem singletons refuse double init).
pub fn init_kernel(initrd: &'static [u8], invoke: InvokeFn) -> Result<(), FsError> {
    symbols::init();
    vfs::init();
    module::init(invoke);

    vfs::with_vfs_mut(|fs| {
        let root = fs.root();
        let mount_point = fs.mkdir(root, "initrd")?;
        tarfs::mount(fs, mount_point, initrd)
    })?;
    kinfo!("initrd mounted");

    symbols::with_symbols(crate::exports::export_kernel_symbols);
    kinfo!("exported kernel symbols");

    Ok(())
}

/// Logs the tree below `node` on the trace channel, one indented name per
/// line.
pub fn dump_tree(fs: &Vfs, node: InodeId, indent: usize) {
    if let Ok(inode) = fs.inode(node) {
        ktrace!("{:indent$}{}", "", inode.name());
        if inode.is_directory() {
            for child in fs.children(node) {
                dump_tree(fs, child, indent + 2);
            }
        }
    }
}
