//! Compile-time allocator configuration.

use muon_core::static_assert;

/// Total size of the heap arena in bytes.
pub const POOL_SIZE: usize = 64 * 1024;

/// Depth of the buddy tree. Orders run from 0 (the whole pool) to
/// `POOL_DEPTH - 1` (the smallest blocks).
pub const POOL_DEPTH: usize = 10;

/// Alignment guaranteed for every returned block, per the AAPCS.
pub const ALIGN: usize = 8;

/// Size of the smallest block handed out by the allocator.
pub const MIN_BLOCK: usize = POOL_SIZE >> (POOL_DEPTH - 1);

static_assert!(POOL_SIZE.is_power_of_two());
static_assert!(POOL_DEPTH >= 1);
static_assert!(POOL_SIZE >> POOL_DEPTH != 0, "depth too deep for pool size");
static_assert!(POOL_SIZE >> POOL_DEPTH >= ALIGN);
static_assert!(
    (POOL_SIZE >> POOL_DEPTH) % ALIGN == 0,
    "depth does not guarantee alignment"
);
