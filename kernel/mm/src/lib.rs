//! Memory management for the muon kernel.
//!
//! A single buddy arena is the only source of heap memory in the system.
//! [`buddy::BuddyAllocator`] does the pure offset bookkeeping over the
//! status tree; [`heap`] binds it to the pool's base address and exposes
//! the `kmalloc`-style pointer API plus a `GlobalAlloc` adapter.

#![cfg_attr(not(test), no_std)]

pub mod buddy;
pub mod config;
pub mod heap;

pub use buddy::{AllocError, BuddyAllocator};
pub use heap::KernelHeap;
