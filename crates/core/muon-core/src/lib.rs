//! Core primitives shared by every muon kernel crate.
//!
//! Contains the debug logging interface, the spin lock guarding shared
//! hardware, and the compile-time assertion macro used for configuration
//! sanity checks. Everything here is host-testable with plain `cargo test`.

#![cfg_attr(not(test), no_std)]

pub mod log;
pub mod static_assert;
pub mod sync;

pub use log::LogLevel;
pub use sync::SpinLock;
