//! Debug logging interface.
//!
//! Provides [`kprint!`] / [`kprintln!`] for raw output and [`klog!`] plus the
//! per-level helpers (`kerror!`, `kwarn!`, ...) for leveled messages. Output
//! goes through a pluggable sink function; the board layer registers its
//! SWO/ITM writer with [`set_print_fn`] / [`set_log_fn`] during early boot.
//! Until then, everything is silently discarded.

use core::fmt;
use core::sync::atomic::{AtomicPtr, Ordering};

/// Log severity level. Lower is more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Something failed; the kernel keeps running.
    Error = 0,
    /// Unexpected condition, not necessarily a failure.
    Warn = 1,
    /// High-level progress messages.
    Info = 2,
    /// Diagnostic detail.
    Debug = 3,
    /// Very verbose tracing.
    Trace = 4,
}

impl LogLevel {
    /// Fixed-width tag used in log lines.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Error => "[ERROR]",
            Self::Warn => "[WARNING]",
            Self::Info => "[INFO]",
            Self::Debug => "[DEBUG]",
            Self::Trace => "[TRACE]",
        }
    }
}

/// The signature of the raw print sink.
pub type PrintFn = fn(fmt::Arguments<'_>);

/// The signature of the leveled log sink.
pub type LogFn = fn(LogLevel, fmt::Arguments<'_>);

fn null_print(_args: fmt::Arguments<'_>) {}

fn null_log(_level: LogLevel, _args: fmt::Arguments<'_>) {}

static PRINT_FN: AtomicPtr<()> = AtomicPtr::new(null_print as *mut ());
static LOG_FN: AtomicPtr<()> = AtomicPtr::new(null_log as *mut ());

/// Registers the raw print sink.
///
/// # Safety
///
/// The function must be callable from any context the macros are used in,
/// including interrupt handlers.
pub unsafe fn set_print_fn(f: PrintFn) {
    PRINT_FN.store(f as *mut (), Ordering::Release);
}

/// Registers the leveled log sink.
///
/// # Safety
///
/// Same contract as [`set_print_fn`].
pub unsafe fn set_log_fn(f: LogFn) {
    LOG_FN.store(f as *mut (), Ordering::Release);
}

/// Implementation detail for [`kprint!`]. Not public API.
#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    let ptr = PRINT_FN.load(Ordering::Acquire);
    // SAFETY: Only valid `PrintFn` pointers are ever stored in PRINT_FN.
    let f: PrintFn = unsafe { core::mem::transmute(ptr) };
    f(args);
}

/// Implementation detail for [`klog!`]. Not public API.
#[doc(hidden)]
pub fn _log(level: LogLevel, args: fmt::Arguments<'_>) {
    let ptr = LOG_FN.load(Ordering::Acquire);
    // SAFETY: Only valid `LogFn` pointers are ever stored in LOG_FN.
    let f: LogFn = unsafe { core::mem::transmute(ptr) };
    f(level, args);
}

/// Prints to the registered sink, raw (no level, no newline).
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => { $crate::log::_print(format_args!($($arg)*)) };
}

/// Prints to the registered sink with a trailing newline.
#[macro_export]
macro_rules! kprintln {
    () => { $crate::kprint!("\n") };
    ($($arg:tt)*) => { $crate::kprint!("{}\n", format_args!($($arg)*)) };
}

/// Logs a message at the given [`LogLevel`].
#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {
        $crate::log::_log($level, format_args!($($arg)*))
    };
}

/// Logs an error-level message.
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Error, $($arg)*) };
}

/// Logs a warning-level message.
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Warn, $($arg)*) };
}

/// Logs an info-level message.
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Info, $($arg)*) };
}

/// Logs a debug-level message.
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Debug, $($arg)*) };
}

/// Logs a trace-level message.
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Trace, $($arg)*) };
}
