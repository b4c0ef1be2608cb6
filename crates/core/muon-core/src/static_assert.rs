//! Compile-time assertion macro.

/// Asserts a condition at compile time.
///
/// Used for configuration sanity checks (pool size vs. depth vs.
/// alignment, stack region divisibility) that must fail the build, not
/// the boot. The optional second argument is the failure message.
///
/// # Examples
///
/// ```
/// use muon_core::static_assert;
/// static_assert!(usize::BITS >= 32);
/// static_assert!(4096 % 8 == 0, "pool must be alignable");
/// ```
#[macro_export]
macro_rules! static_assert {
    ($cond:expr $(, $msg:expr)? $(,)?) => {
        const _: () = assert!($cond $(, $msg)?);
    };
}
