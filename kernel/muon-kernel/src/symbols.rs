//! Kernel symbol table.
//!
//! A flat list of `(name, address)` pairs backing dynamic linking. The
//! backing store grows by [`BULK_SIZE`] slots at a time; removal leaves a
//! hole that later inserts reuse. Names are borrowed, not copied — the
//! caller guarantees their lifetime (exported kernel names are static, a
//! module's exported names live as long as its image).
//!
//! A process-wide instance exists for the kernel proper, but the loader
//! and registry take a table handle so hosts can test against their own.

use alloc::vec::Vec;
use core::fmt;
use muon_core::SpinLock;

/// Slot growth quantum.
pub const BULK_SIZE: usize = 32;

/// Errors from symbol registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolError {
    /// The name is empty or the address is null.
    InvalidSymbol,
}

impl fmt::Display for SymbolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSymbol => write!(f, "empty name or null address"),
        }
    }
}

struct Symbol {
    name: &'static str,
    addr: usize,
}

/// The name→address map.
#[derive(Default)]
pub struct SymbolTable {
    slots: Vec<Option<Symbol>>,
}

impl SymbolTable {
    /// Creates an empty table; the first insert allocates the first bulk.
    #[must_use]
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Registers `name` at `addr` in the first empty slot, growing the
    /// backing store by [`BULK_SIZE`] slots when none is free. Duplicate
    /// names are not rejected; lookup returns the first match.
    ///
    /// # Errors
    ///
    /// [`SymbolError::InvalidSymbol`] for an empty name or a null address.
    pub fn add(&mut self, name: &'static str, addr: usize) -> Result<(), SymbolError> {
        if name.is_empty() || addr == 0 {
            return Err(SymbolError::InvalidSymbol);
        }

        let slot = match self.slots.iter().position(Option::is_none) {
            Some(slot) => slot,
            None => {
                let slot = self.slots.len();
                self.slots.resize_with(slot + BULK_SIZE, || None);
                slot
            }
        };
        self.slots[slot] = Some(Symbol { name, addr });
        Ok(())
    }

    /// Clears every slot registered under `name`.
    pub fn remove(&mut self, name: &str) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|s| s.name == name) {
                *slot = None;
            }
        }
    }

    /// Returns the first address registered under `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .flatten()
            .find(|s| s.name == name)
            .map(|s| s.addr)
    }

    /// Number of live symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// `true` when no symbol is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current slot capacity; always a multiple of [`BULK_SIZE`].
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Global kernel symbol table.
static SYMBOLS: SpinLock<Option<SymbolTable>> = SpinLock::new(None);

/// Initialize the global symbol table.
///
/// # Panics
///
/// Panics if called twice.
pub fn init() {
    let mut symbols = SYMBOLS.lock();
    assert!(symbols.is_none(), "symbol table already initialized");
    *symbols = Some(SymbolTable::new());
}

/// Execute a closure with the global symbol table.
///
/// # Panics
///
/// Panics if [`init`] has not been called.
pub fn with_symbols<R>(f: impl FnOnce(&mut SymbolTable) -> R) -> R {
    SYMBOLS.with_init("symbol table", f)
}
