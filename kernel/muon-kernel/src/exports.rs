//! Kernel symbols exported to modules.
//!
//! Modules import kernel services as `STT_NOTYPE` externs; the loader
//! resolves them against the kernel symbol table. The shims below are the
//! `extern "C"` surface those externs bind to. Names passed across this
//! boundary are borrowed, never copied — a module exporting a name out of
//! its own image must stay loaded for as long as the name is registered.

use crate::symbols::{self, SymbolTable};
use core::ffi::{CStr, c_char};
use muon_core::kprint;
use muon_mm::heap::with_heap;

/// Prints a NUL-terminated string on the debug channel.
///
/// # Safety
///
/// `msg` must point to a NUL-terminated string.
pub unsafe extern "C" fn kputs(msg: *const c_char) {
    if msg.is_null() {
        return;
    }
    // SAFETY: Forwarded caller contract.
    if let Ok(text) = unsafe { CStr::from_ptr(msg) }.to_str() {
        kprint!("{text}");
    }
}

/// Allocates `size` bytes from the kernel heap.
pub extern "C" fn kmalloc(size: usize) -> *mut u8 {
    with_heap(|heap| heap.alloc(size))
}

/// Reallocates a kernel heap block.
pub extern "C" fn krealloc(ptr: *mut u8, size: usize) -> *mut u8 {
    with_heap(|heap| heap.realloc(ptr, size))
}

/// Releases a kernel heap block.
pub extern "C" fn kfree(ptr: *mut u8) {
    with_heap(|heap| heap.free(ptr));
}

/// Registers a symbol in the kernel symbol table.
///
/// # Safety
///
/// `name` must point to a NUL-terminated string that outlives the
/// registration (module image lifetime at least).
pub unsafe extern "C" fn ksymbol_add(name: *const c_char, addr: usize) -> i32 {
    if name.is_null() {
        return -1;
    }
    // SAFETY: Forwarded caller contract; the lifetime promotion mirrors
    // the table's borrowed-name rule.
    let Ok(name) = unsafe { CStr::from_ptr(name) }.to_str() else {
        return -1;
    };
    let name: &'static str = unsafe { core::mem::transmute(name) };
    match symbols::with_symbols(|table| table.add(name, addr)) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Looks a symbol up in the kernel symbol table.
///
/// # Safety
///
/// `name` must point to a NUL-terminated string.
pub unsafe extern "C" fn ksymbol(name: *const c_char) -> usize {
    if name.is_null() {
        return 0;
    }
    // SAFETY: Forwarded caller contract.
    let Ok(name) = unsafe { CStr::from_ptr(name) }.to_str() else {
        return 0;
    };
    symbols::with_symbols(|table| table.lookup(name)).unwrap_or(0)
}

/// Registers the module-facing kernel API in the symbol table.
pub fn export_kernel_symbols(table: &mut SymbolTable) {
    let exports: &[(&'static str, usize)] = &[
        ("kputs", kputs as usize),
        ("kmalloc", kmalloc as usize),
        ("krealloc", krealloc as usize),
        ("kfree", kfree as usize),
        ("ksymbol_add", ksymbol_add as usize),
        ("ksymbol", ksymbol as usize),
    ];
    for &(name, addr) in exports {
        let _ = table.add(name, addr);
    }
}
