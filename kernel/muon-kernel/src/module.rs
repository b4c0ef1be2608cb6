//! Loadable module registry.
//!
//! Modules are ELF32/ARM relocatable objects stored in the mounted boot
//! image under `/initrd/modules/<name>.ko`. Every module exports seven
//! well-known symbols (`mod_name`, `mod_ver`, `mod_ver_string`,
//! `mod_depends`, `mod_depends_size`, `mod_init`, `mod_fini`); the
//! registry binds them after load, walks the dependency graph, and keeps
//! the loaded modules in insertion order so teardown can honor reverse
//! dependencies.

use crate::loader::{LoadError, LoadedElf};
use crate::symbols::SymbolTable;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;
use muon_core::{SpinLock, kerror, ktrace};
use muon_fs::Vfs;

/// Invocation seam for module entry points.
///
/// The kernel implementation transmutes the image address into
/// `extern "C" fn() -> i32` and calls it; hosts install a recorder. The
/// symbol table handle is passed through so a running `mod_init` can
/// export symbols, the way service modules do.
pub type InvokeFn = unsafe fn(&mut SymbolTable, usize) -> i32;

/// Kernel-side invoker: call straight into the module image.
///
/// # Safety
///
/// `addr` must be the resolved address of a `() -> i32` function inside a
/// live module image (Thumb bit included).
#[cfg(target_os = "none")]
pub unsafe fn kernel_invoke(_symbols: &mut SymbolTable, addr: usize) -> i32 {
    let entry: extern "C" fn() -> i32 = unsafe { core::mem::transmute(addr) };
    entry()
}

/// Errors from module insertion and removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleError {
    /// `/initrd/modules/<name>.ko` does not exist.
    NoSuchFile,
    /// The module file cannot be read as a contiguous buffer.
    ReadFailed,
    /// The ELF loader rejected the image.
    Load(LoadError),
    /// A well-known metadata symbol is missing or unreadable.
    BadMetadata(&'static str),
    /// A dependency is not loaded and loading it was not requested or
    /// failed.
    MissingDependency,
    /// The dependency graph reached back to a module still being
    /// inserted.
    DependencyCycle,
    /// `mod_init` returned non-zero.
    InitFailed(i32),
    /// The named module is not in the registry.
    NotLoaded,
    /// Loaded modules still depend on this one.
    HasDependents,
    /// `mod_fini` returned non-zero; the module is gone regardless.
    FiniFailed(i32),
}

impl From<LoadError> for ModuleError {
    fn from(e: LoadError) -> Self {
        Self::Load(e)
    }
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchFile => write!(f, "module file does not exist"),
            Self::ReadFailed => write!(f, "module file is unreadable"),
            Self::Load(e) => write!(f, "ELF error: {e}"),
            Self::BadMetadata(name) => write!(f, "malformed module symbol '{name}'"),
            Self::MissingDependency => write!(f, "unresolved dependency"),
            Self::DependencyCycle => write!(f, "dependency cycle"),
            Self::InitFailed(rc) => write!(f, "mod_init failed ({rc})"),
            Self::NotLoaded => write!(f, "no such module"),
            Self::HasDependents => write!(f, "other modules depend on this module"),
            Self::FiniFailed(rc) => write!(f, "mod_fini failed ({rc})"),
        }
    }
}

/// A loaded module: its relocated image plus the bound metadata.
pub struct Module {
    elf: LoadedElf<'static>,
    name: String,
    version: u32,
    version_string: String,
    depends: Vec<String>,
    init_addr: u32,
    fini_addr: u32,
}

impl Module {
    /// The module's name, read from its `mod_name` symbol.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The numeric version from `mod_ver`.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The human-readable version from `mod_ver_string`.
    #[must_use]
    pub fn version_string(&self) -> &str {
        &self.version_string
    }

    /// Names of the modules this one depends on.
    #[must_use]
    pub fn depends(&self) -> &[String] {
        &self.depends
    }

    /// The loaded image, for symbol lookups into the module.
    #[must_use]
    pub fn image(&self) -> &LoadedElf<'static> {
        &self.elf
    }

    /// Resolved address of `mod_init`.
    #[must_use]
    pub fn init_addr(&self) -> u32 {
        self.init_addr
    }

    /// Resolved address of `mod_fini`.
    #[must_use]
    pub fn fini_addr(&self) -> u32 {
        self.fini_addr
    }
}

/// Metadata read out of a loaded image via the seven well-known symbols.
struct Metadata {
    name: String,
    version: u32,
    version_string: String,
    depends: Vec<String>,
    init_addr: u32,
    fini_addr: u32,
}

fn bind_metadata(elf: &LoadedElf<'static>, symbols: &SymbolTable) -> Result<Metadata, ModuleError> {
    fn addr_of(
        elf: &LoadedElf<'static>,
        symbols: &SymbolTable,
        name: &'static str,
    ) -> Result<u32, ModuleError> {
        elf.symbol(name, symbols).ok_or(ModuleError::BadMetadata(name))
    }

    let name_addr = addr_of(elf, symbols, "mod_name")?;
    let name = elf
        .read_cstr(name_addr)
        .ok_or(ModuleError::BadMetadata("mod_name"))?
        .to_string();

    let ver_addr = addr_of(elf, symbols, "mod_ver")?;
    let version = elf
        .read_word(ver_addr)
        .ok_or(ModuleError::BadMetadata("mod_ver"))?;

    let ver_string_addr = addr_of(elf, symbols, "mod_ver_string")?;
    let version_string = elf
        .read_cstr(ver_string_addr)
        .ok_or(ModuleError::BadMetadata("mod_ver_string"))?
        .to_string();

    let size_addr = addr_of(elf, symbols, "mod_depends_size")?;
    let depends_size = elf
        .read_word(size_addr)
        .ok_or(ModuleError::BadMetadata("mod_depends_size"))? as usize;

    let depends_addr = addr_of(elf, symbols, "mod_depends")?;
    let mut depends = Vec::with_capacity(depends_size);
    for i in 0..depends_size {
        // mod_depends is an array of relocated string pointers.
        let slot = depends_addr.wrapping_add(4 * i as u32);
        let ptr = elf
            .read_word(slot)
            .ok_or(ModuleError::BadMetadata("mod_depends"))?;
        let dep = elf
            .read_cstr(ptr)
            .ok_or(ModuleError::BadMetadata("mod_depends"))?;
        depends.push(dep.to_string());
    }

    let init_addr = addr_of(elf, symbols, "mod_init")?;
    let fini_addr = addr_of(elf, symbols, "mod_fini")?;

    Ok(Metadata {
        name,
        version,
        version_string,
        depends,
        init_addr,
        fini_addr,
    })
}

/// The registry of loaded modules, insertion order preserved.
pub struct ModuleRegistry {
    modules: Vec<Module>,
    invoke: InvokeFn,
    /// Names currently being inserted; a dependency walking back into
    /// this set is a cycle.
    in_progress: Vec<String>,
}

impl ModuleRegistry {
    /// Creates an empty registry using `invoke` for `mod_init`/`mod_fini`
    /// calls.
    #[must_use]
    pub fn new(invoke: InvokeFn) -> Self {
        Self {
            modules: Vec::new(),
            invoke,
            in_progress: Vec::new(),
        }
    }

    /// The loaded modules, oldest first.
    #[must_use]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Finds a loaded module by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Loads and initializes `/initrd/modules/<name>.ko`.
    ///
    /// After the ELF is loaded and the metadata bound, every dependency
    /// must already be in the registry — or, with `load_deps`, is
    /// inserted recursively first. Relocations deferred on externs that
    /// dependencies export are then fixed up and the metadata rebound,
    /// `mod_init` runs (non-zero fails the insert), and the module is
    /// appended to the list.
    ///
    /// Any failure after the ELF load drops the image and the module
    /// record; dependencies inserted on the way stay loaded.
    ///
    /// # Errors
    ///
    /// See [`ModuleError`].
    pub fn insert(
        &mut self,
        vfs: &Vfs,
        symbols: &mut SymbolTable,
        name: &str,
        load_deps: bool,
    ) -> Result<(), ModuleError> {
        ktrace!("=== loading module '{name}'");
        if self.in_progress.iter().any(|n| n == name) {
            kerror!("module '{name}' not loaded: dependency cycle");
            return Err(ModuleError::DependencyCycle);
        }

        self.in_progress.push(name.to_string());
        let result = self.insert_inner(vfs, symbols, name, load_deps);
        self.in_progress.pop();
        ktrace!("=== done");
        result
    }

    fn insert_inner(
        &mut self,
        vfs: &Vfs,
        symbols: &mut SymbolTable,
        name: &str,
        load_deps: bool,
    ) -> Result<(), ModuleError> {
        let path = format!("/initrd/modules/{name}.ko");
        let Some(inode) = vfs.find(&path) else {
            kerror!("failed to load module '{name}': file '{path}' does not exist");
            return Err(ModuleError::NoSuchFile);
        };
        let bytes = vfs.rawptr(inode).map_err(|_| {
            kerror!("failed to load module '{name}': unable to read '{path}'");
            ModuleError::ReadFailed
        })?;

        let mut elf = LoadedElf::load(bytes, symbols).map_err(|e| {
            kerror!("failed to load module '{name}': {e}");
            ModuleError::Load(e)
        })?;

        let mut meta = bind_metadata(&elf, symbols).map_err(|e| {
            kerror!("module '{name}' not loaded: malformed symbols");
            e
        })?;

        for dep in &meta.depends {
            if self.find(dep).is_some() {
                continue;
            }
            if !load_deps {
                kerror!("module '{name}' not loaded: unresolved dependency '{dep}'");
                return Err(ModuleError::MissingDependency);
            }
            ktrace!("loading dependency '{dep}'");
            self.insert(vfs, symbols, dep, true)?;
        }

        if elf.needs_fix() {
            elf.fix_relocations(symbols).map_err(|e| {
                kerror!("module '{name}' not loaded: unsatisfied relocations");
                ModuleError::Load(e)
            })?;
            meta = bind_metadata(&elf, symbols)?;
        }

        // SAFETY (kernel): init_addr is the relocated address of the
        // module's mod_init. Hosts install their own invoker.
        let rc = unsafe { (self.invoke)(symbols, meta.init_addr as usize) };
        if rc != 0 {
            kerror!("module '{name}' not loaded: init returned {rc}");
            return Err(ModuleError::InitFailed(rc));
        }

        ktrace!("loaded module '{}' {}", meta.name, meta.version_string);
        self.modules.push(Module {
            elf,
            name: meta.name,
            version: meta.version,
            version_string: meta.version_string,
            depends: meta.depends,
            init_addr: meta.init_addr,
            fini_addr: meta.fini_addr,
        });
        Ok(())
    }

    /// Removes a loaded module.
    ///
    /// Modules whose `mod_depends` name this one are removed first with
    /// `unload_deps`, or fail the removal (with no `mod_fini` called and
    /// no list mutation) without it. The module is then unlinked,
    /// `mod_fini` runs, and the image is dropped.
    ///
    /// # Errors
    ///
    /// See [`ModuleError`]. [`ModuleError::FiniFailed`] reports a
    /// non-zero `mod_fini` after the module is already gone.
    pub fn remove(
        &mut self,
        symbols: &mut SymbolTable,
        name: &str,
        unload_deps: bool,
    ) -> Result<(), ModuleError> {
        ktrace!("=== unloading module '{name}'");
        let result = self.remove_inner(symbols, name, unload_deps);
        ktrace!("=== done");
        result
    }

    fn remove_inner(
        &mut self,
        symbols: &mut SymbolTable,
        name: &str,
        unload_deps: bool,
    ) -> Result<(), ModuleError> {
        if self.find(name).is_none() {
            kerror!("failed to unload module '{name}': no such module");
            return Err(ModuleError::NotLoaded);
        }

        let dependents: Vec<String> = self
            .modules
            .iter()
            .filter(|m| m.depends.iter().any(|d| d == name))
            .map(|m| m.name.clone())
            .collect();

        if !dependents.is_empty() && !unload_deps {
            kerror!(
                "failed to unload module '{name}': '{}' depends on this module",
                dependents[0]
            );
            return Err(ModuleError::HasDependents);
        }
        for dependent in dependents {
            if self.find(&dependent).is_some() {
                ktrace!("unloading reverse dependency '{dependent}'");
                self.remove_inner(symbols, &dependent, true)?;
            }
        }

        let Some(pos) = self.modules.iter().position(|m| m.name == name) else {
            return Err(ModuleError::NotLoaded);
        };
        let module = self.modules.remove(pos);

        // SAFETY (kernel): fini_addr is the relocated address of the
        // module's mod_fini. Hosts install their own invoker.
        let rc = unsafe { (self.invoke)(symbols, module.fini_addr as usize) };
        drop(module);

        if rc != 0 {
            kerror!("module '{name}' unloaded, but fini returned {rc}");
            return Err(ModuleError::FiniFailed(rc));
        }
        ktrace!("module '{name}' unloaded");
        Ok(())
    }
}

/// Global module registry.
static MODULES: SpinLock<Option<ModuleRegistry>> = SpinLock::new(None);

/// Initialize the global registry with the given invoker.
///
/// # Panics
///
/// Panics if called twice.
pub fn init(invoke: InvokeFn) {
    let mut modules = MODULES.lock();
    assert!(modules.is_none(), "module registry already initialized");
    *modules = Some(ModuleRegistry::new(invoke));
}

/// Execute a closure with the global registry.
///
/// # Panics
///
/// Panics if [`init`] has not been called.
pub fn with_modules<R>(f: impl FnOnce(&mut ModuleRegistry) -> R) -> R {
    MODULES.with_init("module registry", f)
}
