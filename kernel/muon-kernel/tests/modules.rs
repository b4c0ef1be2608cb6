//! Module registry end-to-end tests: a TAR boot image holding synthetic
//! `.ko` objects, inserted and removed through the registry with a
//! recording invoker standing in for real `mod_init`/`mod_fini` calls.

mod common;

use common::{TarBuilder, build_module};
use muon_fs::{Vfs, tarfs};
use muon_kernel::module::{ModuleError, ModuleRegistry};
use muon_kernel::symbols::SymbolTable;
use std::sync::Mutex;

/// Serializes tests sharing the recording statics below.
static GUARD: Mutex<()> = Mutex::new(());

/// Addresses passed to the invoker, in call order.
static CALLS: Mutex<Vec<usize>> = Mutex::new(Vec::new());

/// `(call index, name, address)`: symbols the invoker exports when the
/// n-th call happens, standing in for a module's init registering a
/// service.
static EXPORTS: Mutex<Vec<(usize, &'static str, usize)>> = Mutex::new(Vec::new());

unsafe fn recording_invoke(symbols: &mut SymbolTable, addr: usize) -> i32 {
    let mut calls = CALLS.lock().unwrap();
    let index = calls.len();
    calls.push(addr);
    for &(trigger, name, value) in EXPORTS.lock().unwrap().iter() {
        if trigger == index {
            let _ = symbols.add(name, value);
        }
    }
    0
}

unsafe fn failing_invoke(_symbols: &mut SymbolTable, _addr: usize) -> i32 {
    -1
}

fn reset_recording() {
    CALLS.lock().unwrap().clear();
    EXPORTS.lock().unwrap().clear();
}

fn calls() -> Vec<usize> {
    CALLS.lock().unwrap().clone()
}

/// Mounts a boot image holding the given `.ko` files at `/initrd`.
fn setup_vfs(files: &[(&str, &[u8])]) -> Vfs {
    let mut tar = TarBuilder::new();
    tar.push_dir("modules/");
    for &(name, bytes) in files {
        tar.push_file(&format!("modules/{name}.ko"), bytes);
    }
    let blob = tar.finish();

    let mut vfs = Vfs::new();
    let root = vfs.root();
    let mount_point = vfs.mkdir(root, "initrd").unwrap();
    tarfs::mount(&mut vfs, mount_point, blob).expect("mount boot image");
    vfs
}

#[test]
fn insert_with_missing_dependency_fails_without_loading() {
    let _guard = GUARD.lock().unwrap();
    reset_recording();

    let sample = build_module("sample", &["depmod"], None);
    let vfs = setup_vfs(&[("sample", &sample.bytes)]);
    let mut registry = ModuleRegistry::new(recording_invoke);
    let mut table = SymbolTable::new();

    assert_eq!(
        registry.insert(&vfs, &mut table, "sample", false),
        Err(ModuleError::MissingDependency)
    );
    assert!(registry.modules().is_empty());
    // No init hook ran.
    assert!(calls().is_empty());
}

#[test]
fn transitive_insert_loads_dependencies_first() {
    let _guard = GUARD.lock().unwrap();
    reset_recording();

    let depmod = build_module("depmod", &[], None);
    let sample = build_module("sample", &["depmod"], Some("dependency"));
    let vfs = setup_vfs(&[("depmod", &depmod.bytes), ("sample", &sample.bytes)]);
    let mut registry = ModuleRegistry::new(recording_invoke);
    let mut table = SymbolTable::new();

    // depmod's init (the first call) exports the service sample's data
    // slot is relocated against.
    EXPORTS.lock().unwrap().push((0, "dependency", 0x0800_7771));

    registry
        .insert(&vfs, &mut table, "sample", true)
        .expect("transitive insert");

    let names: Vec<_> = registry.modules().iter().map(|m| m.name()).collect();
    assert_eq!(names, ["depmod", "sample"]);

    // Init hooks fired dependency-first.
    let depmod_init = registry.find("depmod").unwrap().init_addr() as usize;
    let sample_init = registry.find("sample").unwrap().init_addr() as usize;
    assert_eq!(calls(), [depmod_init, sample_init]);

    // The deferred extern slot took the exported address.
    let image = registry.find("sample").unwrap().image();
    let data = image.section_image_addr(2).unwrap();
    let slot = data.wrapping_add(sample.extern_slot.unwrap());
    assert_eq!(image.read_word(slot), Some(0x0800_7771));

    // The kernel table saw the export.
    assert_eq!(table.lookup("dependency"), Some(0x0800_7771));
}

#[test]
fn metadata_is_bound_from_the_image() {
    let _guard = GUARD.lock().unwrap();
    reset_recording();

    let depmod = build_module("depmod", &[], None);
    let vfs = setup_vfs(&[("depmod", &depmod.bytes)]);
    let mut registry = ModuleRegistry::new(recording_invoke);
    let mut table = SymbolTable::new();

    registry
        .insert(&vfs, &mut table, "depmod", false)
        .expect("insert");

    let module = registry.find("depmod").unwrap();
    assert_eq!(module.name(), "depmod");
    assert_eq!(module.version(), 0x0001_0001);
    assert_eq!(module.version_string(), "0.1.1");
    assert!(module.depends().is_empty());
    // Function addresses carry the Thumb bit.
    assert_eq!(module.init_addr() & 1, 1);
    assert_eq!(module.fini_addr() & 1, 1);
}

#[test]
fn remove_with_dependents_is_refused() {
    let _guard = GUARD.lock().unwrap();
    reset_recording();

    let depmod = build_module("depmod", &[], None);
    let sample = build_module("sample", &["depmod"], None);
    let vfs = setup_vfs(&[("depmod", &depmod.bytes), ("sample", &sample.bytes)]);
    let mut registry = ModuleRegistry::new(recording_invoke);
    let mut table = SymbolTable::new();
    registry.insert(&vfs, &mut table, "sample", true).unwrap();

    let calls_before = calls();
    assert_eq!(
        registry.remove(&mut table, "depmod", false),
        Err(ModuleError::HasDependents)
    );
    // List unchanged, no fini ran.
    assert_eq!(registry.modules().len(), 2);
    assert_eq!(calls(), calls_before);
}

#[test]
fn remove_with_dependents_cascades_in_reverse_order() {
    let _guard = GUARD.lock().unwrap();
    reset_recording();

    let depmod = build_module("depmod", &[], None);
    let sample = build_module("sample", &["depmod"], None);
    let vfs = setup_vfs(&[("depmod", &depmod.bytes), ("sample", &sample.bytes)]);
    let mut registry = ModuleRegistry::new(recording_invoke);
    let mut table = SymbolTable::new();
    registry.insert(&vfs, &mut table, "sample", true).unwrap();

    let depmod_fini = registry.find("depmod").unwrap().fini_addr() as usize;
    let sample_fini = registry.find("sample").unwrap().fini_addr() as usize;

    registry
        .remove(&mut table, "depmod", true)
        .expect("cascading remove");
    assert!(registry.modules().is_empty());

    // Dependents tore down before the module they depend on.
    let calls = calls();
    assert_eq!(&calls[calls.len() - 2..], &[sample_fini, depmod_fini]);
}

#[test]
fn dependency_cycles_are_detected() {
    let _guard = GUARD.lock().unwrap();
    reset_recording();

    let cyca = build_module("cyca", &["cycb"], None);
    let cycb = build_module("cycb", &["cyca"], None);
    let vfs = setup_vfs(&[("cyca", &cyca.bytes), ("cycb", &cycb.bytes)]);
    let mut registry = ModuleRegistry::new(recording_invoke);
    let mut table = SymbolTable::new();

    assert_eq!(
        registry.insert(&vfs, &mut table, "cyca", true),
        Err(ModuleError::DependencyCycle)
    );
    assert!(registry.modules().is_empty());
}

#[test]
fn failing_init_drops_the_module() {
    let _guard = GUARD.lock().unwrap();
    reset_recording();

    let depmod = build_module("depmod", &[], None);
    let vfs = setup_vfs(&[("depmod", &depmod.bytes)]);
    let mut registry = ModuleRegistry::new(failing_invoke);
    let mut table = SymbolTable::new();

    assert_eq!(
        registry.insert(&vfs, &mut table, "depmod", false),
        Err(ModuleError::InitFailed(-1))
    );
    assert!(registry.modules().is_empty());
}

#[test]
fn insert_of_absent_file_fails() {
    let _guard = GUARD.lock().unwrap();
    reset_recording();

    let vfs = setup_vfs(&[]);
    let mut registry = ModuleRegistry::new(recording_invoke);
    let mut table = SymbolTable::new();

    assert_eq!(
        registry.insert(&vfs, &mut table, "ghost", true),
        Err(ModuleError::NoSuchFile)
    );
}

#[test]
fn remove_of_unknown_module_fails() {
    let _guard = GUARD.lock().unwrap();
    reset_recording();

    let mut registry = ModuleRegistry::new(recording_invoke);
    let mut table = SymbolTable::new();
    assert_eq!(
        registry.remove(&mut table, "ghost", true),
        Err(ModuleError::NotLoaded)
    );
}
