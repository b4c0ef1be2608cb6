//! Minimal ELF32 parser for the muon kernel.
//!
//! Parses little-endian ELF32/ARM relocatable objects (`ET_REL`) from raw
//! byte slices using safe field extraction (`from_le_bytes`). No unsafe
//! code, no allocations. Relocation *arithmetic* (the Thumb branch codec)
//! lives here as pure functions; applying relocations to a program image is
//! the loader's job.
//!
//! # Usage
//!
//! ```
//! use muon_elf::ElfFile;
//!
//! fn inspect(data: &[u8]) {
//!     if let Ok(elf) = ElfFile::parse(data) {
//!         for (index, section) in elf.alloc_sections() {
//!             let _ = (index, section.sh_size);
//!         }
//!     }
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod header;
pub mod reloc;
pub mod section;

pub use header::{Elf32Header, ElfError};
pub use reloc::{
    Elf32Rel, R_ARM_ABS32, R_ARM_THM_CALL, RelIter, RelocError, decode_thm_call, encode_thm_call,
};
pub use section::{
    Elf32SectionHeader, Elf32Symbol, ElfFile, SHF_ALLOC, SHN_UNDEF, SHT_NOBITS, SHT_NULL,
    SHT_PROGBITS, SHT_REL, SHT_STRTAB, SHT_SYMTAB, STT_FUNC, STT_NOTYPE, STT_OBJECT, STT_SECTION,
    StringTable,
};
