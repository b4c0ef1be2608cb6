//! Relocating ELF loader.
//!
//! Takes a borrowed ELF32/ARM relocatable object, lays its `SHF_ALLOC`
//! sections out in an owned program image, resolves symbols (externs via
//! the kernel symbol table) and applies `R_ARM_ABS32` and
//! `R_ARM_THM_CALL` relocations in place.
//!
//! Relocations whose externs are not yet registered are deferred rather
//! than fatal: [`LoadedElf::needs_fix`] reports them and
//! [`LoadedElf::fix_relocations`] applies exactly the deferred ones once
//! the missing symbols exist (a site is never patched twice, so the
//! addend read at the patch location stays valid).
//!
//! Image addresses are 32-bit machine addresses; all address arithmetic
//! wraps at 32 bits.

use crate::symbols::SymbolTable;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use muon_elf::{
    Elf32Rel, Elf32SectionHeader, Elf32Symbol, ElfError, ElfFile, R_ARM_ABS32, R_ARM_THM_CALL,
    SHT_NOBITS, SHT_PROGBITS, SHT_SYMTAB, STT_FUNC, STT_NOTYPE, STT_OBJECT, STT_SECTION,
    decode_thm_call, encode_thm_call,
};
use muon_mm::config::ALIGN;
use planck_noalloc::vec::ArrayVec;

/// Capacity of the loadable-section table.
pub const MAX_LOAD_SECTIONS: usize = 16;

/// Errors from loading or relocating an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The object failed the header check.
    Elf(ElfError),
    /// No section-name or symbol-name string table.
    NoStringTable,
    /// No `SHT_SYMTAB` section.
    NoSymbolTable,
    /// No section carries `SHF_ALLOC`; there is nothing to load.
    NoLoadableSections,
    /// More `SHF_ALLOC` sections than [`MAX_LOAD_SECTIONS`].
    TooManySections,
    /// A section requires stricter alignment than the allocator grants.
    AlignmentTooStrict,
    /// A loadable section is neither `SHT_PROGBITS` nor `SHT_NOBITS`.
    UnsupportedSectionType(u32),
    /// A relocation entry has an unsupported type.
    UnsupportedRelocation(u8),
    /// A relocation's patch site lies outside its target section.
    BadRelocationOffset,
    /// A relocation names a symbol index past the symbol table.
    BadSymbolIndex,
    /// A Thumb call displacement does not fit its field.
    RelocationOverflow,
    /// Deferred relocations remain unresolved after a fixup pass.
    UnresolvedSymbols,
}

impl From<ElfError> for LoadError {
    fn from(e: ElfError) -> Self {
        Self::Elf(e)
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elf(e) => write!(f, "{e}"),
            Self::NoStringTable => write!(f, "missing string table"),
            Self::NoSymbolTable => write!(f, "missing symbol table"),
            Self::NoLoadableSections => write!(f, "no loadable sections"),
            Self::TooManySections => write!(f, "too many loadable sections"),
            Self::AlignmentTooStrict => write!(f, "section alignment exceeds allocator alignment"),
            Self::UnsupportedSectionType(t) => write!(f, "unsupported loadable section type {t}"),
            Self::UnsupportedRelocation(t) => write!(f, "unsupported relocation type {t}"),
            Self::BadRelocationOffset => write!(f, "relocation offset outside target section"),
            Self::BadSymbolIndex => write!(f, "relocation symbol index out of range"),
            Self::RelocationOverflow => write!(f, "branch displacement out of range"),
            Self::UnresolvedSymbols => write!(f, "unresolved symbols remain"),
        }
    }
}

/// One `SHF_ALLOC` section placed in the program image.
#[derive(Debug, Clone, Copy)]
struct LoadedSection {
    /// Section header index in the source object.
    index: usize,
    /// Byte offset of the section inside the image.
    offset: usize,
}

/// A loaded, relocated object: borrowed source bytes plus the owned
/// program image. Dropping it frees the image and the section table; the
/// source buffer belongs to the caller.
pub struct LoadedElf<'a> {
    elf: ElfFile<'a>,
    symtab: Elf32SectionHeader,
    sections: ArrayVec<LoadedSection, MAX_LOAD_SECTIONS>,
    image: Vec<u8>,
    /// Deferred relocations: `(rel section index, entry index)`.
    pending: Vec<(usize, usize)>,
}

impl<'a> LoadedElf<'a> {
    /// Runs the whole load pipeline: header check, section discovery,
    /// image layout and copy, relocation.
    ///
    /// Externs missing from `symbols` defer their relocations (see
    /// [`needs_fix`](Self::needs_fix)); everything else that fails is a
    /// hard error and releases any partial state.
    ///
    /// # Errors
    ///
    /// See [`LoadError`].
    pub fn load(bytes: &'a [u8], symbols: &SymbolTable) -> Result<Self, LoadError> {
        let elf = ElfFile::parse(bytes)?;

        if elf.shstrtab().is_none() {
            return Err(LoadError::NoStringTable);
        }
        let (_, symtab) = elf
            .find_section_by_type(SHT_SYMTAB)
            .ok_or(LoadError::NoSymbolTable)?;
        if elf.linked_strtab(&symtab).is_none() {
            return Err(LoadError::NoStringTable);
        }

        // Packed image layout of the ALLOC sections, in header order,
        // padding up to each section's alignment.
        let mut sections: ArrayVec<LoadedSection, MAX_LOAD_SECTIONS> = ArrayVec::new();
        let mut off = 0usize;
        for (index, shdr) in elf.alloc_sections() {
            let align = shdr.sh_addralign as usize;
            if align > ALIGN {
                return Err(LoadError::AlignmentTooStrict);
            }
            if align > 1 {
                off = off.next_multiple_of(align);
            }
            sections
                .try_push(LoadedSection { index, offset: off })
                .map_err(|_| LoadError::TooManySections)?;
            off += shdr.sh_size as usize;
        }
        if sections.len() == 0 {
            return Err(LoadError::NoLoadableSections);
        }

        let mut image = vec![0u8; off];

        for slot in sections.iter() {
            let shdr = elf
                .section_by_index(slot.index)
                .ok_or(LoadError::Elf(ElfError::InvalidOffset))?;
            match shdr.sh_type {
                SHT_PROGBITS => {
                    let data = elf
                        .section_data(&shdr)
                        .ok_or(LoadError::Elf(ElfError::InvalidOffset))?;
                    image[slot.offset..slot.offset + data.len()].copy_from_slice(data);
                }
                // NOBITS sections are exactly the zero fill they want.
                SHT_NOBITS => {}
                other => return Err(LoadError::UnsupportedSectionType(other)),
            }
        }

        let mut loaded = Self {
            elf,
            symtab,
            sections,
            image,
            pending: Vec::new(),
        };
        loaded.apply_all_relocations(symbols)?;
        Ok(loaded)
    }

    /// `true` while deferred relocations await missing externs.
    #[must_use]
    pub fn needs_fix(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Re-applies exactly the deferred relocations against the (grown)
    /// symbol table.
    ///
    /// # Errors
    ///
    /// [`LoadError::UnresolvedSymbols`] if any extern is still missing;
    /// the still-missing ones stay deferred.
    pub fn fix_relocations(&mut self, symbols: &SymbolTable) -> Result<(), LoadError> {
        let pending = core::mem::take(&mut self.pending);
        let mut still = Vec::new();

        for (rel_index, entry_index) in pending {
            let shdr = self
                .elf
                .section_by_index(rel_index)
                .ok_or(LoadError::Elf(ElfError::InvalidOffset))?;
            let target = self
                .section_slot(shdr.sh_info as usize)
                .ok_or(LoadError::BadRelocationOffset)?;
            let rel = self
                .elf
                .rel_entries(&shdr)
                .and_then(|mut entries| entries.nth(entry_index))
                .ok_or(LoadError::Elf(ElfError::InvalidOffset))?;

            if !self.apply_relocation(target, &rel, symbols)? {
                still.push((rel_index, entry_index));
            }
        }

        if still.is_empty() {
            Ok(())
        } else {
            self.pending = still;
            Err(LoadError::UnresolvedSymbols)
        }
    }

    /// Resolves a symbol by name against the object, like the module
    /// registry does for the well-known metadata names.
    ///
    /// Linearly scans the symbol table; a symbol whose name cannot be
    /// read is treated as no match. For function symbols the returned
    /// address carries the Thumb bit.
    #[must_use]
    pub fn symbol(&self, name: &str, symbols: &SymbolTable) -> Option<u32> {
        for sym in self.elf.symbols(&self.symtab)? {
            let Some(sym_name) = self.symbol_name(&sym) else {
                continue;
            };
            if sym_name == name {
                let addr = self.resolve_symbol(&sym, symbols)?;
                return Some(if sym.sym_type() == STT_FUNC { addr | 1 } else { addr });
            }
        }
        None
    }

    /// Base address of the program image.
    #[must_use]
    pub fn image_base(&self) -> u32 {
        self.image.as_ptr() as usize as u32
    }

    /// Size of the program image in bytes.
    #[must_use]
    pub fn image_size(&self) -> usize {
        self.image.len()
    }

    /// Image address of a source section, by section header index.
    #[must_use]
    pub fn section_image_addr(&self, section_index: usize) -> Option<u32> {
        self.section_slot(section_index)
            .map(|slot| self.image_base().wrapping_add(slot.offset as u32))
    }

    /// Reads `len` bytes at an image address.
    #[must_use]
    pub fn read_bytes(&self, addr: u32, len: usize) -> Option<&[u8]> {
        let off = self.addr_to_offset(addr)?;
        self.image.get(off..off.checked_add(len)?)
    }

    /// Reads the 32-bit word at an image address.
    #[must_use]
    pub fn read_word(&self, addr: u32) -> Option<u32> {
        self.read_bytes(addr, 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads the NUL-terminated string at an image address.
    #[must_use]
    pub fn read_cstr(&self, addr: u32) -> Option<&str> {
        let off = self.addr_to_offset(addr)?;
        let tail = &self.image[off..];
        let nul = tail.iter().position(|&b| b == 0)?;
        core::str::from_utf8(&tail[..nul]).ok()
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn section_slot(&self, section_index: usize) -> Option<LoadedSection> {
        self.sections
            .iter()
            .copied()
            .find(|slot| slot.index == section_index)
    }

    fn addr_to_offset(&self, addr: u32) -> Option<usize> {
        let off = addr.wrapping_sub(self.image_base()) as usize;
        (off < self.image.len()).then_some(off)
    }

    fn symbol_name(&self, sym: &Elf32Symbol) -> Option<&'a str> {
        if sym.sym_type() == STT_SECTION {
            let shdr = self.elf.section_by_index(sym.st_shndx as usize)?;
            self.elf.section_name(&shdr)
        } else {
            self.elf.linked_strtab(&self.symtab)?.get(sym.st_name)
        }
    }

    /// Computes `S` for a symbol: image address for object/function/
    /// section symbols (bit 0 cleared), kernel symbol table lookup for
    /// externs. `None` means unresolved.
    fn resolve_symbol(&self, sym: &Elf32Symbol, symbols: &SymbolTable) -> Option<u32> {
        match sym.sym_type() {
            STT_OBJECT | STT_FUNC => {
                let base = self.section_image_addr(sym.st_shndx as usize)?;
                Some(base.wrapping_add(sym.st_value) & !1)
            }
            STT_SECTION => self
                .section_image_addr(sym.st_shndx as usize)
                .map(|base| base & !1),
            STT_NOTYPE => {
                let name = self.symbol_name(sym)?;
                symbols.lookup(name).map(|addr| addr as u32)
            }
            _ => None,
        }
    }

    fn apply_all_relocations(&mut self, symbols: &SymbolTable) -> Result<(), LoadError> {
        let rels: Vec<(usize, Elf32SectionHeader)> = self.elf.rel_sections().collect();
        for (rel_index, shdr) in rels {
            // A REL section whose target was not loaded has nothing to
            // patch in the image.
            let Some(target) = self.section_slot(shdr.sh_info as usize) else {
                continue;
            };
            let entries: Vec<Elf32Rel> = self
                .elf
                .rel_entries(&shdr)
                .ok_or(LoadError::Elf(ElfError::InvalidOffset))?
                .collect();
            for (entry_index, rel) in entries.iter().enumerate() {
                if !self.apply_relocation(target, rel, symbols)? {
                    self.pending.push((rel_index, entry_index));
                }
            }
        }
        Ok(())
    }

    /// Applies one relocation. Returns `Ok(false)` when the symbol is
    /// still unresolved and the entry must be deferred.
    fn apply_relocation(
        &mut self,
        target: LoadedSection,
        rel: &Elf32Rel,
        symbols: &SymbolTable,
    ) -> Result<bool, LoadError> {
        match rel.r_type {
            R_ARM_ABS32 | R_ARM_THM_CALL => {}
            other => return Err(LoadError::UnsupportedRelocation(other)),
        }

        let target_shdr = self
            .elf
            .section_by_index(target.index)
            .ok_or(LoadError::Elf(ElfError::InvalidOffset))?;
        if rel.r_offset.checked_add(4).is_none_or(|end| end > target_shdr.sh_size) {
            return Err(LoadError::BadRelocationOffset);
        }

        let sym = self
            .elf
            .symbol_by_index(&self.symtab, rel.r_sym as usize)
            .ok_or(LoadError::BadSymbolIndex)?;
        let Some(s) = self.resolve_symbol(&sym, symbols) else {
            return Ok(false);
        };
        let t: u32 = u32::from(sym.sym_type() == STT_FUNC);

        let p_off = target.offset + rel.r_offset as usize;
        let p_addr = self
            .image_base()
            .wrapping_add(target.offset as u32)
            .wrapping_add(rel.r_offset);

        match rel.r_type {
            R_ARM_ABS32 => {
                // A is the word already at P.
                let a = self.image_word(p_off);
                self.set_image_word(p_off, s.wrapping_add(a) | t);
            }
            _ => {
                let upper = self.image_half(p_off);
                let lower = self.image_half(p_off + 2);
                let a = decode_thm_call(upper, lower);
                let disp = a.wrapping_add(s.wrapping_sub(p_addr) as i32);
                let (new_upper, new_lower) =
                    encode_thm_call(upper, lower, disp).map_err(|_| LoadError::RelocationOverflow)?;
                self.set_image_half(p_off, new_upper);
                self.set_image_half(p_off + 2, new_lower);
            }
        }
        Ok(true)
    }

    fn image_word(&self, off: usize) -> u32 {
        u32::from_le_bytes([
            self.image[off],
            self.image[off + 1],
            self.image[off + 2],
            self.image[off + 3],
        ])
    }

    fn set_image_word(&mut self, off: usize, value: u32) {
        self.image[off..off + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn image_half(&self, off: usize) -> u16 {
        u16::from_le_bytes([self.image[off], self.image[off + 1]])
    }

    fn set_image_half(&mut self, off: usize, value: u16) {
        self.image[off..off + 2].copy_from_slice(&value.to_le_bytes());
    }
}
