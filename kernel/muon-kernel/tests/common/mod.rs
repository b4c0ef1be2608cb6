//! Fixture builders for the loader and module tests: in-memory ELF32/ARM
//! relocatable objects and ustar archives, byte-assembled the same way
//! the parse-crate unit tests build their inputs.

use muon_elf::{SHF_ALLOC, SHT_NOBITS, SHT_PROGBITS, SHT_REL, SHT_STRTAB, SHT_SYMTAB};

/// Section flag: writable (only used when emitting fixtures).
const SHF_WRITE: u32 = 0x1;
/// Section flag: executable.
const SHF_EXECINSTR: u32 = 0x4;

const EHDR_SIZE: usize = 52;
const SHDR_SIZE: usize = 40;
const SYM_SIZE: usize = 16;

/// Where a fixture symbol is defined.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SymSection {
    Text,
    Data,
    Bss,
    Undef,
}

impl SymSection {
    fn shndx(self) -> u16 {
        match self {
            Self::Text => 1,
            Self::Data => 2,
            Self::Bss => 3,
            Self::Undef => 0,
        }
    }
}

/// A fixture symbol. Symbol table index is position in
/// [`ElfBuilder::syms`] plus one (index 0 is the null symbol).
pub struct Sym {
    pub name: &'static str,
    pub value: u32,
    /// `STT_*` type; binding bits are set to global.
    pub kind: u8,
    pub section: SymSection,
}

/// A fixture relocation entry.
pub struct Rel {
    pub offset: u32,
    /// Symbol table index (1-based, see [`Sym`]).
    pub sym_index: u32,
    pub r_type: u8,
}

/// Builds ELF32/ARM `ET_REL` objects with the fixed section layout
/// `NULL, .text, .data, .bss, .rel.text, .rel.data, .symtab, .strtab,
/// .shstrtab`.
pub struct ElfBuilder {
    pub text: Vec<u8>,
    pub data: Vec<u8>,
    pub bss_size: u32,
    pub text_align: u32,
    pub data_align: u32,
    pub syms: Vec<Sym>,
    pub text_rels: Vec<Rel>,
    pub data_rels: Vec<Rel>,
}

impl Default for ElfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ElfBuilder {
    pub fn new() -> Self {
        Self {
            text: Vec::new(),
            data: Vec::new(),
            bss_size: 0,
            text_align: 4,
            data_align: 4,
            syms: Vec::new(),
            text_rels: Vec::new(),
            data_rels: Vec::new(),
        }
    }

    /// 1-based symbol table index of a named fixture symbol.
    pub fn sym_index(&self, name: &str) -> u32 {
        self.syms
            .iter()
            .position(|s| s.name == name)
            .map(|p| p as u32 + 1)
            .expect("fixture symbol")
    }

    pub fn build(&self) -> Vec<u8> {
        // Symbol-name string table.
        let mut strtab = vec![0u8];
        let mut sym_name_offsets = Vec::new();
        for sym in &self.syms {
            if sym.name.is_empty() {
                sym_name_offsets.push(0u32);
            } else {
                sym_name_offsets.push(strtab.len() as u32);
                strtab.extend_from_slice(sym.name.as_bytes());
                strtab.push(0);
            }
        }

        // Symbol table: null entry plus the fixture symbols.
        let mut symtab = vec![0u8; SYM_SIZE];
        for (sym, &name_off) in self.syms.iter().zip(&sym_name_offsets) {
            let mut entry = [0u8; SYM_SIZE];
            entry[0..4].copy_from_slice(&name_off.to_le_bytes());
            entry[4..8].copy_from_slice(&sym.value.to_le_bytes());
            entry[12] = (1 << 4) | sym.kind; // STB_GLOBAL
            entry[14..16].copy_from_slice(&sym.section.shndx().to_le_bytes());
            symtab.extend_from_slice(&entry);
        }

        let encode_rels = |rels: &[Rel]| {
            let mut bytes = Vec::new();
            for rel in rels {
                bytes.extend_from_slice(&rel.offset.to_le_bytes());
                let info = (rel.sym_index << 8) | u32::from(rel.r_type);
                bytes.extend_from_slice(&info.to_le_bytes());
            }
            bytes
        };
        let rel_text = encode_rels(&self.text_rels);
        let rel_data = encode_rels(&self.data_rels);

        let shstrtab: &[u8] = b"\0.text\0.data\0.bss\0.rel.text\0.rel.data\0.symtab\0.strtab\0.shstrtab\0";

        // Data blobs follow the section header table.
        let mut offset = (EHDR_SIZE + 9 * SHDR_SIZE) as u32;
        let mut place = |len: usize| {
            let at = offset;
            offset += len as u32;
            at
        };
        let text_off = place(self.text.len());
        let data_off = place(self.data.len());
        let bss_off = place(0); // no file contents
        let rel_text_off = place(rel_text.len());
        let rel_data_off = place(rel_data.len());
        let symtab_off = place(symtab.len());
        let strtab_off = place(strtab.len());
        let shstrtab_off = place(shstrtab.len());

        let mut buf = vec![0u8; EHDR_SIZE];
        buf[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        buf[4] = 1; // ELFCLASS32
        buf[5] = 1; // ELFDATA2LSB
        buf[6] = 1;
        buf[16..18].copy_from_slice(&1u16.to_le_bytes()); // ET_REL
        buf[18..20].copy_from_slice(&40u16.to_le_bytes()); // EM_ARM
        buf[20..24].copy_from_slice(&1u32.to_le_bytes()); // EV_CURRENT
        buf[32..36].copy_from_slice(&(EHDR_SIZE as u32).to_le_bytes()); // e_shoff
        buf[40..42].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes()); // e_ehsize
        buf[46..48].copy_from_slice(&(SHDR_SIZE as u16).to_le_bytes());
        buf[48..50].copy_from_slice(&9u16.to_le_bytes()); // e_shnum
        buf[50..52].copy_from_slice(&8u16.to_le_bytes()); // e_shstrndx

        let mut shdr = |name: u32,
                        sh_type: u32,
                        flags: u32,
                        off: u32,
                        size: u32,
                        link: u32,
                        info: u32,
                        align: u32,
                        entsize: u32| {
            let mut hdr = [0u8; SHDR_SIZE];
            hdr[0..4].copy_from_slice(&name.to_le_bytes());
            hdr[4..8].copy_from_slice(&sh_type.to_le_bytes());
            hdr[8..12].copy_from_slice(&flags.to_le_bytes());
            hdr[16..20].copy_from_slice(&off.to_le_bytes());
            hdr[20..24].copy_from_slice(&size.to_le_bytes());
            hdr[24..28].copy_from_slice(&link.to_le_bytes());
            hdr[28..32].copy_from_slice(&info.to_le_bytes());
            hdr[32..36].copy_from_slice(&align.to_le_bytes());
            hdr[36..40].copy_from_slice(&entsize.to_le_bytes());
            buf.extend_from_slice(&hdr);
        };

        shdr(0, 0, 0, 0, 0, 0, 0, 0, 0); // NULL
        shdr(
            1,
            SHT_PROGBITS,
            SHF_ALLOC | SHF_EXECINSTR,
            text_off,
            self.text.len() as u32,
            0,
            0,
            self.text_align,
            0,
        );
        shdr(
            7,
            SHT_PROGBITS,
            SHF_ALLOC | SHF_WRITE,
            data_off,
            self.data.len() as u32,
            0,
            0,
            self.data_align,
            0,
        );
        shdr(13, SHT_NOBITS, SHF_ALLOC | SHF_WRITE, bss_off, self.bss_size, 0, 0, 4, 0);
        shdr(
            18,
            SHT_REL,
            0,
            rel_text_off,
            rel_text.len() as u32,
            6, // .symtab
            1, // .text
            4,
            8,
        );
        shdr(
            28,
            SHT_REL,
            0,
            rel_data_off,
            rel_data.len() as u32,
            6,
            2, // .data
            4,
            8,
        );
        shdr(
            38,
            SHT_SYMTAB,
            0,
            symtab_off,
            symtab.len() as u32,
            7, // .strtab
            0,
            4,
            SYM_SIZE as u32,
        );
        shdr(46, SHT_STRTAB, 0, strtab_off, strtab.len() as u32, 0, 0, 1, 0);
        shdr(
            54,
            SHT_STRTAB,
            0,
            shstrtab_off,
            shstrtab.len() as u32,
            0,
            0,
            1,
            0,
        );

        buf.extend_from_slice(&self.text);
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&rel_text);
        buf.extend_from_slice(&rel_data);
        buf.extend_from_slice(&symtab);
        buf.extend_from_slice(&strtab);
        buf.extend_from_slice(shstrtab);
        buf
    }
}

/// Offsets of the interesting pieces of a built module image.
pub struct ModuleLayout {
    pub bytes: Vec<u8>,
    /// Offset of the extern-pointer slot in `.data`, when one was asked
    /// for.
    pub extern_slot: Option<u32>,
}

/// Builds a complete module object exporting the seven well-known
/// symbols, with `mod_init` at `.text+0` and `mod_fini` at `.text+16`.
///
/// `extern_ref` adds a `.data` pointer slot relocated against an
/// undefined symbol of that name, standing in for a module calling into a
/// service another module exports at init time.
pub fn build_module(name: &str, deps: &[&str], extern_ref: Option<&'static str>) -> ModuleLayout {
    let mut b = ElfBuilder::new();

    // Two stub Thumb functions (NOPs), 16 bytes apart.
    b.text = [0x00u8, 0xBF].repeat(16);

    let push_cstr = |data: &mut Vec<u8>, s: &str| {
        let at = data.len() as u32;
        data.extend_from_slice(s.as_bytes());
        data.push(0);
        while data.len() % 4 != 0 {
            data.push(0);
        }
        at
    };

    let mut data = Vec::new();
    let name_off = push_cstr(&mut data, name);
    let ver_string_off = push_cstr(&mut data, "0.1.1");
    let mut dep_offs = Vec::new();
    for dep in deps {
        dep_offs.push(push_cstr(&mut data, dep));
    }

    let ver_off = data.len() as u32;
    data.extend_from_slice(&0x0001_0001u32.to_le_bytes());
    let deps_size_off = data.len() as u32;
    data.extend_from_slice(&(deps.len() as u32).to_le_bytes());

    // mod_depends: one relocated string pointer per dependency; the
    // initial word is the addend (the string's offset in .data).
    let deps_off = data.len() as u32;
    for &off in &dep_offs {
        data.extend_from_slice(&off.to_le_bytes());
    }

    let extern_slot = extern_ref.map(|_| {
        let at = data.len() as u32;
        data.extend_from_slice(&0u32.to_le_bytes());
        at
    });

    b.data = data;
    b.syms = vec![
        Sym {
            name: "",
            value: 0,
            kind: 3, // STT_SECTION
            section: SymSection::Data,
        },
        Sym {
            name: "mod_name",
            value: name_off,
            kind: 1,
            section: SymSection::Data,
        },
        Sym {
            name: "mod_ver_string",
            value: ver_string_off,
            kind: 1,
            section: SymSection::Data,
        },
        Sym {
            name: "mod_ver",
            value: ver_off,
            kind: 1,
            section: SymSection::Data,
        },
        Sym {
            name: "mod_depends_size",
            value: deps_size_off,
            kind: 1,
            section: SymSection::Data,
        },
        Sym {
            name: "mod_depends",
            value: deps_off,
            kind: 1,
            section: SymSection::Data,
        },
        Sym {
            name: "mod_init",
            value: 0,
            kind: 2, // STT_FUNC
            section: SymSection::Text,
        },
        Sym {
            name: "mod_fini",
            value: 16,
            kind: 2,
            section: SymSection::Text,
        },
    ];
    if let Some(ext) = extern_ref {
        b.syms.push(Sym {
            name: ext,
            value: 0,
            kind: 0, // STT_NOTYPE
            section: SymSection::Undef,
        });
    }

    let data_section_sym = 1u32;
    for (i, _) in dep_offs.iter().enumerate() {
        b.data_rels.push(Rel {
            offset: deps_off + 4 * i as u32,
            sym_index: data_section_sym,
            r_type: 2, // R_ARM_ABS32
        });
    }
    if let (Some(slot), Some(ext)) = (extern_slot, extern_ref) {
        b.data_rels.push(Rel {
            offset: slot,
            sym_index: b.sym_index(ext),
            r_type: 2,
        });
    }

    ModuleLayout {
        bytes: b.build(),
        extern_slot,
    }
}

/// Builds ustar archives in memory.
#[derive(Default)]
pub struct TarBuilder {
    blob: Vec<u8>,
}

impl TarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_header(&mut self, path: &str, typeflag: u8, size: usize) {
        let mut block = [0u8; 512];
        block[..path.len()].copy_from_slice(path.as_bytes());
        let octal = format!("{size:011o}");
        block[124..135].copy_from_slice(octal.as_bytes());
        block[156] = typeflag;
        self.blob.extend_from_slice(&block);
    }

    pub fn push_dir(&mut self, path: &str) -> &mut Self {
        self.push_header(path, b'5', 0);
        self
    }

    pub fn push_file(&mut self, path: &str, content: &[u8]) -> &mut Self {
        self.push_header(path, b'0', content.len());
        let padded = content.len().div_ceil(512) * 512;
        let start = self.blob.len();
        self.blob.resize(start + padded, 0);
        self.blob[start..start + content.len()].copy_from_slice(content);
        self
    }

    /// Terminates the archive and leaks it to the `'static` lifetime the
    /// mount API expects.
    pub fn finish(&mut self) -> &'static [u8] {
        let mut blob = core::mem::take(&mut self.blob);
        blob.extend_from_slice(&[0u8; 1024]);
        Vec::leak(blob)
    }
}
