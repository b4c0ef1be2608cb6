//! ELF32 file header parsing.
//!
//! Validates and extracts the ELF32 file header from raw bytes using safe
//! field extraction via `from_le_bytes()`. The accepted input contract is
//! deliberately narrow: little-endian, 32-bit, ARM, relocatable.

use core::fmt;

/// ELF magic bytes: `\x7fELF`.
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF class: 32-bit.
const ELFCLASS32: u8 = 1;

/// ELF data encoding: little-endian.
const ELFDATA2LSB: u8 = 1;

/// ELF type: relocatable object.
const ET_REL: u16 = 1;

/// ELF machine: ARM.
const EM_ARM: u16 = 40;

/// ELF version: current.
const EV_CURRENT: u32 = 1;

/// Size of an ELF32 file header (52 bytes).
pub(crate) const ELF32_EHDR_SIZE: usize = 52;

/// Size of an ELF32 section header entry (40 bytes).
pub(crate) const ELF32_SHDR_SIZE: usize = 40;

/// Read a little-endian `u16` from `data` at byte offset `off`.
///
/// # Panics
///
/// Panics if `off + 2 > data.len()`. Callers must bounds-check first.
pub(crate) fn le_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(*data[off..].first_chunk().unwrap())
}

/// Read a little-endian `u32` from `data` at byte offset `off`.
pub(crate) fn le_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(*data[off..].first_chunk().unwrap())
}

/// Errors that can occur when parsing an ELF object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// The file does not start with the ELF magic bytes.
    BadMagic,
    /// The object is not 32-bit (`ELFCLASS32`).
    UnsupportedClass,
    /// The object is not little-endian.
    UnsupportedEncoding,
    /// The ELF type is not `ET_REL`.
    UnsupportedType,
    /// The machine type is not `EM_ARM`.
    UnsupportedMachine,
    /// The ELF version is not `EV_CURRENT`.
    UnsupportedVersion,
    /// The declared header size is not 52 bytes.
    BadHeaderSize,
    /// The input data is too short for the declared structure.
    Truncated,
    /// A header offset or size is out of bounds.
    InvalidOffset,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "invalid ELF magic bytes"),
            Self::UnsupportedClass => write!(f, "unsupported ELF class (expected ELFCLASS32)"),
            Self::UnsupportedEncoding => {
                write!(f, "unsupported data encoding (expected little-endian)")
            }
            Self::UnsupportedType => write!(f, "unsupported ELF type (expected ET_REL)"),
            Self::UnsupportedMachine => write!(f, "unsupported machine type (expected EM_ARM)"),
            Self::UnsupportedVersion => write!(f, "unsupported ELF version"),
            Self::BadHeaderSize => write!(f, "inconsistent ELF header size"),
            Self::Truncated => write!(f, "input data truncated"),
            Self::InvalidOffset => write!(f, "invalid header offset or size"),
        }
    }
}

/// Parsed ELF32 file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Header {
    /// ELF type (always `ET_REL` after a successful parse).
    pub e_type: u16,
    /// Target machine architecture.
    pub e_machine: u16,
    /// Offset of the section header table in the file.
    pub e_shoff: u32,
    /// Size of each section header entry.
    pub e_shentsize: u16,
    /// Number of section header entries.
    pub e_shnum: u16,
    /// Section header string table index.
    pub e_shstrndx: u16,
}

impl Elf32Header {
    /// Parse an ELF32 file header from raw bytes.
    ///
    /// Validates the magic, class, encoding, type, machine, version, the
    /// declared header size, and that the section header table fits within
    /// `data`.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError`] if validation fails or the data is too short.
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < ELF32_EHDR_SIZE {
            return Err(ElfError::Truncated);
        }

        if data[..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }

        // e_ident[EI_CLASS] and e_ident[EI_DATA]
        if data[4] != ELFCLASS32 {
            return Err(ElfError::UnsupportedClass);
        }
        if data[5] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEncoding);
        }

        let e_type = le_u16(data, 16);
        if e_type != ET_REL {
            return Err(ElfError::UnsupportedType);
        }

        let e_machine = le_u16(data, 18);
        if e_machine != EM_ARM {
            return Err(ElfError::UnsupportedMachine);
        }

        if le_u32(data, 20) != EV_CURRENT {
            return Err(ElfError::UnsupportedVersion);
        }

        // e_ehsize is a consistency check against toolchain mismatches.
        if le_u16(data, 40) as usize != ELF32_EHDR_SIZE {
            return Err(ElfError::BadHeaderSize);
        }

        let e_shoff = le_u32(data, 32);
        let e_shentsize = le_u16(data, 46);
        let e_shnum = le_u16(data, 48);
        let e_shstrndx = le_u16(data, 50);

        // Validate section header table bounds.
        if e_shnum > 0 {
            if (e_shentsize as usize) < ELF32_SHDR_SIZE {
                return Err(ElfError::InvalidOffset);
            }
            let sh_end = u64::from(e_shoff) + u64::from(e_shnum) * u64::from(e_shentsize);
            if sh_end > data.len() as u64 {
                return Err(ElfError::InvalidOffset);
            }
        }

        Ok(Self {
            e_type,
            e_machine,
            e_shoff,
            e_shentsize,
            e_shnum,
            e_shstrndx,
        })
    }
}
