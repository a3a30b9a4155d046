//! Read-only view over an ELF file in memory.

use core::marker::PhantomData;

use crate::class::ElfClass;
use crate::dynamic::DynEntry;
use crate::header::{ElfError, FileHeader};
use crate::segment::{ProgramHeader, PT_LOAD};

/// A parsed ELF image: the raw bytes plus the validated file header.
///
/// All accessors are zero-copy views into the original slice. Offsets are
/// raw file offsets; translating virtual addresses to file offsets goes
/// through [`Image::vaddr_to_offset`].
#[derive(Debug, Clone, Copy)]
pub struct Image<'a, C: ElfClass> {
    data: &'a [u8],
    header: FileHeader,
    _class: PhantomData<C>,
}

impl<'a, C: ElfClass> Image<'a, C> {
    /// Parse an ELF image from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError`] if the identification bytes are invalid for
    /// class `C` or the program header table is out of bounds.
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        let header = FileHeader::parse::<C>(data)?;
        Ok(Self {
            data,
            header,
            _class: PhantomData,
        })
    }

    /// Returns the parsed file header.
    #[must_use]
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Returns the raw file bytes.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Returns `len` bytes starting at raw file offset `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError::InvalidOffset`] if the range is out of bounds.
    pub fn bytes(&self, offset: u64, len: u64) -> Result<&'a [u8], ElfError> {
        let end = offset.checked_add(len).ok_or(ElfError::InvalidOffset)?;
        if end > self.data.len() as u64 {
            return Err(ElfError::InvalidOffset);
        }
        Ok(&self.data[usize_from(offset)..usize_from(end)])
    }

    /// Returns the program header record at raw file offset `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError::InvalidOffset`] if the record is out of bounds.
    pub fn program_header_at(&self, offset: u64) -> Result<ProgramHeader, ElfError> {
        let rec = self.bytes(offset, C::PHDR_SIZE as u64)?;
        Ok(C::parse_program_header(rec))
    }

    /// Returns an iterator over all program headers, in table order.
    ///
    /// The table bounds were validated at parse time.
    pub fn program_headers(&self) -> impl Iterator<Item = ProgramHeader> + 'a {
        let data = self.data;
        let phoff = usize_from(self.header.e_phoff);
        let phentsize = usize::from(self.header.e_phentsize);
        let phnum = usize::from(self.header.e_phnum);

        (0..phnum).map(move |i| C::parse_program_header(&data[phoff + i * phentsize..]))
    }

    /// Returns the dynamic entry record at raw file offset `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError::InvalidOffset`] if the record is out of bounds.
    pub fn dyn_at(&self, offset: u64) -> Result<DynEntry, ElfError> {
        let rec = self.bytes(offset, C::DYN_SIZE as u64)?;
        Ok(C::parse_dyn(rec))
    }

    /// Returns the NUL-terminated string at raw file offset `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError::BadString`] if no terminator is found before the
    /// end of the file or the bytes are not valid UTF-8.
    pub fn str_at(&self, offset: u64) -> Result<&'a str, ElfError> {
        if offset > self.data.len() as u64 {
            return Err(ElfError::InvalidOffset);
        }
        let tail = &self.data[usize_from(offset)..];
        let nul = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(ElfError::BadString)?;
        core::str::from_utf8(&tail[..nul]).map_err(|_| ElfError::BadString)
    }

    /// Translates a virtual address to a raw file offset through the
    /// `PT_LOAD` program headers.
    ///
    /// Only the file-backed portion of a segment translates; addresses in
    /// zero-fill regions have no file counterpart.
    #[must_use]
    pub fn vaddr_to_offset(&self, vaddr: u64) -> Option<u64> {
        self.program_headers()
            .filter(|phdr| phdr.p_type == PT_LOAD)
            .find(|phdr| vaddr >= phdr.p_vaddr && vaddr < phdr.p_vaddr + phdr.p_filesz)
            .map(|phdr| phdr.p_offset + (vaddr - phdr.p_vaddr))
    }

    /// Returns the NUL-terminated string at virtual address `vaddr`.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError::InvalidOffset`] if the address is not backed by
    /// any `PT_LOAD` segment, or [`ElfError::BadString`] per [`Image::str_at`].
    pub fn str_at_vaddr(&self, vaddr: u64) -> Result<&'a str, ElfError> {
        let offset = self.vaddr_to_offset(vaddr).ok_or(ElfError::InvalidOffset)?;
        self.str_at(offset)
    }
}

/// Narrow a file offset to `usize` after a bounds check against the slice
/// length, which itself fits in `usize`.
#[expect(
    clippy::cast_possible_truncation,
    reason = "callers bounds-check against data.len() first"
)]
fn usize_from(offset: u64) -> usize {
    offset as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Elf64;
    use crate::header::tests::{append_phdr64, make_elf64_header};
    use crate::segment::{PF_R, PF_X};

    #[test]
    fn parse_and_iterate_program_headers() {
        let mut buf = make_elf64_header();
        append_phdr64(&mut buf, PT_LOAD, PF_R | PF_X, 0x1000, 0x40_0000, 4, 4, 0x1000);
        append_phdr64(&mut buf, 4, 0, 0, 0, 0, 0, 8); // PT_NOTE — not filtered here

        let image = Image::<Elf64>::parse(&buf).expect("valid ELF");
        let phdrs: Vec<_> = image.program_headers().collect();
        assert_eq!(phdrs.len(), 2);
        assert_eq!(phdrs[0].p_type, PT_LOAD);
        assert_eq!(phdrs[0].p_vaddr, 0x40_0000);
        assert_eq!(phdrs[1].p_type, 4);
    }

    #[test]
    fn program_header_at_matches_iteration() {
        let mut buf = make_elf64_header();
        append_phdr64(&mut buf, PT_LOAD, PF_R, 0, 0x1000, 0x10, 0x20, 0x1000);

        let image = Image::<Elf64>::parse(&buf).expect("valid ELF");
        let phoff = image.header().e_phoff;
        let phdr = image.program_header_at(phoff).expect("in bounds");
        assert_eq!(phdr.p_memsz, 0x20);
        assert!(image.program_header_at(buf.len() as u64).is_err());
    }

    #[test]
    fn bytes_bounds_checked() {
        let buf = make_elf64_header();
        let image = Image::<Elf64>::parse(&buf).expect("valid ELF");
        assert!(image.bytes(0, 4).is_ok());
        assert_eq!(
            image.bytes(buf.len() as u64, 1),
            Err(ElfError::InvalidOffset)
        );
        assert_eq!(image.bytes(u64::MAX, 2), Err(ElfError::InvalidOffset));
    }

    #[test]
    fn str_at_reads_nul_terminated() {
        let mut buf = make_elf64_header();
        let off = buf.len() as u64;
        buf.extend_from_slice(b"libc.so.6\0");
        let image = Image::<Elf64>::parse(&buf).expect("valid ELF");
        assert_eq!(image.str_at(off), Ok("libc.so.6"));
    }

    #[test]
    fn str_at_rejects_unterminated() {
        let mut buf = make_elf64_header();
        let off = buf.len() as u64;
        buf.extend_from_slice(b"no-nul");
        let image = Image::<Elf64>::parse(&buf).expect("valid ELF");
        assert_eq!(image.str_at(off), Err(ElfError::BadString));
    }

    #[test]
    fn vaddr_translation_through_load_segment() {
        let mut buf = make_elf64_header();
        append_phdr64(&mut buf, PT_LOAD, PF_R, 0x200, 0x40_0000, 0x100, 0x100, 0x1000);
        let image = Image::<Elf64>::parse(&buf).expect("valid ELF");

        assert_eq!(image.vaddr_to_offset(0x40_0000), Some(0x200));
        assert_eq!(image.vaddr_to_offset(0x40_0010), Some(0x210));
        // Past the file-backed portion.
        assert_eq!(image.vaddr_to_offset(0x40_0100), None);
        assert_eq!(image.vaddr_to_offset(0x10_0000), None);
    }
}
