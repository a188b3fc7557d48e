use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use goblin::elf::{program_header, Elf};

/// One loadable segment of a program image, word-granular.
pub struct ImageSegment {
    pub base: u32,
    pub words: Vec<u32>,
    pub writable: bool,
}

/// A program image parsed from an ELF file. Loadable segments become the
/// banks' initial contents; segments not marked writable become the
/// read-only address ranges.
pub struct ProgramImage {
    pub segments: Vec<ImageSegment>,
}

impl ProgramImage {
    pub fn load(path: &Path) -> Result<ProgramImage, anyhow::Error> {
        let data = fs::read(path).with_context(|| format!("failed to read image {:?}", path))?;
        let elf = Elf::parse(&data).context("failed to parse ELF image")?;

        let mut segments = Vec::new();
        for ph in &elf.program_headers {
            if ph.p_type != program_header::PT_LOAD || ph.p_memsz == 0 {
                continue;
            }
            let offset = ph.p_offset as usize;
            let filesz = ph.p_filesz as usize;
            if offset + filesz > data.len() {
                bail!("invalid segment bounds: offset {} size {}", offset, filesz);
            }
            let mut bytes = data[offset..offset + filesz].to_vec();
            bytes.resize(ph.p_memsz as usize, 0);
            while bytes.len() % 4 != 0 {
                bytes.push(0);
            }
            let words = bytes
                .chunks_exact(4)
                .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
                .collect();
            segments.push(ImageSegment {
                base: ph.p_vaddr as u32,
                words,
                writable: ph.p_flags & program_header::PF_W != 0,
            });
        }
        if segments.is_empty() {
            bail!("image {:?} has no loadable segments", path);
        }
        Ok(ProgramImage { segments })
    }
}
