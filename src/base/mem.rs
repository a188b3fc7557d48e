use anyhow::bail;

/// Trait for word-granular simulated memories.
pub trait HasMemory {
    fn read_word_impl(&mut self, addr: u32) -> u32;
    fn write_word_impl(&mut self, addr: u32, data: u32);

    fn read_word(&mut self, addr: u32) -> Result<u32, anyhow::Error> {
        if addr & 0x3 != 0 {
            bail!("unaligned word read @ {:#010x}", addr);
        }
        Ok(self.read_word_impl(addr))
    }

    fn write_word(&mut self, addr: u32, data: u32) -> Result<(), anyhow::Error> {
        if addr & 0x3 != 0 {
            bail!("unaligned word write @ {:#010x}", addr);
        }
        self.write_word_impl(addr, data);
        Ok(())
    }

    /// Bulk initialization path used for program images.
    fn load_image(&mut self, base: u32, words: &[u32]) -> Result<(), anyhow::Error> {
        for (i, word) in words.iter().enumerate() {
            self.write_word(base + (i as u32) * 4, *word)?;
        }
        Ok(())
    }
}
