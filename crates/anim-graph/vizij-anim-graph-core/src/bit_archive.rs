//! Fixed-size bit-packed archive used to record runtime state for tooling playback.

use crate::error::GraphError;

/// Bit writer/reader over `NUM_WORDS` 64-bit words.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitArchive<const NUM_WORDS: usize> {
    words: [u64; NUM_WORDS],
    write_cursor: usize,
    read_cursor: usize,
}

/// 1280-bit archive sized for one bone mask task list.
pub type BoneMaskTaskArchive = BitArchive<20>;

impl<const NUM_WORDS: usize> Default for BitArchive<NUM_WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const NUM_WORDS: usize> BitArchive<NUM_WORDS> {
    pub const CAPACITY_BITS: usize = NUM_WORDS * 64;

    pub fn new() -> Self {
        Self {
            words: [0; NUM_WORDS],
            write_cursor: 0,
            read_cursor: 0,
        }
    }

    /// Rebuild an archive from previously recorded words.
    pub fn from_words(words: [u64; NUM_WORDS], bits_written: usize) -> Self {
        debug_assert!(bits_written <= Self::CAPACITY_BITS);
        Self {
            words,
            write_cursor: bits_written,
            read_cursor: 0,
        }
    }

    pub fn words(&self) -> &[u64; NUM_WORDS] {
        &self.words
    }

    #[inline]
    pub fn bits_written(&self) -> usize {
        self.write_cursor
    }

    pub fn reset(&mut self) {
        self.words = [0; NUM_WORDS];
        self.write_cursor = 0;
        self.read_cursor = 0;
    }

    pub fn rewind(&mut self) {
        self.read_cursor = 0;
    }

    /// Append the low `num_bits` bits of `value`. Overflowing the archive is a fatal error.
    pub fn write_uint(&mut self, value: u32, num_bits: u32) {
        assert!(num_bits <= 32);
        assert!(
            self.write_cursor + num_bits as usize <= Self::CAPACITY_BITS,
            "bit archive overflow"
        );
        debug_assert!(num_bits == 32 || value < (1u32 << num_bits));

        let mut remaining = num_bits as usize;
        let mut bits = value as u64;
        while remaining > 0 {
            let word = self.write_cursor / 64;
            let offset = self.write_cursor % 64;
            let count = remaining.min(64 - offset);
            let mask = (1u64 << count) - 1;
            self.words[word] |= (bits & mask) << offset;
            bits >>= count;
            self.write_cursor += count;
            remaining -= count;
        }
    }

    pub fn read_uint(&mut self, num_bits: u32) -> Result<u32, GraphError> {
        assert!(num_bits <= 32);
        if self.read_cursor + num_bits as usize > self.write_cursor {
            return Err(GraphError::CorruptArchive(format!(
                "read of {num_bits} bits at {} exceeds {} written bits",
                self.read_cursor, self.write_cursor
            )));
        }

        let mut remaining = num_bits as usize;
        let mut value = 0u64;
        let mut shift = 0;
        while remaining > 0 {
            let word = self.read_cursor / 64;
            let offset = self.read_cursor % 64;
            let count = remaining.min(64 - offset);
            let mask = (1u64 << count) - 1;
            value |= ((self.words[word] >> offset) & mask) << shift;
            shift += count;
            self.read_cursor += count;
            remaining -= count;
        }
        Ok(value as u32)
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_uint(value as u32, 1);
    }

    pub fn read_bool(&mut self) -> Result<bool, GraphError> {
        Ok(self.read_uint(1)? != 0)
    }

    /// Quantize a `[0, 1]` value onto `num_bits` bits. `0.0` and `1.0` are stored exactly.
    pub fn write_normalized_float(&mut self, value: f32, num_bits: u32) {
        debug_assert!((1..=24).contains(&num_bits));
        let max = ((1u32 << num_bits) - 1) as f32;
        let quantized = (value.clamp(0.0, 1.0) * max).round() as u32;
        self.write_uint(quantized, num_bits);
    }

    pub fn read_normalized_float(&mut self, num_bits: u32) -> Result<f32, GraphError> {
        debug_assert!((1..=24).contains(&num_bits));
        let max = ((1u32 << num_bits) - 1) as f32;
        Ok(self.read_uint(num_bits)? as f32 / max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_straddling_word_boundaries_survive() {
        let mut archive = BitArchive::<2>::new();
        archive.write_uint(0b101, 3);
        archive.write_uint(0xdead_beef, 32);
        archive.write_uint(0x1234_5678, 32);
        archive.write_bool(true);
        assert_eq!(archive.bits_written(), 68);

        assert_eq!(archive.read_uint(3).unwrap(), 0b101);
        assert_eq!(archive.read_uint(32).unwrap(), 0xdead_beef);
        assert_eq!(archive.read_uint(32).unwrap(), 0x1234_5678);
        assert!(archive.read_bool().unwrap());
        assert!(archive.read_uint(1).is_err());
    }

    #[test]
    fn normalized_floats_keep_endpoints() {
        let mut archive = BoneMaskTaskArchive::new();
        archive.write_normalized_float(0.0, 16);
        archive.write_normalized_float(1.0, 16);
        archive.write_normalized_float(0.3, 16);
        assert_eq!(archive.read_normalized_float(16).unwrap(), 0.0);
        assert_eq!(archive.read_normalized_float(16).unwrap(), 1.0);
        assert!((archive.read_normalized_float(16).unwrap() - 0.3).abs() < 1e-4);
    }

    #[test]
    #[should_panic(expected = "bit archive overflow")]
    fn writing_past_capacity_is_fatal() {
        let mut archive = BitArchive::<1>::new();
        archive.write_uint(0, 32);
        archive.write_uint(0, 32);
        archive.write_uint(0, 1);
    }
}
