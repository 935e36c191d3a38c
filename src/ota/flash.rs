//! Block-aligned flash writing.
//!
//! Flash must be erased before it is written. The writer keeps an erase
//! watermark and erases ahead of each chunk: a full erase block where the
//! absolute address is block-aligned and a whole block still fits the
//! partition, a single sector otherwise (the head and tail of an unaligned
//! partition). Chunks that are entirely 0xFF are skipped on unencrypted
//! partitions, since erased NOR flash already reads as all ones.

use super::OtaPartition;
use crate::core::{OtaError, FLASH_BLOCK_SIZE, FLASH_SECTOR_SIZE};

/// Erase-ahead chunk writer for one streaming session.
#[derive(Default)]
pub struct FlashWriter {
    erased_to: u64,
}

impl FlashWriter {
    /// Start a session with nothing erased yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `data` at partition-relative `offset`, erasing ahead as needed.
    ///
    /// The first `skip` bytes of `data` are withheld (the deferred image
    /// head); the erase still covers them so the final commit write needs no
    /// erase of its own.
    pub fn write_chunk<P: OtaPartition>(
        &mut self,
        partition: &mut P,
        offset: u64,
        data: &[u8],
        skip: usize,
    ) -> Result<(), OtaError> {
        self.erase_ahead(partition, offset + data.len() as u64)?;

        let data = &data[skip..];
        if data.is_empty() {
            return Ok(());
        }
        if partition.encrypted() || has_data(data) {
            partition.write(offset + skip as u64, data)?;
        }
        Ok(())
    }

    fn erase_ahead<P: OtaPartition>(&mut self, partition: &mut P, upto: u64) -> Result<(), OtaError> {
        while self.erased_to < upto {
            let absolute = partition.address() + self.erased_to;
            let span = if absolute % FLASH_BLOCK_SIZE as u64 == 0
                && self.erased_to + FLASH_BLOCK_SIZE as u64 <= partition.size()
            {
                FLASH_BLOCK_SIZE as u64
            } else {
                FLASH_SECTOR_SIZE as u64
            };
            partition.erase_range(self.erased_to, span)?;
            self.erased_to += span;
        }
        Ok(())
    }
}

/// Whether a buffer contains anything other than erased-flash ones.
/// Only 32-bit-aligned buffers qualify for skipping; anything else is
/// treated as data.
fn has_data(data: &[u8]) -> bool {
    if data.is_empty() || data.len() % 4 != 0 {
        return true;
    }
    data.chunks_exact(4).any(|word| word != [0xFF; 4])
}
