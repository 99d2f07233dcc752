//! Runtime metadata block
//!
//! A fixed 16-word record the runtime allocates inside engine memory. It
//! stores the engine's runtime and context record offsets so that a restored
//! memory image can be re-attached to a different engine instance.
//!
//! ```text
//! word 0  magic (0x46564d21)
//! word 1  self offset
//! word 2  engine runtime record
//! word 3  engine context record
//! word 4  generation (fork depth)
//! 5..16   reserved, zero
//! ```
//!
//! After a restore the stored self offset is not trusted on its own: the
//! block is found by scanning memory for a word-aligned magic value whose
//! following word equals its own offset.

use crate::constants::{
    METADATA_BYTES, METADATA_MAGIC, METADATA_WORDS, META_CONTEXT, META_GENERATION, META_MAGIC,
    META_RUNTIME, META_SELF,
};
use crate::engine::EngineHandles;

/// Decoded metadata block, including where it lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataBlock {
    pub offset: u32,
    pub handles: EngineHandles,
    pub generation: u32,
}

fn read_word(memory: &[u8], at: usize) -> Option<u32> {
    let bytes = memory.get(at..at + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn write_word(memory: &mut [u8], at: usize, value: u32) {
    memory[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

impl MetadataBlock {
    pub fn new(offset: u32, handles: EngineHandles) -> Self {
        Self {
            offset,
            handles,
            generation: 0,
        }
    }

    /// Encode the block at its offset. `memory` must contain the whole block.
    pub fn write(&self, memory: &mut [u8]) {
        let base = self.offset as usize;
        let mut words = [0u32; METADATA_WORDS];
        words[META_MAGIC] = METADATA_MAGIC;
        words[META_SELF] = self.offset;
        words[META_RUNTIME] = self.handles.runtime;
        words[META_CONTEXT] = self.handles.context;
        words[META_GENERATION] = self.generation;
        for (i, word) in words.iter().enumerate() {
            write_word(memory, base + i * 4, *word);
        }
    }

    /// Decode a block at a known offset, if one is there.
    pub fn read_at(memory: &[u8], offset: usize) -> Option<Self> {
        if offset % 4 != 0 || offset.checked_add(METADATA_BYTES)? > memory.len() {
            return None;
        }
        let word = |index: usize| read_word(memory, offset + index * 4);
        if word(META_MAGIC)? != METADATA_MAGIC || word(META_SELF)? as usize != offset {
            return None;
        }
        Some(Self {
            offset: offset as u32,
            handles: EngineHandles {
                runtime: word(META_RUNTIME)?,
                context: word(META_CONTEXT)?,
            },
            generation: word(META_GENERATION)?,
        })
    }

    /// Locate the block by content scan.
    pub fn scan(memory: &[u8]) -> Option<Self> {
        let magic = METADATA_MAGIC.to_le_bytes();
        memory
            .chunks_exact(4)
            .enumerate()
            .filter(|(_, chunk)| *chunk == magic)
            .find_map(|(i, _)| Self::read_at(memory, i * 4))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handles() -> EngineHandles {
        EngineHandles {
            runtime: 0x100,
            context: 0x180,
        }
    }

    #[test]
    fn test_write_then_scan_finds_block() {
        let mut memory = vec![0u8; 4096];
        let mut block = MetadataBlock::new(0x400, handles());
        block.generation = 3;
        block.write(&mut memory);
        assert_eq!(MetadataBlock::scan(&memory), Some(block));
    }

    #[test]
    fn test_scan_skips_stray_magic() {
        let mut memory = vec![0u8; 4096];
        // magic with a self word that does not match its position
        write_word(&mut memory, 0x40, METADATA_MAGIC);
        write_word(&mut memory, 0x44, 0x999);
        let block = MetadataBlock::new(0x800, handles());
        block.write(&mut memory);
        assert_eq!(MetadataBlock::scan(&memory).map(|b| b.offset), Some(0x800));
    }

    #[test]
    fn test_scan_rejects_missing_or_truncated_block() {
        assert_eq!(MetadataBlock::scan(&[0u8; 1024]), None);

        let mut memory = vec![0u8; 0x410];
        write_word(&mut memory, 0x400, METADATA_MAGIC);
        write_word(&mut memory, 0x404, 0x400);
        assert_eq!(MetadataBlock::scan(&memory), None);
    }

    #[test]
    fn test_read_at_requires_alignment() {
        let mut memory = vec![0u8; 4096];
        MetadataBlock::new(0x200, handles()).write(&mut memory);
        assert!(MetadataBlock::read_at(&memory, 0x200).is_some());
        assert!(MetadataBlock::read_at(&memory, 0x202).is_none());
    }
}
