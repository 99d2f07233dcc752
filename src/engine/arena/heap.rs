//! Linear memory and allocator for the arena engine
//!
//! All engine state lives in one `Vec<u8>`. Pointers are `u32` byte offsets
//! into it, so a byte-for-byte copy of the arena is a complete, relocatable
//! image of the engine.
//!
//! # Layout
//!
//! ```text
//! 0x00  top        u32   bump pointer (0 = arena never formatted)
//! 0x04  live       u32   bytes currently handed out
//! 0x08  free[k]    u32   free-list head for size class k
//! 0x80  first block
//! ```
//!
//! Every block starts with an 8-byte header: its size class, then its state
//! (free, in use or pinned, plus the collector's mark bit). Class `k` blocks
//! are `16 << k` bytes including the header and tile the heap from
//! [`HEADER_SIZE`] up to the bump pointer without gaps, so the heap can be
//! walked block by block. Freed blocks go onto the free list of their class;
//! the first payload word links the list.
//!
//! Allocation tries the exact free list, then the bump pointer, then splits a
//! larger free block. [`Arena::sweep`] rebuilds all free lists, merging
//! neighbouring free blocks and returning a free tail to the bump region.

use crate::engine::EngineError;

pub(crate) const HEADER_SIZE: u32 = 0x80;
const BLOCK_HEADER: u32 = 8;
const NUM_CLASSES: usize = 24;
const TOP: u32 = 0x00;
const LIVE: u32 = 0x04;
const FREE_LISTS: u32 = 0x08;

const BLOCK_FREE: u32 = 0;
const BLOCK_USED: u32 = 1;
/// Allocated for the host; kept by every sweep
const BLOCK_PINNED: u32 = 2;
const BLOCK_STATE: u32 = 3;
const BLOCK_MARK: u32 = 4;

/// Pointer into the arena. `0` is the null pointer.
pub(crate) type Ptr = u32;

/// Linear memory with a size-class allocator
#[derive(Debug, Clone)]
pub(crate) struct Arena {
    bytes: Vec<u8>,
}

impl Arena {
    pub(crate) fn new(size: usize) -> Self {
        Arena {
            bytes: vec![0; size],
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Reset the arena to an empty, formatted state.
    pub(crate) fn format(&mut self) {
        self.bytes.fill(0);
        self.write_u32(TOP, HEADER_SIZE);
    }

    pub(crate) fn is_formatted(&self) -> bool {
        self.read_u32(TOP) >= HEADER_SIZE
    }

    /// Bytes currently allocated
    pub(crate) fn live_bytes(&self) -> u32 {
        self.read_u32(LIVE)
    }

    /// End of the block region
    pub(crate) fn top(&self) -> u32 {
        self.read_u32(TOP)
    }

    fn class_for(size: usize) -> Option<usize> {
        let needed = size + BLOCK_HEADER as usize;
        (0..NUM_CLASSES).find(|&k| (16usize << k) >= needed)
    }

    /// Allocate a zeroed block of at least `size` bytes.
    pub(crate) fn allocate(&mut self, size: usize) -> Result<Ptr, EngineError> {
        let class = Self::class_for(size).ok_or(EngineError::OutOfMemory { requested: size })?;
        let block_size = 16u32 << class;
        let head_slot = FREE_LISTS + 4 * class as u32;

        let block = match self.read_u32(head_slot) {
            0 => match self.bump(block_size) {
                Some(block) => block,
                None => self
                    .split_larger(class)
                    .ok_or(EngineError::OutOfMemory { requested: size })?,
            },
            block => {
                let next = self.read_u32(block + BLOCK_HEADER);
                self.write_u32(head_slot, next);
                block
            }
        };

        self.write_u32(block, class as u32);
        self.write_u32(block + 4, BLOCK_USED);
        let payload = block + BLOCK_HEADER;
        let start = payload as usize;
        self.bytes[start..start + (block_size - BLOCK_HEADER) as usize].fill(0);
        let live = self.read_u32(LIVE);
        self.write_u32(LIVE, live + block_size);
        Ok(payload)
    }

    /// Allocate a block that no sweep reclaims.
    pub(crate) fn allocate_pinned(&mut self, size: usize) -> Result<Ptr, EngineError> {
        let ptr = self.allocate(size)?;
        self.write_u32(ptr - BLOCK_HEADER + 4, BLOCK_PINNED);
        Ok(ptr)
    }

    fn bump(&mut self, block_size: u32) -> Option<Ptr> {
        let top = self.read_u32(TOP);
        let end = top as usize + block_size as usize;
        if end > self.bytes.len() {
            return None;
        }
        self.write_u32(TOP, end as u32);
        Some(top)
    }

    /// Take the smallest free block above `class` and split it down, keeping
    /// the first `16 << class` bytes and freeing the rest.
    fn split_larger(&mut self, class: usize) -> Option<Ptr> {
        let larger = (class + 1..NUM_CLASSES).find(|&k| self.read_u32(FREE_LISTS + 4 * k as u32) != 0)?;
        let head_slot = FREE_LISTS + 4 * larger as u32;
        let block = self.read_u32(head_slot);
        let next = self.read_u32(block + BLOCK_HEADER);
        self.write_u32(head_slot, next);
        for k in class..larger {
            self.push_free(block + (16 << k), k);
        }
        Some(block)
    }

    fn push_free(&mut self, block: Ptr, class: usize) {
        let head_slot = FREE_LISTS + 4 * class as u32;
        let head = self.read_u32(head_slot);
        self.write_u32(block, class as u32);
        self.write_u32(block + 4, BLOCK_FREE);
        self.write_u32(block + BLOCK_HEADER, head);
        self.write_u32(head_slot, block);
    }

    /// Return a block to its size-class free list.
    pub(crate) fn free(&mut self, ptr: Ptr) {
        let Some(block) = self.block_of(ptr) else {
            return;
        };
        let class = self.read_u32(block) as usize;
        self.push_free(block, class);
        let live = self.read_u32(LIVE);
        self.write_u32(LIVE, live.saturating_sub(16 << class));
    }

    /// Block header of the allocated block whose payload starts at `ptr`.
    fn block_of(&self, ptr: Ptr) -> Option<Ptr> {
        let block = ptr.checked_sub(BLOCK_HEADER)?;
        if block < HEADER_SIZE || block % 16 != 0 || ptr >= self.read_u32(TOP) {
            return None;
        }
        let class = self.read_u32(block) as usize;
        let state = self.read_u32(block + 4) & BLOCK_STATE;
        let fits = class < NUM_CLASSES
            && block as usize + (16usize << class) <= self.read_u32(TOP) as usize;
        (fits && state != BLOCK_FREE).then_some(block)
    }

    /// Whether `ptr` is the payload of a block that is currently allocated.
    pub(crate) fn is_allocated(&self, ptr: Ptr) -> bool {
        self.block_of(ptr).is_some()
    }

    /// Set the mark bit of the block at `ptr`. Returns `true` the first time.
    pub(crate) fn mark(&mut self, ptr: Ptr) -> bool {
        match self.block_of(ptr) {
            Some(block) => {
                let state = self.read_u32(block + 4);
                if state & BLOCK_MARK != 0 {
                    return false;
                }
                self.write_u32(block + 4, state | BLOCK_MARK);
                true
            }
            None => false,
        }
    }

    /// Free every unmarked, unpinned block and clear the marks.
    ///
    /// Free space is rebuilt from scratch: runs of neighbouring free blocks
    /// are merged and re-cut into the largest classes that fit, and a free
    /// run at the end of the heap lowers the bump pointer. Returns the number
    /// of bytes reclaimed.
    pub(crate) fn sweep(&mut self) -> u32 {
        for class in 0..NUM_CLASSES {
            self.write_u32(FREE_LISTS + 4 * class as u32, 0);
        }
        let top = self.read_u32(TOP);
        let mut live = 0u32;
        let mut reclaimed = 0u32;
        let mut run: Option<Ptr> = None;
        let mut block = HEADER_SIZE;
        while block < top {
            let class = self.read_u32(block) as usize;
            if class >= NUM_CLASSES {
                break;
            }
            let size = 16u32 << class;
            let state = self.read_u32(block + 4);
            if state & BLOCK_MARK != 0 || state & BLOCK_STATE == BLOCK_PINNED {
                self.write_u32(block + 4, state & !BLOCK_MARK);
                live += size;
                if let Some(start) = run.take() {
                    self.release_run(start, block);
                }
            } else {
                if state & BLOCK_STATE == BLOCK_USED {
                    reclaimed += size;
                }
                self.write_u32(block + 4, BLOCK_FREE);
                run.get_or_insert(block);
            }
            block += size;
        }
        if let Some(start) = run {
            self.write_u32(TOP, start);
        }
        self.write_u32(LIVE, live);
        reclaimed
    }

    /// Cut the free range `start..end` into free-list blocks.
    fn release_run(&mut self, start: Ptr, end: Ptr) {
        let mut at = start;
        while at < end {
            let remaining = end - at;
            let class = (0..NUM_CLASSES)
                .rev()
                .find(|&k| (16u32 << k) <= remaining)
                .unwrap_or(0);
            self.push_free(at, class);
            at += 16 << class;
        }
    }

    /// Usable payload size of the block at `ptr`
    pub(crate) fn capacity(&self, ptr: Ptr) -> usize {
        let class = self.read_u32(ptr - BLOCK_HEADER);
        (16usize << class) - BLOCK_HEADER as usize
    }

    // ===== Raw access =====

    pub(crate) fn read_u8(&self, at: Ptr) -> u8 {
        self.bytes[at as usize]
    }

    pub(crate) fn write_u8(&mut self, at: Ptr, value: u8) {
        self.bytes[at as usize] = value;
    }

    pub(crate) fn read_u32(&self, at: Ptr) -> u32 {
        let at = at as usize;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[at..at + 4]);
        u32::from_le_bytes(word)
    }

    pub(crate) fn write_u32(&mut self, at: Ptr, value: u32) {
        let at = at as usize;
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn read_f64(&self, at: Ptr) -> f64 {
        let at = at as usize;
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.bytes[at..at + 8]);
        f64::from_le_bytes(word)
    }

    pub(crate) fn write_f64(&mut self, at: Ptr, value: f64) {
        let at = at as usize;
        self.bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn slice(&self, at: Ptr, len: usize) -> &[u8] {
        let at = at as usize;
        &self.bytes[at..at + len]
    }

    pub(crate) fn write_slice(&mut self, at: Ptr, data: &[u8]) {
        let at = at as usize;
        self.bytes[at..at + data.len()].copy_from_slice(data);
    }

    /// Copy `len` bytes between two blocks of this arena.
    pub(crate) fn copy_within(&mut self, from: Ptr, to: Ptr, len: usize) {
        let from = from as usize;
        self.bytes.copy_within(from..from + len, to as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_is_zeroed_and_aligned() {
        let mut arena = Arena::new(64 * 1024);
        arena.format();
        let a = arena.allocate(10).unwrap();
        let b = arena.allocate(100).unwrap();
        assert_eq!(a % 8, 0);
        assert_eq!(b % 8, 0);
        assert!(b > a);
        assert!(arena.slice(b, 100).iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_free_block_is_reused() {
        let mut arena = Arena::new(64 * 1024);
        arena.format();
        let a = arena.allocate(24).unwrap();
        arena.write_u32(a, 0xdead_beef);
        arena.free(a);
        let b = arena.allocate(20).unwrap();
        assert_eq!(a, b);
        assert_eq!(arena.read_u32(b), 0);
    }

    #[test]
    fn test_out_of_memory() {
        let mut arena = Arena::new(4096);
        arena.format();
        let result = arena.allocate(8192);
        assert!(matches!(result, Err(EngineError::OutOfMemory { .. })));
    }

    #[test]
    fn test_live_bytes_tracking() {
        let mut arena = Arena::new(64 * 1024);
        arena.format();
        assert_eq!(arena.live_bytes(), 0);
        let a = arena.allocate(8).unwrap();
        assert_eq!(arena.live_bytes(), 16);
        arena.free(a);
        assert_eq!(arena.live_bytes(), 0);
    }

    #[test]
    fn test_double_free_is_ignored() {
        let mut arena = Arena::new(64 * 1024);
        arena.format();
        let a = arena.allocate(24).unwrap();
        arena.free(a);
        arena.free(a);
        let b = arena.allocate(24).unwrap();
        let c = arena.allocate(24).unwrap();
        assert_eq!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn test_larger_free_block_is_split() {
        let mut arena = Arena::new(4096);
        arena.format();
        let big = arena.allocate(1000).unwrap();
        while arena.allocate(1000).is_ok() {}
        while arena.allocate(8).is_ok() {}
        arena.free(big);
        // bump region is exhausted; the 1 KiB block serves four 256-byte blocks
        let parts: Vec<Ptr> = (0..4).map(|_| arena.allocate(200).unwrap()).collect();
        assert!(parts.contains(&big));
        assert!(parts.iter().all(|&p| p >= big && p < big + 1024));
    }

    #[test]
    fn test_sweep_reclaims_unmarked_blocks() {
        let mut arena = Arena::new(64 * 1024);
        arena.format();
        let kept = arena.allocate(8).unwrap();
        let pinned = arena.allocate_pinned(8).unwrap();
        let garbage: Vec<Ptr> = (0..8).map(|_| arena.allocate(8).unwrap()).collect();
        let tail = arena.allocate(8).unwrap();

        assert!(arena.mark(kept));
        assert!(!arena.mark(kept));
        assert!(arena.mark(tail));
        assert_eq!(arena.sweep(), 8 * 16);
        assert_eq!(arena.live_bytes(), 3 * 16);
        assert!(arena.is_allocated(kept) && arena.is_allocated(pinned));
        assert!(garbage.iter().all(|&p| !arena.is_allocated(p)));

        // the eight neighbouring 16-byte blocks merged into one 128-byte block
        let merged = arena.allocate(100).unwrap();
        assert_eq!(merged, garbage[0]);

        // marks are cleared, so an unmarked sweep frees the tail and lowers the top
        let top = arena.top();
        arena.mark(kept);
        arena.mark(merged);
        arena.sweep();
        assert!(arena.top() < top);
        assert!(arena.is_allocated(pinned));
        assert!(!arena.is_allocated(tail));
    }
}
