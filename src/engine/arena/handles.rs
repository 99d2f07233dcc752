//! Runtime/context records and the value handle table
//!
//! Both records live inside the arena. The runtime record points at the
//! context record; the context record holds the roots (global object, script
//! scope, shared natives) and the handle table. Entries of the handle table
//! are 24 bytes: a value slot, a reference count and a free-list link.
//! Handle ids are 1-based table indices.

use super::heap::{Arena, Ptr};
use super::value::{Slot, SLOT_SIZE};
use crate::engine::{EngineError, HandleId};

const RUNTIME_TAG: u32 = 0x5254_5243;
const CONTEXT_TAG: u32 = 0x4354_5843;
const RUNTIME_RECORD_SIZE: usize = 16;
const CONTEXT_RECORD_SIZE: usize = 64;

const HANDLE_ENTRY: u32 = SLOT_SIZE + 8;
const INITIAL_HANDLES: u32 = 64;

/// Word fields of the context record
#[derive(Debug, Clone, Copy)]
pub(crate) enum CtxField {
    Runtime = 1,
    Global = 2,
    ScriptScope = 3,
    HandleTable = 4,
    HandleCapacity = 5,
    HandleFree = 6,
    HandleNext = 7,
    ArrayPush = 8,
}

impl Arena {
    /// Allocate the runtime and context records. Returns `(runtime, context)`.
    pub(crate) fn create_records(&mut self) -> Result<(Ptr, Ptr), EngineError> {
        let runtime = self.allocate(RUNTIME_RECORD_SIZE)?;
        let context = self.allocate(CONTEXT_RECORD_SIZE)?;
        self.write_u32(runtime, RUNTIME_TAG);
        self.write_u32(runtime + 4, context);
        self.write_u32(context, CONTEXT_TAG);
        self.set_ctx(context, CtxField::Runtime, runtime);

        let table = self.allocate((INITIAL_HANDLES * HANDLE_ENTRY) as usize)?;
        self.set_ctx(context, CtxField::HandleTable, table);
        self.set_ctx(context, CtxField::HandleCapacity, INITIAL_HANDLES);
        // index 0 is reserved as the invalid handle
        self.set_ctx(context, CtxField::HandleNext, 1);
        Ok((runtime, context))
    }

    /// Check that `runtime` and `context` name a matching record pair.
    pub(crate) fn records_valid(&self, runtime: Ptr, context: Ptr) -> bool {
        let in_bounds = |ptr: Ptr, size: usize| {
            ptr as usize >= super::heap::HEADER_SIZE as usize && ptr as usize + size <= self.len()
        };
        in_bounds(runtime, RUNTIME_RECORD_SIZE)
            && in_bounds(context, CONTEXT_RECORD_SIZE)
            && self.read_u32(runtime) == RUNTIME_TAG
            && self.read_u32(runtime + 4) == context
            && self.read_u32(context) == CONTEXT_TAG
            && self.ctx(context, CtxField::Runtime) == runtime
    }

    pub(crate) fn ctx(&self, context: Ptr, field: CtxField) -> u32 {
        self.read_u32(context + 4 * field as u32)
    }

    pub(crate) fn set_ctx(&mut self, context: Ptr, field: CtxField, value: u32) {
        self.write_u32(context + 4 * field as u32, value);
    }

    fn handle_entry(&self, context: Ptr, handle: HandleId) -> Result<Ptr, EngineError> {
        let next = self.ctx(context, CtxField::HandleNext);
        if handle == 0 || handle >= next {
            return Err(EngineError::InvalidHandle(handle));
        }
        let entry = self.ctx(context, CtxField::HandleTable) + handle * HANDLE_ENTRY;
        if self.read_u32(entry + SLOT_SIZE) == 0 {
            return Err(EngineError::InvalidHandle(handle));
        }
        Ok(entry)
    }

    /// Store `slot` in a fresh handle with a reference count of one.
    pub(crate) fn new_handle(&mut self, context: Ptr, slot: Slot) -> Result<HandleId, EngineError> {
        let free = self.ctx(context, CtxField::HandleFree);
        let handle = if free != 0 {
            let entry = self.ctx(context, CtxField::HandleTable) + free * HANDLE_ENTRY;
            let next_free = self.read_u32(entry + SLOT_SIZE + 4);
            self.set_ctx(context, CtxField::HandleFree, next_free);
            free
        } else {
            let next = self.ctx(context, CtxField::HandleNext);
            let capacity = self.ctx(context, CtxField::HandleCapacity);
            if next == capacity {
                self.grow_handles(context, capacity)?;
            }
            self.set_ctx(context, CtxField::HandleNext, next + 1);
            next
        };
        let entry = self.ctx(context, CtxField::HandleTable) + handle * HANDLE_ENTRY;
        self.write_slot(entry, slot);
        self.write_u32(entry + SLOT_SIZE, 1);
        self.write_u32(entry + SLOT_SIZE + 4, 0);
        Ok(handle)
    }

    fn grow_handles(&mut self, context: Ptr, capacity: u32) -> Result<(), EngineError> {
        let new_capacity = capacity * 2;
        let table = self.allocate((new_capacity * HANDLE_ENTRY) as usize)?;
        let old = self.ctx(context, CtxField::HandleTable);
        self.copy_within(old, table, (capacity * HANDLE_ENTRY) as usize);
        self.free(old);
        self.set_ctx(context, CtxField::HandleTable, table);
        self.set_ctx(context, CtxField::HandleCapacity, new_capacity);
        Ok(())
    }

    pub(crate) fn handle_slot(&self, context: Ptr, handle: HandleId) -> Result<Slot, EngineError> {
        let entry = self.handle_entry(context, handle)?;
        Ok(self.read_slot(entry))
    }

    pub(crate) fn dup_handle(&mut self, context: Ptr, handle: HandleId) -> Result<HandleId, EngineError> {
        let entry = self.handle_entry(context, handle)?;
        let count = self.read_u32(entry + SLOT_SIZE);
        self.write_u32(entry + SLOT_SIZE, count + 1);
        Ok(handle)
    }

    pub(crate) fn free_handle(&mut self, context: Ptr, handle: HandleId) -> Result<(), EngineError> {
        let entry = self.handle_entry(context, handle)?;
        let count = self.read_u32(entry + SLOT_SIZE) - 1;
        self.write_u32(entry + SLOT_SIZE, count);
        if count == 0 {
            self.write_slot(entry, Slot::Undefined);
            let free = self.ctx(context, CtxField::HandleFree);
            self.write_u32(entry + SLOT_SIZE + 4, free);
            self.set_ctx(context, CtxField::HandleFree, handle);
        }
        Ok(())
    }

    /// Values of all handles with a non-zero reference count
    pub(crate) fn handle_values(&self, context: Ptr) -> Vec<Slot> {
        let table = self.ctx(context, CtxField::HandleTable);
        (1..self.ctx(context, CtxField::HandleNext))
            .map(|h| table + h * HANDLE_ENTRY)
            .filter(|&entry| self.read_u32(entry + SLOT_SIZE) != 0)
            .map(|entry| self.read_slot(entry))
            .collect()
    }

    /// Handles with a non-zero reference count
    pub(crate) fn live_handles(&self, context: Ptr) -> usize {
        let table = self.ctx(context, CtxField::HandleTable);
        (1..self.ctx(context, CtxField::HandleNext))
            .filter(|&h| self.read_u32(table + h * HANDLE_ENTRY + SLOT_SIZE) != 0)
            .count()
    }
}
