//! String and object cells
//!
//! # Cell layouts
//!
//! String: `len: u32` followed by `len` UTF-8 bytes.
//!
//! Object (32 bytes):
//!
//! ```text
//! +0  class     u32
//! +4  count     u32   property entries in use
//! +8  capacity  u32   property entries allocated
//! +12 props     u32   pointer to the property table
//! +16 aux[0..4] u32   class specific, see ObjectClass
//! ```
//!
//! A property entry is 24 bytes: key string pointer, attribute flags and a
//! value slot. Array elements live in a separate dense slot buffer so that
//! index access does not scan the property table.

use super::heap::{Arena, Ptr};
use super::value::{Slot, SLOT_SIZE};
use crate::engine::{EngineError, PropertyFlags};

pub(crate) const OBJECT_SIZE: usize = 32;
const PROP_ENTRY: u32 = 8 + SLOT_SIZE;

const OBJ_CLASS: u32 = 0;
const OBJ_COUNT: u32 = 4;
const OBJ_CAPACITY: u32 = 8;
const OBJ_PROPS: u32 = 12;
const OBJ_AUX: u32 = 16;

const FLAG_WRITABLE: u32 = 1;
const FLAG_ENUMERABLE: u32 = 2;
const FLAG_CONFIGURABLE: u32 = 4;

/// Aux word indices per class
pub(crate) const ARRAY_ELEMENTS: usize = 0;
pub(crate) const ARRAY_CAPACITY: usize = 1;
pub(crate) const ARRAY_LENGTH: usize = 2;
pub(crate) const CLOSURE_CODE: usize = 0;
pub(crate) const CLOSURE_ENV: usize = 1;
pub(crate) const CLOSURE_FLAGS: usize = 2;
pub(crate) const NATIVE_ID: usize = 0;
pub(crate) const SCOPE_PARENT: usize = 0;
pub(crate) const SCOPE_FLAGS: usize = 1;

pub(crate) const CLOSURE_ARROW: u32 = 1;
pub(crate) const SCOPE_FUNCTION: u32 = 1;
pub(crate) const SCOPE_CAPTURED: u32 = 2;

/// Outgoing reference found while tracing an object
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Edge {
    /// Block owned outright: a string or an internal table
    Block(Ptr),
    Value(Slot),
}

/// Object class tag stored in the first word of every object cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectClass {
    Plain,
    /// aux: elements, capacity, length
    Array,
    /// aux: code string, environment scope, flags
    Closure,
    /// aux: native function id
    Native,
    /// Plain object created by one of the error constructors
    Error,
    /// Binding record; aux: parent scope, flags
    Scope,
}

impl ObjectClass {
    fn tag(self) -> u32 {
        match self {
            ObjectClass::Plain => 1,
            ObjectClass::Array => 2,
            ObjectClass::Closure => 3,
            ObjectClass::Native => 4,
            ObjectClass::Error => 5,
            ObjectClass::Scope => 6,
        }
    }

    fn from_tag(tag: u32) -> ObjectClass {
        match tag {
            2 => ObjectClass::Array,
            3 => ObjectClass::Closure,
            4 => ObjectClass::Native,
            5 => ObjectClass::Error,
            6 => ObjectClass::Scope,
            _ => ObjectClass::Plain,
        }
    }

    pub(crate) fn is_callable(self) -> bool {
        matches!(self, ObjectClass::Closure | ObjectClass::Native)
    }
}

fn encode_flags(flags: PropertyFlags) -> u32 {
    let mut bits = 0;
    if flags.writable {
        bits |= FLAG_WRITABLE;
    }
    if flags.enumerable {
        bits |= FLAG_ENUMERABLE;
    }
    if flags.configurable {
        bits |= FLAG_CONFIGURABLE;
    }
    bits
}

fn decode_flags(bits: u32) -> PropertyFlags {
    PropertyFlags {
        writable: bits & FLAG_WRITABLE != 0,
        enumerable: bits & FLAG_ENUMERABLE != 0,
        configurable: bits & FLAG_CONFIGURABLE != 0,
    }
}

/// Parse a canonical array index ("0", "17", never "017" or "-1").
pub(crate) fn array_index(key: &str) -> Option<u32> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse::<u32>().ok().filter(|&i| i != u32::MAX)
}

impl Arena {
    // ===== Strings =====

    pub(crate) fn alloc_string(&mut self, text: &str) -> Result<Ptr, EngineError> {
        let ptr = self.allocate(4 + text.len())?;
        self.write_u32(ptr, text.len() as u32);
        self.write_slice(ptr + 4, text.as_bytes());
        Ok(ptr)
    }

    pub(crate) fn string_bytes(&self, ptr: Ptr) -> &[u8] {
        let len = self.read_u32(ptr) as usize;
        self.slice(ptr + 4, len)
    }

    pub(crate) fn read_string(&self, ptr: Ptr) -> String {
        String::from_utf8_lossy(self.string_bytes(ptr)).into_owned()
    }

    pub(crate) fn string_eq(&self, ptr: Ptr, text: &str) -> bool {
        self.string_bytes(ptr) == text.as_bytes()
    }

    pub(crate) fn strings_equal(&self, a: Ptr, b: Ptr) -> bool {
        a == b || self.string_bytes(a) == self.string_bytes(b)
    }

    // ===== Objects =====

    pub(crate) fn alloc_object(&mut self, class: ObjectClass) -> Result<Ptr, EngineError> {
        let obj = self.allocate(OBJECT_SIZE)?;
        self.write_u32(obj + OBJ_CLASS, class.tag());
        Ok(obj)
    }

    pub(crate) fn object_class(&self, obj: Ptr) -> ObjectClass {
        ObjectClass::from_tag(self.read_u32(obj + OBJ_CLASS))
    }

    pub(crate) fn aux(&self, obj: Ptr, index: usize) -> u32 {
        self.read_u32(obj + OBJ_AUX + 4 * index as u32)
    }

    pub(crate) fn set_aux(&mut self, obj: Ptr, index: usize, value: u32) {
        self.write_u32(obj + OBJ_AUX + 4 * index as u32, value);
    }

    fn find_entry(&self, obj: Ptr, key: &str) -> Option<Ptr> {
        let count = self.read_u32(obj + OBJ_COUNT);
        let props = self.read_u32(obj + OBJ_PROPS);
        (0..count)
            .map(|i| props + i * PROP_ENTRY)
            .find(|&entry| self.string_eq(self.read_u32(entry), key))
    }

    fn append_entry(&mut self, obj: Ptr, key: &str, slot: Slot, flags: u32) -> Result<(), EngineError> {
        let count = self.read_u32(obj + OBJ_COUNT);
        let capacity = self.read_u32(obj + OBJ_CAPACITY);
        if count == capacity {
            let new_capacity = (capacity * 2).max(4);
            let table = self.allocate((new_capacity * PROP_ENTRY) as usize)?;
            let old = self.read_u32(obj + OBJ_PROPS);
            if old != 0 {
                self.copy_within(old, table, (count * PROP_ENTRY) as usize);
                self.free(old);
            }
            self.write_u32(obj + OBJ_PROPS, table);
            self.write_u32(obj + OBJ_CAPACITY, new_capacity);
        }
        let key_ptr = self.alloc_string(key)?;
        let entry = self.read_u32(obj + OBJ_PROPS) + count * PROP_ENTRY;
        self.write_u32(entry, key_ptr);
        self.write_u32(entry + 4, flags);
        self.write_slot(entry + 8, slot);
        self.write_u32(obj + OBJ_COUNT, count + 1);
        Ok(())
    }

    /// Own property lookup, including array elements and `length`.
    pub(crate) fn get_own(&self, obj: Ptr, key: &str) -> Option<Slot> {
        if self.object_class(obj) == ObjectClass::Array {
            if let Some(index) = array_index(key) {
                return (index < self.array_len(obj)).then(|| self.array_get(obj, index));
            }
            if key == "length" {
                return Some(Slot::Number(self.array_len(obj) as f64));
            }
        }
        self.find_entry(obj, key).map(|entry| self.read_slot(entry + 8))
    }

    pub(crate) fn has_own(&self, obj: Ptr, key: &str) -> bool {
        self.get_own(obj, key).is_some()
    }

    pub(crate) fn own_flags(&self, obj: Ptr, key: &str) -> Option<PropertyFlags> {
        self.find_entry(obj, key)
            .map(|entry| decode_flags(self.read_u32(entry + 4)))
    }

    /// Assignment semantics: updates a writable property or appends a new one.
    ///
    /// Returns `false` when the existing property is read-only.
    pub(crate) fn put(&mut self, obj: Ptr, key: &str, slot: Slot) -> Result<bool, EngineError> {
        if self.object_class(obj) == ObjectClass::Array {
            if let Some(index) = array_index(key) {
                self.array_set(obj, index, slot)?;
                return Ok(true);
            }
            if key == "length" {
                if let Slot::Number(n) = slot {
                    if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 {
                        self.array_truncate(obj, n as u32)?;
                        return Ok(true);
                    }
                }
                return Ok(false);
            }
        }
        match self.find_entry(obj, key) {
            Some(entry) => {
                if self.read_u32(entry + 4) & FLAG_WRITABLE == 0 {
                    return Ok(false);
                }
                self.write_slot(entry + 8, slot);
                Ok(true)
            }
            None => {
                self.append_entry(obj, key, slot, encode_flags(PropertyFlags::all()))?;
                Ok(true)
            }
        }
    }

    /// Define or redefine an own data property with explicit attributes.
    pub(crate) fn define(
        &mut self,
        obj: Ptr,
        key: &str,
        slot: Slot,
        flags: PropertyFlags,
    ) -> Result<(), EngineError> {
        if self.object_class(obj) == ObjectClass::Array {
            if let Some(index) = array_index(key) {
                return self.array_set(obj, index, slot);
            }
        }
        match self.find_entry(obj, key) {
            Some(entry) => {
                self.write_u32(entry + 4, encode_flags(flags));
                self.write_slot(entry + 8, slot);
                Ok(())
            }
            None => self.append_entry(obj, key, slot, encode_flags(flags)),
        }
    }

    /// Own enumerable keys: array indices first, then properties in insertion order.
    pub(crate) fn own_keys(&self, obj: Ptr) -> Vec<String> {
        let mut keys = Vec::new();
        if self.object_class(obj) == ObjectClass::Array {
            keys.extend((0..self.array_len(obj)).map(|i| i.to_string()));
        }
        let count = self.read_u32(obj + OBJ_COUNT);
        let props = self.read_u32(obj + OBJ_PROPS);
        for i in 0..count {
            let entry = props + i * PROP_ENTRY;
            if self.read_u32(entry + 4) & FLAG_ENUMERABLE != 0 {
                keys.push(self.read_string(self.read_u32(entry)));
            }
        }
        keys
    }

    /// Release an object cell and its tables. Only used for scopes that no
    /// closure captured.
    pub(crate) fn free_object(&mut self, obj: Ptr) {
        let props = self.read_u32(obj + OBJ_PROPS);
        if props != 0 {
            let count = self.read_u32(obj + OBJ_COUNT);
            for i in 0..count {
                let key = self.read_u32(props + i * PROP_ENTRY);
                self.free(key);
            }
            self.free(props);
        }
        self.free(obj);
    }

    /// Blocks and values an object cell refers to, for the collector.
    pub(crate) fn object_edges(&self, obj: Ptr, edges: &mut Vec<Edge>) {
        let props = self.read_u32(obj + OBJ_PROPS);
        if self.is_allocated(props) {
            edges.push(Edge::Block(props));
            let count = self
                .read_u32(obj + OBJ_COUNT)
                .min(self.capacity(props) as u32 / PROP_ENTRY);
            for i in 0..count {
                let entry = props + i * PROP_ENTRY;
                edges.push(Edge::Block(self.read_u32(entry)));
                edges.push(Edge::Value(self.read_slot(entry + 8)));
            }
        }
        match self.object_class(obj) {
            ObjectClass::Array => {
                let elements = self.aux(obj, ARRAY_ELEMENTS);
                if self.is_allocated(elements) {
                    edges.push(Edge::Block(elements));
                    let len = self
                        .array_len(obj)
                        .min(self.capacity(elements) as u32 / SLOT_SIZE);
                    for i in 0..len {
                        edges.push(Edge::Value(self.read_slot(elements + i * SLOT_SIZE)));
                    }
                }
            }
            ObjectClass::Closure => {
                edges.push(Edge::Block(self.aux(obj, CLOSURE_CODE)));
                edges.push(Edge::Value(Slot::Obj(self.aux(obj, CLOSURE_ENV))));
            }
            ObjectClass::Scope => {
                let parent = self.aux(obj, SCOPE_PARENT);
                if parent != 0 {
                    edges.push(Edge::Value(Slot::Obj(parent)));
                }
            }
            ObjectClass::Plain | ObjectClass::Native | ObjectClass::Error => {}
        }
    }

    // ===== Arrays =====

    pub(crate) fn array_len(&self, obj: Ptr) -> u32 {
        self.aux(obj, ARRAY_LENGTH)
    }

    pub(crate) fn array_get(&self, obj: Ptr, index: u32) -> Slot {
        if index >= self.array_len(obj) {
            return Slot::Undefined;
        }
        self.read_slot(self.aux(obj, ARRAY_ELEMENTS) + index * SLOT_SIZE)
    }

    fn array_reserve(&mut self, obj: Ptr, needed: u32) -> Result<(), EngineError> {
        let capacity = self.aux(obj, ARRAY_CAPACITY);
        if needed <= capacity {
            return Ok(());
        }
        let new_capacity = needed.max(capacity * 2).max(4);
        let elements = self.allocate(new_capacity as usize * SLOT_SIZE as usize)?;
        let old = self.aux(obj, ARRAY_ELEMENTS);
        if old != 0 {
            let len = self.array_len(obj);
            self.copy_within(old, elements, (len * SLOT_SIZE) as usize);
            self.free(old);
        }
        self.set_aux(obj, ARRAY_ELEMENTS, elements);
        self.set_aux(obj, ARRAY_CAPACITY, new_capacity);
        Ok(())
    }

    pub(crate) fn array_set(&mut self, obj: Ptr, index: u32, slot: Slot) -> Result<(), EngineError> {
        let needed = index.checked_add(1).ok_or(EngineError::OutOfMemory {
            requested: usize::MAX,
        })?;
        self.array_reserve(obj, needed)?;
        let elements = self.aux(obj, ARRAY_ELEMENTS);
        let len = self.array_len(obj);
        if needed > len {
            for i in len..index {
                self.write_slot(elements + i * SLOT_SIZE, Slot::Undefined);
            }
            self.set_aux(obj, ARRAY_LENGTH, needed);
        }
        self.write_slot(elements + index * SLOT_SIZE, slot);
        Ok(())
    }

    pub(crate) fn array_push(&mut self, obj: Ptr, slot: Slot) -> Result<u32, EngineError> {
        let len = self.array_len(obj);
        self.array_set(obj, len, slot)?;
        Ok(len + 1)
    }

    fn array_truncate(&mut self, obj: Ptr, len: u32) -> Result<(), EngineError> {
        let current = self.array_len(obj);
        if len > current {
            self.array_reserve(obj, len)?;
            let elements = self.aux(obj, ARRAY_ELEMENTS);
            for i in current..len {
                self.write_slot(elements + i * SLOT_SIZE, Slot::Undefined);
            }
        }
        self.set_aux(obj, ARRAY_LENGTH, len);
        Ok(())
    }
}
