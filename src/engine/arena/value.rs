//! Value slots stored in arena memory
//!
//! A [`Slot`] is the engine's tagged value. In memory it occupies
//! [`SLOT_SIZE`] bytes: a one-byte tag followed, at offset 8, by either an
//! `f64`, a boolean byte or a `u32` pointer. An all-zero slot decodes as
//! `undefined`, so freshly allocated memory is already initialized.

use super::heap::{Arena, Ptr};

pub(crate) const SLOT_SIZE: u32 = 16;

const TAG_UNDEFINED: u8 = 0;
const TAG_NULL: u8 = 1;
const TAG_BOOL: u8 = 2;
const TAG_NUMBER: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_OBJECT: u8 = 5;

/// Engine value
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) enum Slot {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    /// Pointer to a string cell
    Str(Ptr),
    /// Pointer to an object cell
    Obj(Ptr),
}

impl Slot {
    pub(crate) fn as_object(&self) -> Option<Ptr> {
        match self {
            Slot::Obj(ptr) => Some(*ptr),
            _ => None,
        }
    }

    pub(crate) fn is_nullish(&self) -> bool {
        matches!(self, Slot::Undefined | Slot::Null)
    }
}

impl Arena {
    /// Decode the slot stored at `at`
    pub(crate) fn read_slot(&self, at: Ptr) -> Slot {
        let payload = at + 8;
        match self.read_u8(at) {
            TAG_NULL => Slot::Null,
            TAG_BOOL => Slot::Bool(self.read_u8(payload) != 0),
            TAG_NUMBER => Slot::Number(self.read_f64(payload)),
            TAG_STRING => Slot::Str(self.read_u32(payload)),
            TAG_OBJECT => Slot::Obj(self.read_u32(payload)),
            _ => Slot::Undefined,
        }
    }

    /// Encode `slot` at `at`
    pub(crate) fn write_slot(&mut self, at: Ptr, slot: Slot) {
        let payload = at + 8;
        self.write_slice(at, &[0u8; SLOT_SIZE as usize]);
        match slot {
            Slot::Undefined => self.write_u8(at, TAG_UNDEFINED),
            Slot::Null => self.write_u8(at, TAG_NULL),
            Slot::Bool(b) => {
                self.write_u8(at, TAG_BOOL);
                self.write_u8(payload, b as u8);
            }
            Slot::Number(n) => {
                self.write_u8(at, TAG_NUMBER);
                self.write_f64(payload, n);
            }
            Slot::Str(ptr) => {
                self.write_u8(at, TAG_STRING);
                self.write_u32(payload, ptr);
            }
            Slot::Obj(ptr) => {
                self.write_u8(at, TAG_OBJECT);
                self.write_u32(payload, ptr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_slot_is_undefined() {
        let mut arena = Arena::new(4096);
        arena.format();
        let at = arena.allocate(SLOT_SIZE as usize).unwrap();
        assert_eq!(arena.read_slot(at), Slot::Undefined);
    }

    #[test]
    fn test_slot_overwrite_clears_payload() {
        let mut arena = Arena::new(4096);
        arena.format();
        let at = arena.allocate(SLOT_SIZE as usize).unwrap();
        arena.write_slot(at, Slot::Number(-0.5));
        assert_eq!(arena.read_slot(at), Slot::Number(-0.5));
        arena.write_slot(at, Slot::Bool(true));
        assert_eq!(arena.read_slot(at), Slot::Bool(true));
        arena.write_slot(at, Slot::Obj(0x200));
        assert_eq!(arena.read_slot(at), Slot::Obj(0x200));
    }
}
