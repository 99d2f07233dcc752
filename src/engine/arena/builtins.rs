//! Built-in global bindings and native functions
//!
//! Natives are function objects of class [`ObjectClass::Native`] whose only
//! payload is a [`Native`] id, so they survive a memory copy like any other
//! object. `Object.keys`, `Array.isArray` and the shared `push` intrinsic
//! are wired up here as well.

use super::handles::CtxField;
use super::heap::Ptr;
use super::interp::Exec;
use super::object::{ObjectClass, NATIVE_ID};
use super::value::Slot;
use super::ArenaEngine;
use crate::engine::{EngineError, PropertyFlags};

/// Native function ids stored in native function objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Native {
    Object,
    ObjectKeys,
    Array,
    ArrayIsArray,
    ArrayPush,
    Error,
    TypeError,
    RangeError,
    String,
    Number,
    Boolean,
}

const ALL_NATIVES: [Native; 11] = [
    Native::Object,
    Native::ObjectKeys,
    Native::Array,
    Native::ArrayIsArray,
    Native::ArrayPush,
    Native::Error,
    Native::TypeError,
    Native::RangeError,
    Native::String,
    Native::Number,
    Native::Boolean,
];

impl Native {
    pub(crate) fn id(self) -> u32 {
        ALL_NATIVES
            .iter()
            .position(|&n| n == self)
            .map_or(0, |i| i as u32 + 1)
    }

    pub(crate) fn from_id(id: u32) -> Option<Native> {
        ALL_NATIVES.get((id as usize).checked_sub(1)?).copied()
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Native::Object => "Object",
            Native::ObjectKeys => "keys",
            Native::Array => "Array",
            Native::ArrayIsArray => "isArray",
            Native::ArrayPush => "push",
            Native::Error => "Error",
            Native::TypeError => "TypeError",
            Native::RangeError => "RangeError",
            Native::String => "String",
            Native::Number => "Number",
            Native::Boolean => "Boolean",
        }
    }
}

/// Attributes of built-in bindings: writable, not enumerable
const BUILTIN: PropertyFlags = PropertyFlags {
    writable: true,
    enumerable: false,
    configurable: true,
};

const FROZEN: PropertyFlags = PropertyFlags {
    writable: false,
    enumerable: false,
    configurable: false,
};

impl ArenaEngine {
    fn alloc_native(&mut self, native: Native) -> Result<Ptr, EngineError> {
        let obj = self.arena.alloc_object(ObjectClass::Native)?;
        self.arena.set_aux(obj, NATIVE_ID, native.id());
        Ok(obj)
    }

    /// Populate the global object.
    pub(crate) fn install_globals(&mut self, global: Ptr) -> Result<(), EngineError> {
        self.arena.define(global, "globalThis", Slot::Obj(global), BUILTIN)?;
        self.arena.define(global, "undefined", Slot::Undefined, FROZEN)?;
        self.arena.define(global, "NaN", Slot::Number(f64::NAN), FROZEN)?;
        self.arena
            .define(global, "Infinity", Slot::Number(f64::INFINITY), FROZEN)?;

        for native in [
            Native::Object,
            Native::Array,
            Native::Error,
            Native::TypeError,
            Native::RangeError,
            Native::String,
            Native::Number,
            Native::Boolean,
        ] {
            let ctor = self.alloc_native(native)?;
            self.arena.define(global, native.name(), Slot::Obj(ctor), BUILTIN)?;
            let statics: &[Native] = match native {
                Native::Object => &[Native::ObjectKeys],
                Native::Array => &[Native::ArrayIsArray],
                _ => &[],
            };
            for &method in statics {
                let func = self.alloc_native(method)?;
                self.arena.define(ctor, method.name(), Slot::Obj(func), BUILTIN)?;
            }
        }

        let push = self.alloc_native(Native::ArrayPush)?;
        self.arena.set_ctx(self.context, CtxField::ArrayPush, push);
        Ok(())
    }

    pub(crate) fn call_native(&mut self, native: Native, this: Slot, args: &[Slot]) -> Exec<Slot> {
        let arg = |i: usize| args.get(i).copied().unwrap_or(Slot::Undefined);
        match native {
            Native::Object => match arg(0) {
                value @ Slot::Obj(_) => Ok(value),
                _ => Ok(Slot::Obj(self.arena.alloc_object(ObjectClass::Plain)?)),
            },
            Native::ObjectKeys => {
                let obj = match arg(0) {
                    Slot::Obj(obj) => obj,
                    _ => {
                        return Err(self.throw_error("TypeError", "Object.keys called on non-object"));
                    }
                };
                let keys = self.arena.own_keys(obj);
                let array = self.arena.alloc_object(ObjectClass::Array)?;
                for key in keys {
                    let key = Slot::Str(self.arena.alloc_string(&key)?);
                    self.arena.array_push(array, key)?;
                }
                Ok(Slot::Obj(array))
            }
            Native::Array => {
                let array = self.arena.alloc_object(ObjectClass::Array)?;
                for &value in args {
                    self.arena.array_push(array, value)?;
                }
                Ok(Slot::Obj(array))
            }
            Native::ArrayIsArray => Ok(Slot::Bool(matches!(
                arg(0),
                Slot::Obj(obj) if self.arena.object_class(obj) == ObjectClass::Array
            ))),
            Native::ArrayPush => match this {
                Slot::Obj(obj) if self.arena.object_class(obj) == ObjectClass::Array => {
                    let mut len = self.arena.array_len(obj);
                    for &value in args {
                        len = self.arena.array_push(obj, value)?;
                    }
                    Ok(Slot::Number(len as f64))
                }
                _ => Err(self.throw_error("TypeError", "push called on non-array")),
            },
            Native::Error | Native::TypeError | Native::RangeError => {
                let message = match arg(0) {
                    Slot::Undefined => String::new(),
                    value => self.arena.to_display(value),
                };
                Ok(self.make_error(native.name(), &message)?)
            }
            Native::String => {
                let text = match args.first() {
                    Some(&value) => self.arena.to_display(value),
                    None => String::new(),
                };
                Ok(Slot::Str(self.arena.alloc_string(&text)?))
            }
            Native::Number => Ok(Slot::Number(
                args.first().map_or(0.0, |&value| self.arena.to_number(value)),
            )),
            Native::Boolean => Ok(Slot::Bool(self.arena.to_boolean(arg(0)))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_ids_round_trip() {
        for native in ALL_NATIVES {
            assert_ne!(native.id(), 0);
            assert_eq!(Native::from_id(native.id()), Some(native));
        }
        assert_eq!(Native::from_id(0), None);
        assert_eq!(Native::from_id(99), None);
    }
}
