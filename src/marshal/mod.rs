//! Value marshaling between the host and the engine
//!
//! Host values ([`Value`]) convert to engine values by copy: primitives
//! directly, lists index by index into arrays, maps key by key into objects.
//! In the other direction primitives are copied while objects, arrays and
//! functions become [`StandIn`]s over the original engine value.
//!
//! # Handle ownership
//!
//! [`to_engine`] returns a handle the caller owns and must free.
//! [`from_engine`] consumes the handle it is given: primitives free it right
//! away, composite values hand it to the new stand-in.
//!
//! A stand-in passed back into the engine it came from is re-duplicated
//! rather than converted, so identity survives the round trip. Stand-ins from
//! another VM are rejected.

mod key;
mod standin;

pub use key::{PropertyDescriptor, PropertyKey, Symbol};
pub use standin::{StandIn, StandInKind};

use crate::engine::{Engine, HandleId, ValueKind};
use crate::error::{VmError, VmResult};
use crate::vm::VmShared;
use log::trace;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Host callback. Engines cannot call back into the host, so these never
/// cross the boundary; they exist so hosts can keep them in [`Value`] trees.
#[derive(Clone)]
pub struct HostFunction(Arc<dyn Fn(&[Value]) -> VmResult<Value> + Send + Sync>);

impl HostFunction {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> VmResult<Value> {
        (self.0)(args)
    }
}

impl PartialEq for HostFunction {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostFunction")
    }
}

/// A host-side value
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent value; engine `undefined`
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Converted to an engine array
    List(Vec<Value>),
    /// Converted to a plain engine object
    Map(FxHashMap<String, Value>),
    /// Engine-owned object, array or function
    StandIn(StandIn),
    /// Not convertible
    Function(HostFunction),
    /// Not convertible
    Symbol(Symbol),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_stand_in(&self) -> Option<&StandIn> {
        match self {
            Value::StandIn(stand_in) => Some(stand_in),
            _ => None,
        }
    }

    /// Name of the value's type, as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::StandIn(_) => "stand-in",
            Value::Function(_) => "function",
            Value::Symbol(_) => "symbol",
        }
    }
}

/// Structural equality for host data; stand-ins compare by identity and
/// `NaN` is unequal to itself.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::StandIn(a), Value::StandIn(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            _ => false,
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Undefined
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<FxHashMap<String, Value>> for Value {
    fn from(map: FxHashMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<StandIn> for Value {
    fn from(stand_in: StandIn) -> Self {
        Value::StandIn(stand_in)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Convert a host value into a new engine handle owned by the caller.
pub(crate) fn to_engine(engine: &mut dyn Engine, vm_id: u64, value: &Value) -> VmResult<HandleId> {
    let handle = match value {
        Value::Undefined => engine.new_undefined()?,
        Value::Null => engine.new_null()?,
        Value::Bool(b) => engine.new_bool(*b)?,
        Value::Number(n) => engine.new_number(*n)?,
        Value::String(s) => engine.new_string(s)?,
        Value::List(items) => {
            let array = engine.new_array()?;
            for (index, item) in items.iter().enumerate() {
                if let Err(err) = store(engine, vm_id, array, &index.to_string(), item) {
                    engine.free(array)?;
                    return Err(err);
                }
            }
            array
        }
        Value::Map(entries) => {
            let object = engine.new_object()?;
            for (key, item) in entries {
                if let Err(err) = store(engine, vm_id, object, key, item) {
                    engine.free(object)?;
                    return Err(err);
                }
            }
            object
        }
        Value::StandIn(stand_in) if stand_in.vm_id() == vm_id => engine.dup(stand_in.handle())?,
        Value::StandIn(stand_in) => {
            return Err(VmError::UnsupportedArgumentType(format!(
                "stand-in from VM {}",
                stand_in.vm_id()
            )));
        }
        Value::Function(_) | Value::Symbol(_) => {
            return Err(VmError::UnsupportedArgumentType(value.type_name().to_string()));
        }
    };
    Ok(handle)
}

fn store(
    engine: &mut dyn Engine,
    vm_id: u64,
    target: HandleId,
    key: &str,
    item: &Value,
) -> VmResult<()> {
    let handle = to_engine(engine, vm_id, item)?;
    let result = engine.set_property(target, key, handle);
    engine.free(handle)?;
    Ok(result?)
}

/// Convert every value; on failure the handles made so far are freed.
pub(crate) fn to_engine_all(
    engine: &mut dyn Engine,
    vm_id: u64,
    values: &[Value],
) -> VmResult<Vec<HandleId>> {
    let mut handles = Vec::with_capacity(values.len());
    for value in values {
        match to_engine(engine, vm_id, value) {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                free_all(engine, &handles)?;
                return Err(err);
            }
        }
    }
    Ok(handles)
}

pub(crate) fn free_all(engine: &mut dyn Engine, handles: &[HandleId]) -> VmResult<()> {
    for &handle in handles {
        engine.free(handle)?;
    }
    Ok(())
}

/// Convert an engine value, taking ownership of `handle`.
pub(crate) fn from_engine(
    engine: &mut dyn Engine,
    vm: &Arc<VmShared>,
    handle: HandleId,
) -> VmResult<Value> {
    let kind = match engine.type_of(handle) {
        Ok(kind) => kind,
        Err(err) => {
            engine.free(handle)?;
            return Err(err.into());
        }
    };
    let primitive = match kind {
        ValueKind::Undefined => Ok(Value::Undefined),
        ValueKind::Boolean => engine.to_bool(handle).map(Value::Bool),
        ValueKind::Number => engine.to_number(handle).map(Value::Number),
        ValueKind::String => engine.to_string(handle).map(Value::String),
        ValueKind::Function => {
            return Ok(Value::StandIn(StandIn::new(handle, StandInKind::Function, vm)));
        }
        ValueKind::Object => {
            // typeof null is "object"; tell it apart by identity with the engine's null
            let null = match engine.new_null() {
                Ok(null) => null,
                Err(err) => {
                    engine.free(handle)?;
                    return Err(err.into());
                }
            };
            let is_null = engine.strict_equals(handle, null);
            let freed = engine.free(null);
            let is_null = match (is_null, freed) {
                (Ok(is_null), Ok(())) => is_null,
                (Err(err), _) | (_, Err(err)) => {
                    engine.free(handle)?;
                    return Err(err.into());
                }
            };
            if is_null {
                Ok(Value::Null)
            } else {
                let kind = match engine.is_array(handle) {
                    Ok(true) => StandInKind::Array,
                    Ok(false) => StandInKind::Object,
                    Err(err) => {
                        engine.free(handle)?;
                        return Err(err.into());
                    }
                };
                trace!("stand-in created: handle={} kind={:?}", handle, kind);
                return Ok(Value::StandIn(StandIn::new(handle, kind, vm)));
            }
        }
    };
    engine.free(handle)?;
    Ok(primitive?)
}
