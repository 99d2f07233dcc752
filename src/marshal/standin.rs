//! Host-side stand-ins for engine objects, arrays and functions
//!
//! A [`StandIn`] retains exactly one engine handle and forwards every access
//! to the engine under its VM's exclusive access. Cloning a stand-in shares
//! the handle; the handle is released when the last clone is dropped. A drop
//! that happens while the VM is busy is queued and handled by the VM's next
//! operation.
//!
//! Stand-ins are not interned: two reads of the same engine value produce two
//! stand-ins that compare unequal, while both observe the same live state.

use super::key::{PropertyDescriptor, PropertyKey};
use super::{free_all, from_engine, to_engine, to_engine_all, Value};
use crate::engine::{HandleId, PropertyFlags};
use crate::error::{VmError, VmResult};
use crate::vm::VmShared;
use std::fmt;
use std::sync::{Arc, Weak};

/// Which kind of engine value a stand-in denotes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandInKind {
    Object,
    Array,
    Function,
}

struct Inner {
    handle: HandleId,
    vm_id: u64,
    kind: StandInKind,
    vm: Weak<VmShared>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(vm) = self.vm.upgrade() {
            vm.release(self.handle);
        }
    }
}

/// Host-visible proxy over an engine-owned composite value
#[derive(Clone)]
pub struct StandIn {
    inner: Arc<Inner>,
}

impl StandIn {
    pub(crate) fn new(handle: HandleId, kind: StandInKind, vm: &Arc<VmShared>) -> Self {
        Self {
            inner: Arc::new(Inner {
                handle,
                vm_id: vm.id,
                kind,
                vm: Arc::downgrade(vm),
            }),
        }
    }

    pub fn kind(&self) -> StandInKind {
        self.inner.kind
    }

    pub fn is_function(&self) -> bool {
        self.inner.kind == StandInKind::Function
    }

    pub fn is_array(&self) -> bool {
        self.inner.kind == StandInKind::Array
    }

    /// Id of the VM this stand-in belongs to
    pub fn vm_id(&self) -> u64 {
        self.inner.vm_id
    }

    pub(crate) fn handle(&self) -> HandleId {
        self.inner.handle
    }

    fn vm(&self) -> VmResult<Arc<VmShared>> {
        self.inner.vm.upgrade().ok_or(VmError::AlreadyDisposed)
    }

    /// Read a property. Symbol keys are never forwarded and read as `Undefined`.
    pub fn get(&self, key: impl Into<PropertyKey>) -> VmResult<Value> {
        let name = match key.into().engine_name() {
            Some(name) => name,
            None => return Ok(Value::Undefined),
        };
        let vm = self.vm()?;
        let guard = vm.begin()?;
        guard.with_runtime(|runtime| {
            let engine = runtime.engine_mut();
            let value = engine.get_property(self.handle(), &name)?;
            from_engine(engine, &vm, value)
        })
    }

    pub fn set(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> VmResult<()> {
        let key = key.into();
        let name = key
            .engine_name()
            .ok_or_else(|| VmError::UnsupportedKeyType(key.to_string()))?;
        let value = value.into();
        let vm = self.vm()?;
        let guard = vm.begin()?;
        guard.with_runtime(|runtime| {
            let engine = runtime.engine_mut();
            let handle = to_engine(engine, vm.id, &value)?;
            let result = engine.set_property(self.handle(), &name, handle);
            engine.free(handle)?;
            Ok(result?)
        })
    }

    /// Whether the property exists, including properties holding `undefined`.
    pub fn has(&self, key: impl Into<PropertyKey>) -> VmResult<bool> {
        let name = match key.into().engine_name() {
            Some(name) => name,
            None => return Ok(false),
        };
        let vm = self.vm()?;
        let guard = vm.begin()?;
        guard.with_runtime(|runtime| Ok(runtime.engine().has_property(self.handle(), &name)?))
    }

    /// Own enumerable string keys; array indices come first.
    pub fn own_keys(&self) -> VmResult<Vec<String>> {
        let vm = self.vm()?;
        let guard = vm.begin()?;
        guard.with_runtime(|runtime| Ok(runtime.engine().own_keys(self.handle())?))
    }

    /// Define a data property. Accessor descriptors are rejected.
    pub fn define_property(
        &self,
        key: impl Into<PropertyKey>,
        descriptor: PropertyDescriptor,
    ) -> VmResult<()> {
        if descriptor.is_accessor() {
            return Err(VmError::UnsupportedDescriptor);
        }
        let key = key.into();
        let name = key
            .engine_name()
            .ok_or_else(|| VmError::UnsupportedKeyType(key.to_string()))?;
        let flags = PropertyFlags {
            writable: descriptor.writable,
            enumerable: descriptor.enumerable,
            configurable: descriptor.configurable,
        };
        let value = descriptor.value.unwrap_or_default();
        let vm = self.vm()?;
        let guard = vm.begin()?;
        guard.with_runtime(|runtime| {
            let engine = runtime.engine_mut();
            let handle = to_engine(engine, vm.id, &value)?;
            let result = engine.define_property(self.handle(), &name, handle, flags);
            engine.free(handle)?;
            Ok(result?)
        })
    }

    /// Call the function with an explicit receiver.
    ///
    /// Metered with the VM's default cycle limit.
    pub fn apply(&self, this: &Value, args: &[Value]) -> VmResult<Value> {
        let vm = self.vm()?;
        let guard = vm.begin()?;
        guard.with_runtime(|runtime| {
            let engine = runtime.engine_mut();
            let this = to_engine(engine, vm.id, this)?;
            let args = match to_engine_all(engine, vm.id, args) {
                Ok(args) => args,
                Err(err) => {
                    engine.free(this)?;
                    return Err(err);
                }
            };
            let result = runtime.call(self.handle(), this, &args, None);

            let engine = runtime.engine_mut();
            engine.free(this)?;
            free_all(engine, &args)?;
            let result = result?;
            from_engine(engine, &vm, result.value)
        })
    }

    /// `apply(Undefined, args)`
    pub fn call(&self, args: &[Value]) -> VmResult<Value> {
        self.apply(&Value::Undefined, args)
    }
}

impl PartialEq for StandIn {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for StandIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandIn")
            .field("kind", &self.inner.kind)
            .field("handle", &self.inner.handle)
            .field("vm", &self.inner.vm_id)
            .finish()
    }
}
