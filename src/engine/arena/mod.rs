//! Reference engine: a small script interpreter living entirely in a byte arena
//!
//! Every piece of guest state (objects, strings, scopes, closures, the handle
//! table and the engine's own runtime/context records) is stored inside one
//! `Vec<u8>`. Copying that vector is therefore a complete copy of the guest,
//! which is exactly the property the fork machinery relies on.
//!
//! # Organization
//!
//! - `heap`: size-class allocator over the arena
//! - `gc`: mark-and-sweep collection of unreachable blocks
//! - `value`, `object`, `coerce`: value slots, objects, arrays, conversions
//! - `handles`: runtime/context records and the value handle table
//! - `syntax`: lexer, AST and parser for the script dialect
//! - `interp`: tree-walking evaluation
//! - `builtins`: global bindings and native functions
//!
//! Host-side state besides the arena is limited to a cache of parsed function
//! bodies, rebuilt lazily from source text kept in the arena, and the
//! collector's trigger limits, recomputed on attach.

mod builtins;
mod coerce;
mod gc;
mod handles;
mod heap;
mod interp;
mod object;
pub mod syntax;
mod value;

use self::handles::CtxField;
use self::heap::{Arena, Ptr};
use self::object::ObjectClass;
use self::syntax::ast::FunctionDef;
use self::syntax::Parser;
use self::value::Slot;
use super::{
    Engine, EngineError, EngineFactory, EngineHandles, HandleId, InterruptHandler, PropertyFlags,
    ValueKind,
};
use crate::constants::{DEFAULT_MEMORY_SIZE, MAX_MEMORY_SIZE, MIN_MEMORY_SIZE};
use log::trace;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Script engine over a fixed-size byte arena
pub struct ArenaEngine {
    pub(crate) arena: Arena,
    pub(crate) runtime: Ptr,
    pub(crate) context: Ptr,
    pub(crate) interrupt: Option<InterruptHandler>,
    pub(crate) ticks: u32,
    pub(crate) depth: usize,
    /// Evaluator recursion across statements, expressions and calls
    pub(crate) nesting: usize,
    /// Value of the last top-level expression statement
    pub(crate) completion: Slot,
    /// Parsed closures keyed by the arena pointer of their source text
    pub(crate) functions: FxHashMap<Ptr, Arc<FunctionDef>>,
    /// Values the interpreter holds across nested evaluation
    pub(crate) roots: Vec<Slot>,
    /// Live bytes that trigger the next collection
    pub(crate) gc_threshold: u32,
    /// Bump pointer position that triggers the next collection
    pub(crate) gc_top_limit: u32,
}

impl ArenaEngine {
    pub fn new(memory_size: usize) -> Self {
        Self {
            arena: Arena::new(memory_size.clamp(MIN_MEMORY_SIZE, MAX_MEMORY_SIZE)),
            runtime: 0,
            context: 0,
            interrupt: None,
            ticks: 0,
            depth: 0,
            nesting: 0,
            completion: Slot::Undefined,
            functions: FxHashMap::default(),
            roots: Vec::new(),
            gc_threshold: u32::MAX,
            gc_top_limit: u32::MAX,
        }
    }

    /// Number of handles currently held by the host.
    pub fn live_handles(&self) -> usize {
        if self.context == 0 {
            return 0;
        }
        self.arena.live_handles(self.context)
    }

    fn ensure_attached(&self) -> Result<(), EngineError> {
        if self.context == 0 {
            return Err(EngineError::Uninitialized);
        }
        Ok(())
    }

    fn slot(&self, handle: HandleId) -> Result<Slot, EngineError> {
        self.ensure_attached()?;
        self.arena.handle_slot(self.context, handle)
    }

    fn object(&self, handle: HandleId) -> Result<Ptr, EngineError> {
        self.slot(handle)?
            .as_object()
            .ok_or(EngineError::InvalidHandle(handle))
    }

    fn handle(&mut self, slot: Slot) -> Result<HandleId, EngineError> {
        self.ensure_attached()?;
        self.arena.new_handle(self.context, slot)
    }

    /// Run `f` as a host entry point and hand its result out as a new handle.
    fn enter<F>(&mut self, f: F) -> Result<HandleId, EngineError>
    where
        F: FnOnce(&mut Self) -> interp::Exec<Slot>,
    {
        self.ensure_attached()?;
        let outcome = self.begin_entry().and_then(|()| f(self));
        self.depth = 0;
        self.nesting = 0;
        self.roots.clear();
        match outcome {
            Ok(slot) => self.handle(slot),
            Err(throw) => Err(self.throw_to_error(throw)),
        }
    }
}

impl Default for ArenaEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_SIZE)
    }
}

impl Engine for ArenaEngine {
    fn initialize(&mut self) -> Result<EngineHandles, EngineError> {
        self.arena.format();
        self.functions.clear();
        let (runtime, context) = self.arena.create_records()?;
        self.runtime = runtime;
        self.context = context;

        let global = self.arena.alloc_object(ObjectClass::Plain)?;
        let script = self.arena.alloc_object(ObjectClass::Scope)?;
        // the script scope chains to the global object
        self.arena.set_aux(script, object::SCOPE_PARENT, global);
        self.arena.set_ctx(context, CtxField::Global, global);
        self.arena.set_ctx(context, CtxField::ScriptScope, script);
        self.bind_script_this(script, global)?;
        self.install_globals(global)?;
        self.tune_collector();

        trace!(
            "arena engine initialized: runtime={:#x} context={:#x}",
            runtime,
            context
        );
        Ok(EngineHandles { runtime, context })
    }

    fn attach(&mut self, handles: EngineHandles) -> Result<(), EngineError> {
        if !self.arena.records_valid(handles.runtime, handles.context) {
            return Err(EngineError::InvalidRecords {
                runtime: handles.runtime,
                context: handles.context,
            });
        }
        self.runtime = handles.runtime;
        self.context = handles.context;
        self.tune_collector();
        Ok(())
    }

    fn memory(&self) -> &[u8] {
        self.arena.bytes()
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.arena.bytes_mut()
    }

    fn memory_restore(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        if self.arena.len() != bytes.len() {
            return Err(EngineError::SizeMismatch {
                expected: self.arena.len(),
                actual: bytes.len(),
            });
        }
        self.arena.bytes_mut().copy_from_slice(bytes);
        self.functions.clear();
        self.roots.clear();
        self.runtime = 0;
        self.context = 0;
        self.completion = Slot::Undefined;
        Ok(())
    }

    fn allocate(&mut self, size: usize) -> Result<u32, EngineError> {
        self.arena.allocate_pinned(size)
    }

    fn set_interrupt_handler(&mut self, handler: Option<InterruptHandler>) {
        self.interrupt = handler;
    }

    fn evaluate(&mut self, source: &str) -> Result<HandleId, EngineError> {
        self.ensure_attached()?;
        let program = Parser::new(source)
            .and_then(|mut parser| parser.parse_program())
            .map_err(|err| EngineError::Exception(err.to_string()))?;
        self.completion = Slot::Undefined;
        self.enter(|engine| {
            engine.run_program(&program.body)?;
            Ok(engine.completion)
        })
    }

    fn invoke(&mut self, name: &str, args: &[HandleId]) -> Result<HandleId, EngineError> {
        self.ensure_attached()?;
        let args = args
            .iter()
            .map(|&handle| self.slot(handle))
            .collect::<Result<Vec<_>, _>>()?;
        let scope = self.script_scope();
        let func = self.lookup(scope, name).unwrap_or(Slot::Undefined);
        let global = Slot::Obj(self.global_object());
        self.enter(|engine| engine.call_function(func, global, &args))
    }

    fn call(
        &mut self,
        func: HandleId,
        this: HandleId,
        args: &[HandleId],
    ) -> Result<HandleId, EngineError> {
        let func = self.slot(func)?;
        let this = self.slot(this)?;
        let args = args
            .iter()
            .map(|&handle| self.slot(handle))
            .collect::<Result<Vec<_>, _>>()?;
        self.enter(|engine| engine.call_function(func, this, &args))
    }

    fn global(&mut self) -> Result<HandleId, EngineError> {
        self.ensure_attached()?;
        let global = self.global_object();
        self.handle(Slot::Obj(global))
    }

    fn type_of(&self, value: HandleId) -> Result<ValueKind, EngineError> {
        Ok(match self.arena.type_name(self.slot(value)?) {
            "undefined" => ValueKind::Undefined,
            "boolean" => ValueKind::Boolean,
            "number" => ValueKind::Number,
            "string" => ValueKind::String,
            "function" => ValueKind::Function,
            _ => ValueKind::Object,
        })
    }

    fn is_array(&self, value: HandleId) -> Result<bool, EngineError> {
        Ok(matches!(
            self.slot(value)?,
            Slot::Obj(obj) if self.arena.object_class(obj) == ObjectClass::Array
        ))
    }

    fn strict_equals(&self, a: HandleId, b: HandleId) -> Result<bool, EngineError> {
        Ok(self.arena.strict_equal(self.slot(a)?, self.slot(b)?))
    }

    fn to_bool(&self, value: HandleId) -> Result<bool, EngineError> {
        Ok(self.arena.to_boolean(self.slot(value)?))
    }

    fn to_number(&self, value: HandleId) -> Result<f64, EngineError> {
        Ok(self.arena.to_number(self.slot(value)?))
    }

    fn to_string(&self, value: HandleId) -> Result<String, EngineError> {
        Ok(self.arena.to_display(self.slot(value)?))
    }

    fn new_undefined(&mut self) -> Result<HandleId, EngineError> {
        self.handle(Slot::Undefined)
    }

    fn new_null(&mut self) -> Result<HandleId, EngineError> {
        self.handle(Slot::Null)
    }

    fn new_bool(&mut self, value: bool) -> Result<HandleId, EngineError> {
        self.handle(Slot::Bool(value))
    }

    fn new_number(&mut self, value: f64) -> Result<HandleId, EngineError> {
        self.handle(Slot::Number(value))
    }

    fn new_string(&mut self, value: &str) -> Result<HandleId, EngineError> {
        self.ensure_attached()?;
        let ptr = self.arena.alloc_string(value)?;
        self.handle(Slot::Str(ptr))
    }

    fn new_object(&mut self) -> Result<HandleId, EngineError> {
        self.ensure_attached()?;
        let obj = self.arena.alloc_object(ObjectClass::Plain)?;
        self.handle(Slot::Obj(obj))
    }

    fn new_array(&mut self) -> Result<HandleId, EngineError> {
        self.ensure_attached()?;
        let obj = self.arena.alloc_object(ObjectClass::Array)?;
        self.handle(Slot::Obj(obj))
    }

    fn get_property(&mut self, object: HandleId, key: &str) -> Result<HandleId, EngineError> {
        let target = self.slot(object)?;
        let value = self
            .get_value_property(target, key)
            .map_err(|throw| self.throw_to_error(throw))?;
        self.handle(value)
    }

    fn set_property(
        &mut self,
        object: HandleId,
        key: &str,
        value: HandleId,
    ) -> Result<(), EngineError> {
        let target = self.slot(object)?;
        let value = self.slot(value)?;
        self.set_value_property(target, key, value)
            .map_err(|throw| self.throw_to_error(throw))
    }

    fn has_property(&self, object: HandleId, key: &str) -> Result<bool, EngineError> {
        let obj = self.object(object)?;
        Ok(self.arena.has_own(obj, key)
            || (key == "push" && self.arena.object_class(obj) == ObjectClass::Array))
    }

    fn define_property(
        &mut self,
        object: HandleId,
        key: &str,
        value: HandleId,
        flags: PropertyFlags,
    ) -> Result<(), EngineError> {
        let obj = self.object(object)?;
        let value = self.slot(value)?;
        self.arena.define(obj, key, value, flags)
    }

    fn own_keys(&self, object: HandleId) -> Result<Vec<String>, EngineError> {
        let obj = self.object(object)?;
        Ok(self.arena.own_keys(obj))
    }

    fn dup(&mut self, value: HandleId) -> Result<HandleId, EngineError> {
        self.ensure_attached()?;
        self.arena.dup_handle(self.context, value)
    }

    fn free(&mut self, value: HandleId) -> Result<(), EngineError> {
        self.ensure_attached()?;
        self.arena.free_handle(self.context, value)
    }
}

/// Builds [`ArenaEngine`]s with a fixed arena size
#[derive(Debug, Clone, Copy)]
pub struct ArenaEngineFactory {
    memory_size: usize,
}

impl ArenaEngineFactory {
    pub fn new(memory_size: usize) -> Self {
        Self {
            memory_size: memory_size.clamp(MIN_MEMORY_SIZE, MAX_MEMORY_SIZE),
        }
    }
}

impl Default for ArenaEngineFactory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_SIZE)
    }
}

impl EngineFactory for ArenaEngineFactory {
    fn create(&self) -> Result<Box<dyn Engine>, EngineError> {
        Ok(Box::new(ArenaEngine::new(self.memory_size)))
    }

    fn memory_size(&self) -> usize {
        self.memory_size
    }
}
