//! Tree-walking interpreter for the arena engine
//!
//! The interpreter walks the AST produced by [`super::syntax`] and keeps all
//! guest state in arena memory: bindings live in scope objects, closures hold
//! their source text and environment pointer. The host side only caches parsed
//! function bodies keyed by the code string pointer.
//!
//! - this module: control signals, scopes, closures and calls
//! - `statements`: statement execution, loops and `try`
//! - `expressions`: expression evaluation and property access
//!
//! # Interrupts
//!
//! Loop back-edges and function calls each count one tick. Every
//! [`INTERRUPT_INTERVAL`] ticks the interrupt handler is polled; a `true`
//! answer unwinds with [`Throw::Interrupted`], which guest `catch` and
//! `finally` blocks never see.
//!
//! # Collection
//!
//! The collector may run at every loop back-edge. Any arena value kept in a
//! Rust local across a nested evaluation must be on the root stack for that
//! span ([`ArenaEngine::hold`] / [`ArenaEngine::release`]): array and object
//! literals under construction, left operands, call targets and arguments,
//! and the scopes of running blocks, loops and calls.

mod expressions;
mod statements;

use super::heap::Ptr;
use super::object::{
    ObjectClass, CLOSURE_ARROW, CLOSURE_CODE, CLOSURE_ENV, CLOSURE_FLAGS, NATIVE_ID,
    SCOPE_CAPTURED, SCOPE_FLAGS, SCOPE_FUNCTION, SCOPE_PARENT,
};
use super::syntax::ast::{DeclKind, FunctionBody, FunctionDef, Stmt};
use super::syntax::Parser;
use super::value::Slot;
use super::builtins::Native;
use super::handles::CtxField;
use super::ArenaEngine;
use crate::constants::{INTERRUPT_INTERVAL, MAX_CALL_DEPTH, MAX_EVAL_DEPTH};
use crate::engine::{EngineError, PropertyFlags};
use std::sync::Arc;

/// Binding name of the receiver inside function and script scopes.
const THIS_BINDING: &str = "%this";

/// Abrupt completion that unwinds through guest code
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Throw {
    /// A guest `throw`
    Value(Slot),
    /// The interrupt handler requested termination; uncatchable
    Interrupted,
    /// Host-side failure such as arena exhaustion; uncatchable
    Fatal(EngineError),
}

impl From<EngineError> for Throw {
    fn from(err: EngineError) -> Self {
        Throw::Fatal(err)
    }
}

pub(crate) type Exec<T> = Result<T, Throw>;

/// How a statement finished
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Completion {
    Normal,
    Return(Slot),
    Break,
    Continue,
}

impl ArenaEngine {
    // ===== Interrupts =====

    /// Start of a host entry point: reset the tick budget and poll once.
    pub(crate) fn begin_entry(&mut self) -> Exec<()> {
        self.ticks = 0;
        self.depth = 0;
        self.nesting = 0;
        self.roots.clear();
        self.maybe_collect();
        self.poll_interrupt()
    }

    fn poll_interrupt(&mut self) -> Exec<()> {
        match self.interrupt.as_mut() {
            Some(handler) => {
                if handler() {
                    Err(Throw::Interrupted)
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }

    pub(crate) fn tick(&mut self) -> Exec<()> {
        self.ticks += 1;
        if self.ticks >= INTERRUPT_INTERVAL {
            self.ticks = 0;
            self.poll_interrupt()?;
        }
        Ok(())
    }

    /// Enter one level of evaluator recursion; pair with `self.nesting -= 1`.
    pub(crate) fn descend(&mut self) -> Exec<()> {
        if self.nesting >= MAX_EVAL_DEPTH {
            return Err(self.throw_error("RangeError", "Maximum call stack size exceeded"));
        }
        self.nesting += 1;
        Ok(())
    }

    // ===== Errors =====

    /// Build an error object with the given constructor name.
    pub(crate) fn make_error(&mut self, name: &str, message: &str) -> Result<Slot, EngineError> {
        let obj = self.arena.alloc_object(ObjectClass::Error)?;
        let flags = PropertyFlags {
            writable: true,
            enumerable: false,
            configurable: true,
        };
        let name = Slot::Str(self.arena.alloc_string(name)?);
        let message = Slot::Str(self.arena.alloc_string(message)?);
        self.arena.define(obj, "name", name, flags)?;
        self.arena.define(obj, "message", message, flags)?;
        Ok(Slot::Obj(obj))
    }

    /// A guest-visible exception of class `name`.
    pub(crate) fn throw_error(&mut self, name: &str, message: &str) -> Throw {
        match self.make_error(name, message) {
            Ok(error) => Throw::Value(error),
            Err(err) => Throw::Fatal(err),
        }
    }

    /// Convert an unwinding signal into the host-facing error.
    pub(crate) fn throw_to_error(&self, throw: Throw) -> EngineError {
        match throw {
            Throw::Value(Slot::Obj(obj)) if self.arena.object_class(obj) == ObjectClass::Error => {
                EngineError::Exception(self.arena.error_text(obj))
            }
            Throw::Value(value) => EngineError::Exception(self.arena.to_display(value)),
            Throw::Interrupted => EngineError::Interrupted,
            Throw::Fatal(err) => err,
        }
    }

    // ===== Scopes =====

    pub(crate) fn global_object(&self) -> Ptr {
        self.arena.ctx(self.context, CtxField::Global)
    }

    pub(crate) fn script_scope(&self) -> Ptr {
        self.arena.ctx(self.context, CtxField::ScriptScope)
    }

    pub(crate) fn new_scope(&mut self, parent: Ptr, function: bool) -> Exec<Ptr> {
        let scope = self.arena.alloc_object(ObjectClass::Scope)?;
        self.arena.set_aux(scope, SCOPE_PARENT, parent);
        if function {
            self.arena.set_aux(scope, SCOPE_FLAGS, SCOPE_FUNCTION);
        }
        Ok(scope)
    }

    /// Release a scope unless a closure captured it.
    pub(crate) fn drop_scope(&mut self, scope: Ptr) {
        if self.arena.aux(scope, SCOPE_FLAGS) & SCOPE_CAPTURED == 0 {
            self.arena.free_object(scope);
        }
    }

    fn parent_scope(&self, scope: Ptr) -> Option<Ptr> {
        if self.arena.object_class(scope) != ObjectClass::Scope {
            return None;
        }
        Some(self.arena.aux(scope, SCOPE_PARENT)).filter(|&p| p != 0)
    }

    /// Walk the scope chain for the record that owns `name`.
    fn binding_owner(&self, scope: Ptr, name: &str) -> Option<Ptr> {
        let mut current = Some(scope);
        while let Some(record) = current {
            if self.arena.has_own(record, name) {
                return Some(record);
            }
            current = self.parent_scope(record);
        }
        None
    }

    pub(crate) fn lookup(&self, scope: Ptr, name: &str) -> Option<Slot> {
        self.binding_owner(scope, name)
            .and_then(|record| self.arena.get_own(record, name))
    }

    /// Assignment to an identifier. Unknown names become global properties.
    pub(crate) fn assign_binding(&mut self, scope: Ptr, name: &str, value: Slot) -> Exec<()> {
        let record = self
            .binding_owner(scope, name)
            .unwrap_or_else(|| self.global_object());
        let written = self.arena.put(record, name, value)?;
        if !written && self.arena.object_class(record) == ObjectClass::Scope {
            return Err(self.throw_error("TypeError", "Assignment to constant variable."));
        }
        Ok(())
    }

    /// Create a binding for a declaration in `scope`.
    pub(crate) fn declare(&mut self, scope: Ptr, kind: DeclKind, name: &str, value: Option<Slot>) -> Exec<()> {
        match kind {
            DeclKind::Var => {
                let mut target = scope;
                while self.arena.object_class(target) == ObjectClass::Scope
                    && self.arena.aux(target, SCOPE_FLAGS) & SCOPE_FUNCTION == 0
                {
                    match self.parent_scope(target) {
                        Some(parent) => target = parent,
                        None => break,
                    }
                }
                match value {
                    Some(value) => {
                        self.arena.put(target, name, value)?;
                    }
                    None if !self.arena.has_own(target, name) => {
                        self.arena.put(target, name, Slot::Undefined)?;
                    }
                    None => {}
                }
                Ok(())
            }
            DeclKind::Let | DeclKind::Const => {
                if self.arena.has_own(scope, name) {
                    return Err(self.throw_error(
                        "SyntaxError",
                        &format!("redeclaration of '{}'", name),
                    ));
                }
                let flags = PropertyFlags {
                    writable: kind == DeclKind::Let,
                    enumerable: true,
                    configurable: false,
                };
                self.arena
                    .define(scope, name, value.unwrap_or(Slot::Undefined), flags)?;
                Ok(())
            }
        }
    }

    /// Bind function declarations of `body` before it runs.
    ///
    /// At script level functions become global object properties; elsewhere
    /// they are bindings of the enclosing scope.
    pub(crate) fn hoist_functions(&mut self, body: &[Stmt], scope: Ptr) -> Exec<()> {
        let target = if scope == self.script_scope() {
            self.global_object()
        } else {
            scope
        };
        for stmt in body {
            if let Stmt::Function(def) = stmt {
                let closure = self.make_closure(def, scope)?;
                if let Some(name) = &def.name {
                    self.arena.put(target, name, closure)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn this_value(&self, scope: Ptr) -> Slot {
        self.lookup(scope, THIS_BINDING).unwrap_or(Slot::Undefined)
    }

    /// Bind `this` at script level.
    pub(crate) fn bind_script_this(&mut self, scope: Ptr, global: Ptr) -> Result<(), EngineError> {
        let flags = PropertyFlags {
            writable: false,
            enumerable: false,
            configurable: false,
        };
        self.arena.define(scope, THIS_BINDING, Slot::Obj(global), flags)
    }

    // ===== Closures and calls =====

    pub(crate) fn make_closure(&mut self, def: &Arc<FunctionDef>, env: Ptr) -> Exec<Slot> {
        let code = self.arena.alloc_string(&def.source)?;
        let closure = self.arena.alloc_object(ObjectClass::Closure)?;
        self.arena.set_aux(closure, CLOSURE_CODE, code);
        self.arena.set_aux(closure, CLOSURE_ENV, env);
        if def.is_arrow {
            self.arena.set_aux(closure, CLOSURE_FLAGS, CLOSURE_ARROW);
        }
        self.functions.insert(code, Arc::clone(def));

        // everything the closure can reach must outlive the current call
        let mut current = Some(env);
        while let Some(scope) = current {
            let flags = self.arena.aux(scope, SCOPE_FLAGS);
            if self.arena.object_class(scope) != ObjectClass::Scope || flags & SCOPE_CAPTURED != 0 {
                break;
            }
            self.arena.set_aux(scope, SCOPE_FLAGS, flags | SCOPE_CAPTURED);
            current = self.parent_scope(scope);
        }
        Ok(Slot::Obj(closure))
    }

    /// Parsed definition of a closure, re-parsed from its code string on a cache miss.
    fn function_def(&mut self, closure: Ptr) -> Exec<Arc<FunctionDef>> {
        let code = self.arena.aux(closure, CLOSURE_CODE);
        if let Some(def) = self.functions.get(&code) {
            return Ok(Arc::clone(def));
        }
        let source = self.arena.read_string(code);
        let def = Parser::new(&source)
            .and_then(|mut parser| parser.parse_function_source())
            .map_err(|err| self.throw_error("SyntaxError", &err.message))?;
        self.functions.insert(code, Arc::clone(&def));
        Ok(def)
    }

    pub(crate) fn is_callable(&self, value: Slot) -> bool {
        value
            .as_object()
            .is_some_and(|obj| self.arena.object_class(obj).is_callable())
    }

    /// Call a function value.
    pub(crate) fn call_function(&mut self, func: Slot, this: Slot, args: &[Slot]) -> Exec<Slot> {
        let obj = match func {
            Slot::Obj(obj) if self.arena.object_class(obj).is_callable() => obj,
            other => {
                let shown = self.arena.to_display(other);
                return Err(self.throw_error("TypeError", &format!("{} is not a function", shown)));
            }
        };
        self.tick()?;
        if self.depth >= MAX_CALL_DEPTH {
            return Err(self.throw_error("RangeError", "Maximum call stack size exceeded"));
        }

        self.depth += 1;
        let result = match self.arena.object_class(obj) {
            ObjectClass::Native => match Native::from_id(self.arena.aux(obj, NATIVE_ID)) {
                Some(native) => self.call_native(native, this, args),
                None => Err(self.throw_error("TypeError", "unknown native function")),
            },
            _ => self.call_closure(obj, this, args),
        };
        self.depth -= 1;
        result
    }

    fn call_closure(&mut self, closure: Ptr, this: Slot, args: &[Slot]) -> Exec<Slot> {
        let def = self.function_def(closure)?;
        let env = self.arena.aux(closure, CLOSURE_ENV);
        let scope = self.new_scope(env, true)?;

        if !def.is_arrow {
            self.arena.put(scope, THIS_BINDING, this)?;
            if let Some(name) = &def.name {
                self.arena.put(scope, name, Slot::Obj(closure))?;
            }
        }
        for (i, param) in def.params.iter().enumerate() {
            let value = args.get(i).copied().unwrap_or(Slot::Undefined);
            self.arena.put(scope, param, value)?;
        }

        let mark = self.hold(Slot::Obj(scope));
        let result = match &def.body {
            FunctionBody::Expr(expr) => self.eval_expr(expr, scope),
            FunctionBody::Block(body) => self.hoist_functions(body, scope).and_then(|()| {
                match self.exec_statements(body, scope)? {
                    Completion::Return(value) => Ok(value),
                    _ => Ok(Slot::Undefined),
                }
            }),
        };
        self.release(mark);
        if result.is_ok() {
            self.drop_scope(scope);
        }
        result
    }

    /// `new callee(args)`
    pub(crate) fn construct(&mut self, callee: Slot, args: &[Slot]) -> Exec<Slot> {
        match callee {
            Slot::Obj(obj) if self.arena.object_class(obj) == ObjectClass::Closure => {
                if self.arena.aux(obj, CLOSURE_FLAGS) & CLOSURE_ARROW != 0 {
                    return Err(self.throw_error("TypeError", "arrow functions are not constructors"));
                }
                let instance = Slot::Obj(self.arena.alloc_object(ObjectClass::Plain)?);
                let mark = self.hold(instance);
                let result = self.call_function(callee, instance, args);
                self.release(mark);
                match result? {
                    result @ Slot::Obj(_) => Ok(result),
                    _ => Ok(instance),
                }
            }
            _ => self.call_function(callee, Slot::Undefined, args),
        }
    }

    /// Run a whole script in the script scope.
    pub(crate) fn run_program(&mut self, body: &[Stmt]) -> Exec<()> {
        let scope = self.script_scope();
        self.hoist_functions(body, scope)?;
        self.exec_statements(body, scope)?;
        Ok(())
    }
}
