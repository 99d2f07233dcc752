//! Statement execution
//!
//! Adds `impl ArenaEngine` methods for declarations, blocks, conditionals,
//! the two loop forms and `try`. `break` and `continue` are reported through
//! [`Completion`] so loop drivers can react without extra state.

use super::{Completion, Exec, Throw};
use crate::engine::arena::heap::Ptr;
use crate::engine::arena::syntax::ast::{Expr, Stmt};
use crate::engine::arena::value::Slot;
use crate::engine::arena::ArenaEngine;

/// What a loop driver should do after one body execution.
enum LoopStep {
    Next,
    Exit(Completion),
}

impl ArenaEngine {
    /// Run statements in order, stopping at the first abrupt completion.
    pub(crate) fn exec_statements(&mut self, body: &[Stmt], scope: Ptr) -> Exec<Completion> {
        for stmt in body {
            let completion = self.exec_stmt(stmt, scope)?;
            if completion != Completion::Normal {
                return Ok(completion);
            }
        }
        Ok(Completion::Normal)
    }

    /// Run a block, giving it its own scope only when it declares something.
    pub(crate) fn exec_block(&mut self, body: &[Stmt], scope: Ptr) -> Exec<Completion> {
        if !body.iter().any(Stmt::declares_lexical) {
            return self.exec_statements(body, scope);
        }
        let block_scope = self.new_scope(scope, false)?;
        let completion = self.holding(Slot::Obj(block_scope), |engine| {
            engine.hoist_functions(body, block_scope)?;
            engine.exec_statements(body, block_scope)
        })?;
        self.drop_scope(block_scope);
        Ok(completion)
    }

    pub(crate) fn exec_stmt(&mut self, stmt: &Stmt, scope: Ptr) -> Exec<Completion> {
        self.descend()?;
        let completion = self.exec_node(stmt, scope);
        self.nesting -= 1;
        completion
    }

    fn exec_node(&mut self, stmt: &Stmt, scope: Ptr) -> Exec<Completion> {
        match stmt {
            Stmt::Expr(expr) => {
                let value = self.eval_expr(expr, scope)?;
                if self.depth == 0 {
                    self.completion = value;
                }
                Ok(Completion::Normal)
            }
            Stmt::Decl {
                kind, declarations, ..
            } => {
                for (name, init) in declarations {
                    let value = match init {
                        Some(expr) => Some(self.eval_expr(expr, scope)?),
                        None => None,
                    };
                    self.declare(scope, *kind, name, value)?;
                }
                Ok(Completion::Normal)
            }
            // bound when the enclosing body was entered
            Stmt::Function(_) => Ok(Completion::Normal),
            Stmt::Block(body) => self.exec_block(body, scope),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let test = self.eval_expr(condition, scope)?;
                if self.arena.to_boolean(test) {
                    self.exec_stmt(then_branch, scope)
                } else if let Some(else_branch) = else_branch {
                    self.exec_stmt(else_branch, scope)
                } else {
                    Ok(Completion::Normal)
                }
            }
            Stmt::While { condition, body } => self.exec_while(condition, body, scope),
            Stmt::For {
                init,
                condition,
                update,
                body,
            } => self.exec_for(init.as_deref(), condition.as_ref(), update.as_ref(), body, scope),
            Stmt::Break => Ok(Completion::Break),
            Stmt::Continue => Ok(Completion::Continue),
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, scope)?,
                    None => Slot::Undefined,
                };
                Ok(Completion::Return(value))
            }
            Stmt::Throw(expr) => {
                let value = self.eval_expr(expr, scope)?;
                Err(Throw::Value(value))
            }
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => self.exec_try(block, param.as_deref(), handler.as_deref(), finalizer.as_deref(), scope),
            Stmt::Empty => Ok(Completion::Normal),
        }
    }

    fn loop_step(&mut self, body: &Stmt, scope: Ptr) -> Exec<LoopStep> {
        match self.exec_stmt(body, scope)? {
            Completion::Break => Ok(LoopStep::Exit(Completion::Normal)),
            Completion::Return(value) => Ok(LoopStep::Exit(Completion::Return(value))),
            Completion::Normal | Completion::Continue => {
                self.tick()?;
                self.maybe_collect();
                Ok(LoopStep::Next)
            }
        }
    }

    /// `while (condition) body`
    fn exec_while(&mut self, condition: &Expr, body: &Stmt, scope: Ptr) -> Exec<Completion> {
        loop {
            let test = self.eval_expr(condition, scope)?;
            if !self.arena.to_boolean(test) {
                return Ok(Completion::Normal);
            }
            if let LoopStep::Exit(completion) = self.loop_step(body, scope)? {
                return Ok(completion);
            }
        }
    }

    /// `for (init; condition; update) body`
    ///
    /// A lexical declaration in `init` gets one scope for the whole loop.
    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        condition: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        scope: Ptr,
    ) -> Exec<Completion> {
        let loop_scope = match init {
            Some(stmt) if stmt.declares_lexical() => self.new_scope(scope, false)?,
            _ => scope,
        };
        let completion = self.holding(Slot::Obj(loop_scope), |engine| {
            if let Some(init) = init {
                engine.exec_stmt(init, loop_scope)?;
            }
            loop {
                if let Some(condition) = condition {
                    let test = engine.eval_expr(condition, loop_scope)?;
                    if !engine.arena.to_boolean(test) {
                        return Ok(Completion::Normal);
                    }
                }
                if let LoopStep::Exit(completion) = engine.loop_step(body, loop_scope)? {
                    return Ok(completion);
                }
                if let Some(update) = update {
                    engine.eval_expr(update, loop_scope)?;
                }
            }
        })?;

        if loop_scope != scope {
            self.drop_scope(loop_scope);
        }
        Ok(completion)
    }

    /// `try`/`catch`/`finally`. Interrupts and host failures skip both handlers.
    fn exec_try(
        &mut self,
        block: &[Stmt],
        param: Option<&str>,
        handler: Option<&[Stmt]>,
        finalizer: Option<&[Stmt]>,
        scope: Ptr,
    ) -> Exec<Completion> {
        let mut result = self.exec_block(block, scope);

        let caught = match result {
            Err(Throw::Value(error)) => handler.map(|handler| (error, handler)),
            _ => None,
        };
        if let Some((error, handler)) = caught {
            result = match param {
                Some(name) => {
                    let catch_scope = self.new_scope(scope, false)?;
                    self.arena.put(catch_scope, name, error)?;
                    let outcome =
                        self.holding(Slot::Obj(catch_scope), |engine| engine.exec_block(handler, catch_scope));
                    if outcome.is_ok() {
                        self.drop_scope(catch_scope);
                    }
                    outcome
                }
                None => self.exec_block(handler, scope),
            };
        }

        if let Some(finalizer) = finalizer {
            if !matches!(result, Err(Throw::Interrupted) | Err(Throw::Fatal(_))) {
                // a pending return value or exception must outlive the finalizer
                let pending = match result {
                    Ok(Completion::Return(value)) | Err(Throw::Value(value)) => value,
                    _ => Slot::Undefined,
                };
                let completion = self.holding(pending, |engine| engine.exec_block(finalizer, scope))?;
                if completion != Completion::Normal {
                    return Ok(completion);
                }
            }
        }
        result
    }
}
