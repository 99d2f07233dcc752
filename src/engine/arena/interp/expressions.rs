//! Expression evaluation and property access

use super::Exec;
use crate::engine::arena::coerce::format_number;
use crate::engine::arena::handles::CtxField;
use crate::engine::arena::heap::Ptr;
use crate::engine::arena::object::ObjectClass;
use crate::engine::arena::syntax::ast::{BinOp, Expr, LogicalOp, UnaryOp};
use crate::engine::arena::value::Slot;
use crate::engine::arena::ArenaEngine;

/// Human readable description of a callee for "is not a function" errors
fn describe_callee(expr: &Expr) -> String {
    match expr {
        Expr::Ident { name, .. } => name.clone(),
        Expr::Member { object, property, .. } => format!("{}.{}", describe_callee(object), property),
        Expr::This => "this".to_string(),
        _ => "expression".to_string(),
    }
}

impl ArenaEngine {
    pub(crate) fn eval_expr(&mut self, expr: &Expr, scope: Ptr) -> Exec<Slot> {
        self.descend()?;
        let value = self.eval_node(expr, scope);
        self.nesting -= 1;
        value
    }

    fn eval_node(&mut self, expr: &Expr, scope: Ptr) -> Exec<Slot> {
        match expr {
            Expr::Number(n) => Ok(Slot::Number(*n)),
            Expr::Str(s) => Ok(Slot::Str(self.arena.alloc_string(s)?)),
            Expr::Bool(b) => Ok(Slot::Bool(*b)),
            Expr::Null => Ok(Slot::Null),
            Expr::This => Ok(self.this_value(scope)),
            Expr::Ident { name, .. } => match self.lookup(scope, name) {
                Some(value) => Ok(value),
                None => Err(self.throw_error("ReferenceError", &format!("{} is not defined", name))),
            },
            Expr::Array(elements) => {
                let array = self.arena.alloc_object(ObjectClass::Array)?;
                self.holding(Slot::Obj(array), |engine| {
                    for element in elements {
                        let value = engine.eval_expr(element, scope)?;
                        engine.arena.array_push(array, value)?;
                    }
                    Ok(Slot::Obj(array))
                })
            }
            Expr::Object(entries) => {
                let object = self.arena.alloc_object(ObjectClass::Plain)?;
                self.holding(Slot::Obj(object), |engine| {
                    for (key, value) in entries {
                        let value = engine.eval_expr(value, scope)?;
                        engine.arena.put(object, key, value)?;
                    }
                    Ok(Slot::Obj(object))
                })
            }
            Expr::Function(def) => self.make_closure(def, scope),
            Expr::Unary { op, operand } => self.eval_unary(*op, operand, scope),
            Expr::Binary { op, left, right } => {
                let left = self.eval_expr(left, scope)?;
                let right = self.holding(left, |engine| engine.eval_expr(right, scope))?;
                self.binary_op(*op, left, right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval_expr(left, scope)?;
                let truthy = self.arena.to_boolean(left);
                match (op, truthy) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval_expr(right, scope),
                }
            }
            Expr::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                let test = self.eval_expr(condition, scope)?;
                if self.arena.to_boolean(test) {
                    self.eval_expr(then_expr, scope)
                } else {
                    self.eval_expr(else_expr, scope)
                }
            }
            Expr::Assign { target, value, .. } => self.eval_assign(target, value, scope),
            Expr::CompoundAssign {
                op, target, value, ..
            } => {
                let current = self.eval_expr(target, scope)?;
                let rhs = self.holding(current, |engine| engine.eval_expr(value, scope))?;
                let result = self.binary_op(*op, current, rhs)?;
                self.holding(result, |engine| engine.store(target, result, scope))?;
                Ok(result)
            }
            Expr::Update {
                target,
                increment,
                prefix,
                ..
            } => {
                let current = self.eval_expr(target, scope)?;
                let old = self.arena.to_number(current);
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.store(target, Slot::Number(new), scope)?;
                Ok(Slot::Number(if *prefix { new } else { old }))
            }
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval_expr(object, scope)?;
                self.get_value_property(object, property)
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval_expr(object, scope)?;
                let key = self.holding(object, |engine| engine.eval_expr(index, scope))?;
                let key = self.property_key(key);
                self.get_value_property(object, &key)
            }
            Expr::Call { callee, args, .. } => {
                let mark = self.roots.len();
                let result = self.eval_call(callee, args, scope);
                self.release(mark);
                result
            }
            Expr::New { callee, args, .. } => {
                let callee_value = self.eval_expr(callee, scope)?;
                self.holding(callee_value, |engine| {
                    let args = engine.eval_args(args, scope)?;
                    if !engine.is_callable(callee_value) {
                        let message = format!("{} is not a constructor", describe_callee(callee));
                        return Err(engine.throw_error("TypeError", &message));
                    }
                    engine.construct(callee_value, &args)
                })
            }
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, scope: Ptr) -> Exec<Slot> {
        if op == UnaryOp::Typeof {
            // typeof tolerates undeclared identifiers
            if let Expr::Ident { name, .. } = operand {
                let value = self.lookup(scope, name).unwrap_or(Slot::Undefined);
                return Ok(Slot::Str(self.arena.alloc_string(self.arena.type_name(value))?));
            }
            let value = self.eval_expr(operand, scope)?;
            return Ok(Slot::Str(self.arena.alloc_string(self.arena.type_name(value))?));
        }
        let value = self.eval_expr(operand, scope)?;
        Ok(match op {
            UnaryOp::Not => Slot::Bool(!self.arena.to_boolean(value)),
            UnaryOp::Neg => Slot::Number(-self.arena.to_number(value)),
            _ => Slot::Number(self.arena.to_number(value)),
        })
    }

    pub(crate) fn binary_op(&mut self, op: BinOp, left: Slot, right: Slot) -> Exec<Slot> {
        let stringy = |slot: Slot| matches!(slot, Slot::Str(_) | Slot::Obj(_));
        if op == BinOp::Add && (stringy(left) || stringy(right)) {
            let mut text = self.arena.to_display(left);
            text.push_str(&self.arena.to_display(right));
            return Ok(Slot::Str(self.arena.alloc_string(&text)?));
        }

        let arena = &self.arena;
        let numeric = |f: fn(f64, f64) -> f64| Slot::Number(f(arena.to_number(left), arena.to_number(right)));
        let result = match op {
            BinOp::Add => numeric(|a, b| a + b),
            BinOp::Sub => numeric(|a, b| a - b),
            BinOp::Mul => numeric(|a, b| a * b),
            BinOp::Div => numeric(|a, b| a / b),
            BinOp::Mod => numeric(|a, b| a % b),
            BinOp::StrictEq => Slot::Bool(arena.strict_equal(left, right)),
            BinOp::StrictNe => Slot::Bool(!arena.strict_equal(left, right)),
            BinOp::Eq => Slot::Bool(arena.loose_equal(left, right)),
            BinOp::Ne => Slot::Bool(!arena.loose_equal(left, right)),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => Slot::Bool(self.compare(op, left, right)),
        };
        Ok(result)
    }

    fn compare(&self, op: BinOp, left: Slot, right: Slot) -> bool {
        if let (Slot::Str(a), Slot::Str(b)) = (left, right) {
            let (a, b) = (self.arena.string_bytes(a), self.arena.string_bytes(b));
            return match op {
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                _ => a >= b,
            };
        }
        let (a, b) = (self.arena.to_number(left), self.arena.to_number(right));
        match op {
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            BinOp::Gt => a > b,
            _ => a >= b,
        }
    }

    /// Evaluate call arguments. Each value stays on the root stack; the
    /// caller releases them.
    fn eval_args(&mut self, args: &[Expr], scope: Ptr) -> Exec<Vec<Slot>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval_expr(arg, scope)?;
            self.roots.push(value);
            values.push(value);
        }
        Ok(values)
    }

    /// Evaluate and perform a call. Receiver, callee and arguments are left
    /// on the root stack for the caller to release.
    fn eval_call(&mut self, callee: &Expr, args: &[Expr], scope: Ptr) -> Exec<Slot> {
        let (func, this) = match callee {
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval_expr(object, scope)?;
                self.roots.push(object);
                (self.get_value_property(object, property)?, object)
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval_expr(object, scope)?;
                self.roots.push(object);
                let key = self.eval_expr(index, scope)?;
                let key = self.property_key(key);
                (self.get_value_property(object, &key)?, object)
            }
            _ => (self.eval_expr(callee, scope)?, Slot::Undefined),
        };
        self.roots.push(func);
        let args = self.eval_args(args, scope)?;
        if !self.is_callable(func) {
            let message = format!("{} is not a function", describe_callee(callee));
            return Err(self.throw_error("TypeError", &message));
        }
        self.call_function(func, this, &args)
    }

    fn eval_assign(&mut self, target: &Expr, value: &Expr, scope: Ptr) -> Exec<Slot> {
        match target {
            Expr::Ident { name, .. } => {
                let value = self.eval_expr(value, scope)?;
                self.assign_binding(scope, name, value)?;
                Ok(value)
            }
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval_expr(object, scope)?;
                let value = self.holding(object, |engine| engine.eval_expr(value, scope))?;
                self.set_value_property(object, property, value)?;
                Ok(value)
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval_expr(object, scope)?;
                let (key, value) = self.holding(object, |engine| {
                    let key = engine.eval_expr(index, scope)?;
                    let key = engine.property_key(key);
                    Ok((key, engine.eval_expr(value, scope)?))
                })?;
                self.set_value_property(object, &key, value)?;
                Ok(value)
            }
            _ => Err(self.throw_error("SyntaxError", "invalid assignment target")),
        }
    }

    /// Write `value` to an already evaluated assignment target.
    fn store(&mut self, target: &Expr, value: Slot, scope: Ptr) -> Exec<()> {
        match target {
            Expr::Ident { name, .. } => self.assign_binding(scope, name, value),
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval_expr(object, scope)?;
                self.set_value_property(object, property, value)
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval_expr(object, scope)?;
                let key = self.holding(object, |engine| engine.eval_expr(index, scope))?;
                let key = self.property_key(key);
                self.set_value_property(object, &key, value)
            }
            _ => Err(self.throw_error("SyntaxError", "invalid assignment target")),
        }
    }

    /// `ToPropertyKey` for the dialect: numbers use their printed form.
    pub(crate) fn property_key(&self, key: Slot) -> String {
        match key {
            Slot::Number(n) => format_number(n),
            other => self.arena.to_display(other),
        }
    }

    /// Property read on any value.
    pub(crate) fn get_value_property(&mut self, object: Slot, key: &str) -> Exec<Slot> {
        match object {
            Slot::Obj(obj) => Ok(self.get_object_property(obj, key)),
            Slot::Str(ptr) => {
                let text = self.arena.read_string(ptr);
                if key == "length" {
                    return Ok(Slot::Number(text.chars().count() as f64));
                }
                match key.parse::<usize>().ok().and_then(|i| text.chars().nth(i)) {
                    Some(ch) => Ok(Slot::Str(self.arena.alloc_string(ch.encode_utf8(&mut [0; 4]))?)),
                    None => Ok(Slot::Undefined),
                }
            }
            Slot::Undefined | Slot::Null => {
                let shown = self.arena.to_display(object);
                Err(self.throw_error(
                    "TypeError",
                    &format!("cannot read property '{}' of {}", key, shown),
                ))
            }
            _ => Ok(Slot::Undefined),
        }
    }

    /// Own property or class intrinsic of an object.
    pub(crate) fn get_object_property(&self, obj: Ptr, key: &str) -> Slot {
        if let Some(value) = self.arena.get_own(obj, key) {
            return value;
        }
        if key == "push" && self.arena.object_class(obj) == ObjectClass::Array {
            return Slot::Obj(self.arena.ctx(self.context, CtxField::ArrayPush));
        }
        Slot::Undefined
    }

    /// Property write on any value. Writes to read-only properties and to
    /// primitives are ignored.
    pub(crate) fn set_value_property(&mut self, object: Slot, key: &str, value: Slot) -> Exec<()> {
        match object {
            Slot::Obj(obj) => {
                self.arena.put(obj, key, value)?;
                Ok(())
            }
            Slot::Undefined | Slot::Null => {
                let shown = self.arena.to_display(object);
                Err(self.throw_error(
                    "TypeError",
                    &format!("cannot set property '{}' of {}", key, shown),
                ))
            }
            _ => Ok(()),
        }
    }
}
