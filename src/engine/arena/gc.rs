//! Mark-and-sweep garbage collection
//!
//! The collector is non-moving, so arena pointers held by the host stay
//! valid across a collection. Roots are:
//!
//! - the runtime and context records and the handle table
//! - every live handle's value
//! - the global object, the script scope and the shared `push` native
//! - the interpreter's root stack of values held mid-evaluation
//! - the pending completion value of the running script
//!
//! Pinned blocks (allocated for the host through [`Engine::allocate`]) are
//! never reclaimed and hold no references.
//!
//! Collection only runs at safe points: host entry and loop back-edges. At
//! those points every value the interpreter still needs is reachable from
//! the roots above.
//!
//! [`Engine::allocate`]: crate::engine::Engine::allocate

use super::handles::CtxField;
use super::heap::{Arena, Ptr};
use super::interp::Exec;
use super::object::Edge;
use super::value::Slot;
use super::ArenaEngine;
use log::debug;

/// Outcome of one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Collection {
    pub(crate) reclaimed: u32,
    pub(crate) live: u32,
}

impl Arena {
    /// Mark everything reachable from `context` and `extra`, then sweep.
    pub(crate) fn collect(&mut self, context: Ptr, extra: impl IntoIterator<Item = Slot>) -> Collection {
        let mut pending: Vec<Ptr> = Vec::new();

        let runtime = self.ctx(context, CtxField::Runtime);
        let table = self.ctx(context, CtxField::HandleTable);
        for record in [runtime, context, table] {
            self.mark(record);
        }
        for slot in self.handle_values(context) {
            self.trace(slot, &mut pending);
        }
        for field in [CtxField::Global, CtxField::ScriptScope, CtxField::ArrayPush] {
            let obj = self.ctx(context, field);
            self.trace(Slot::Obj(obj), &mut pending);
        }
        for slot in extra {
            self.trace(slot, &mut pending);
        }

        let mut edges = Vec::new();
        while let Some(obj) = pending.pop() {
            edges.clear();
            self.object_edges(obj, &mut edges);
            for &edge in &edges {
                match edge {
                    Edge::Block(ptr) => {
                        self.mark(ptr);
                    }
                    Edge::Value(slot) => self.trace(slot, &mut pending),
                }
            }
        }

        let reclaimed = self.sweep();
        Collection {
            reclaimed,
            live: self.live_bytes(),
        }
    }

    fn trace(&mut self, slot: Slot, pending: &mut Vec<Ptr>) {
        match slot {
            Slot::Str(ptr) => {
                self.mark(ptr);
            }
            Slot::Obj(obj) => {
                if self.mark(obj) {
                    pending.push(obj);
                }
            }
            _ => {}
        }
    }
}

impl ArenaEngine {
    /// Collect when live data or the bump pointer has grown past the
    /// current limits.
    pub(crate) fn maybe_collect(&mut self) {
        if self.arena.live_bytes() >= self.gc_threshold || self.arena.top() >= self.gc_top_limit {
            self.collect_garbage();
        }
    }

    pub(crate) fn collect_garbage(&mut self) -> Collection {
        let extra = self.roots.iter().copied().chain([self.completion]);
        let collection = self.arena.collect(self.context, extra);
        let arena = &self.arena;
        self.functions.retain(|&code, _| arena.is_allocated(code));
        self.tune_collector();
        debug!(
            "collected {} bytes, {} live, next at {} live or top {}",
            collection.reclaimed, collection.live, self.gc_threshold, self.gc_top_limit
        );
        collection
    }

    /// Put the next collection halfway between current usage and a full arena.
    pub(crate) fn tune_collector(&mut self) {
        let len = self.arena.len() as u32;
        let live = self.arena.live_bytes().min(len);
        let top = self.arena.top().min(len);
        self.gc_threshold = live + (len - live) / 2;
        self.gc_top_limit = top + (len - top) / 2;
    }

    /// Keep `value` reachable until [`ArenaEngine::release`] cuts the root
    /// stack back to the returned mark.
    pub(crate) fn hold(&mut self, value: Slot) -> usize {
        let mark = self.roots.len();
        self.roots.push(value);
        mark
    }

    pub(crate) fn release(&mut self, mark: usize) {
        self.roots.truncate(mark);
    }

    /// Run `f` with `value` on the root stack.
    pub(crate) fn holding<T>(&mut self, value: Slot, f: impl FnOnce(&mut Self) -> Exec<T>) -> Exec<T> {
        let mark = self.hold(value);
        let result = f(self);
        self.release(mark);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;

    fn engine() -> ArenaEngine {
        let mut engine = ArenaEngine::new(256 * 1024);
        engine.initialize().unwrap();
        engine
    }

    fn eval_text(engine: &mut ArenaEngine, source: &str) -> String {
        let handle = engine.evaluate(source).unwrap();
        let text = engine.to_string(handle).unwrap();
        engine.free(handle).unwrap();
        text
    }

    #[test]
    fn test_unreachable_objects_are_reclaimed() {
        let mut e = engine();
        e.collect_garbage();
        let baseline = e.arena.live_bytes();

        eval_text(&mut e, "var junk = []; for (var i = 0; i < 200; i++) junk.push({ i: i }); 1");
        assert!(e.arena.live_bytes() > baseline);
        eval_text(&mut e, "junk = null; 1");
        let collection = e.collect_garbage();
        assert!(collection.reclaimed > 0);
        assert!(e.arena.live_bytes() <= baseline + 1024);
    }

    #[test]
    fn test_reachable_values_survive() {
        let mut e = engine();
        eval_text(
            &mut e,
            "var kept = { list: [1, 'two', { three: 3 }] };
             function counter() { var n = 0; return function () { n += 1; return n; }; }
             var next = counter();",
        );
        let held = e.evaluate("({ label: 'held by the host' })").unwrap();
        e.collect_garbage();
        e.collect_garbage();

        assert_eq!(eval_text(&mut e, "kept.list[1] + kept.list[2].three"), "two3");
        assert_eq!(eval_text(&mut e, "next(); next()"), "2");
        let label = e.get_property(held, "label").unwrap();
        assert_eq!(e.to_string(label).unwrap(), "held by the host");
        e.free(label).unwrap();
        e.free(held).unwrap();
    }

    #[test]
    fn test_pinned_blocks_survive() {
        let mut e = engine();
        let block = e.allocate(64).unwrap();
        e.arena.write_u32(block, 0x1234_5678);
        e.collect_garbage();
        assert!(e.arena.is_allocated(block));
        assert_eq!(e.arena.read_u32(block), 0x1234_5678);
    }

    #[test]
    fn test_values_held_mid_expression_survive_collection() {
        let mut e = ArenaEngine::new(128 * 1024);
        e.initialize().unwrap();
        // each churn() call fills enough of the arena to force collections
        // while the outer array literal and the left operand are only on the
        // root stack
        let text = eval_text(
            &mut e,
            "function churn() { for (var i = 0; i < 3000; i++) { var t = { i: i }; } return 'x'; }
             var pair = [{ a: 'left' }, churn(), { b: 'right' }];
             var joined = ('l' + 'eft') + churn();
             pair[0].a + pair[1] + pair[2].b + joined",
        );
        assert_eq!(text, "leftxrightleftx");
    }
}
