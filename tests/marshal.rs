// Integration tests for host <-> engine value conversion and stand-in access

use forkvm::{
    create_vm, HostFunction, PropertyDescriptor, StandInKind, Symbol, Value, VmError, VmOptions,
};
use rustc_hash::FxHashMap;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn vm() -> forkvm::ForkableVm {
    init();
    create_vm(VmOptions::new().with_memory_size(512 * 1024)).unwrap()
}

#[test]
fn test_host_array_echoes_as_array_stand_in() {
    let vm = vm();
    vm.eval("function identity(x) { return x; }").unwrap();

    let echoed = vm
        .call_function("identity", &[Value::from(vec![1, 2, 3])])
        .unwrap();
    let array = echoed.as_stand_in().expect("array should be a stand-in");
    assert_eq!(array.kind(), StandInKind::Array);
    assert_eq!(array.get(0u32).unwrap(), Value::Number(1.0));
    assert_eq!(array.get(1u32).unwrap(), Value::Number(2.0));
    assert_eq!(array.get("2").unwrap(), Value::Number(3.0));
    assert_eq!(array.get("length").unwrap(), Value::Number(3.0));
    assert_eq!(array.own_keys().unwrap(), vec!["0", "1", "2"]);
}

#[test]
fn test_host_map_becomes_engine_object() {
    let vm = vm();
    vm.eval("function summary(o) { return o.name + '=' + o.size + ',' + Object.keys(o).length; }")
        .unwrap();
    let mut map = FxHashMap::default();
    map.insert("name".to_string(), Value::from("disk"));
    map.insert("size".to_string(), Value::from(64));
    assert_eq!(
        vm.call_function("summary", &[Value::Map(map)]).unwrap(),
        Value::from("disk=64,2")
    );
}

#[test]
fn test_nested_host_values() {
    let vm = vm();
    vm.eval("function pick(o) { return o.items[1].label; }").unwrap();
    let mut inner = FxHashMap::default();
    inner.insert("label".to_string(), Value::from("second"));
    let mut outer = FxHashMap::default();
    outer.insert(
        "items".to_string(),
        Value::List(vec![Value::Null, Value::Map(inner)]),
    );
    assert_eq!(
        vm.call_function("pick", &[Value::Map(outer)]).unwrap(),
        Value::from("second")
    );
}

#[test]
fn test_non_finite_numbers_pass_through() {
    let vm = vm();
    vm.eval("function kind(x) { return x === Infinity ? 'inf' : (x !== x ? 'nan' : 'finite'); }")
        .unwrap();
    assert_eq!(
        vm.call_function("kind", &[Value::Number(f64::INFINITY)]).unwrap(),
        Value::from("inf")
    );
    assert_eq!(
        vm.call_function("kind", &[Value::Number(f64::NAN)]).unwrap(),
        Value::from("nan")
    );
}

#[test]
fn test_null_and_undefined_are_distinct() {
    let vm = vm();
    vm.eval("function kind_of(x) { return x === null ? 'null' : typeof x; }")
        .unwrap();
    assert_eq!(
        vm.call_function("kind_of", &[Value::Null]).unwrap(),
        Value::from("null")
    );
    assert_eq!(
        vm.call_function("kind_of", &[Value::Undefined]).unwrap(),
        Value::from("undefined")
    );
    assert_eq!(vm.eval("({}).missing").unwrap(), Value::Undefined);
}

#[test]
fn test_unsupported_arguments() {
    let vm = vm();
    vm.eval("function identity(x) { return x; }").unwrap();
    let callback = HostFunction::new(|_| Ok(Value::Undefined));
    assert_eq!(
        vm.call_function("identity", &[Value::Function(callback)])
            .unwrap_err(),
        VmError::UnsupportedArgumentType("function".to_string())
    );
    assert!(matches!(
        vm.call_function("identity", &[Value::List(vec![Value::Symbol(Symbol::new(None))])]),
        Err(VmError::UnsupportedArgumentType(_))
    ));
    // the VM is untouched by the rejected call
    assert_eq!(vm.call_function("identity", &[Value::from(1)]).unwrap(), Value::Number(1.0));
}

#[test]
fn test_mutations_are_visible_both_ways() {
    let vm = vm();
    let obj = vm.eval("var state = { hits: 0 }; state").unwrap();
    let state = obj.as_stand_in().unwrap();

    state.set("hits", 5).unwrap();
    assert_eq!(vm.eval("state.hits").unwrap(), Value::Number(5.0));

    vm.eval("state.hits += 1; state.extra = 'x';").unwrap();
    assert_eq!(state.get("hits").unwrap(), Value::Number(6.0));
    assert_eq!(state.own_keys().unwrap(), vec!["hits", "extra"]);
}

#[test]
fn test_global_stand_in_reads_and_writes_bindings() {
    let vm = vm();
    let global = vm.global().unwrap();
    assert_eq!(global.kind(), StandInKind::Object);

    global.set("answer", 42).unwrap();
    assert_eq!(vm.eval("answer + 1").unwrap(), Value::Number(43.0));

    vm.eval("var greeting = 'hi';").unwrap();
    assert_eq!(global.get("greeting").unwrap(), Value::from("hi"));
    assert!(global.own_keys().unwrap().contains(&"greeting".to_string()));
    // builtins are not enumerable
    assert!(!global.own_keys().unwrap().contains(&"Object".to_string()));

    let object_ctor = global.get("Object").unwrap();
    assert_eq!(object_ctor.as_stand_in().unwrap().kind(), StandInKind::Function);
}

#[test]
fn test_has_distinguishes_absent_from_undefined() {
    let vm = vm();
    let obj = vm.eval("({ present: undefined, zero: 0 })").unwrap();
    let obj = obj.as_stand_in().unwrap();
    assert!(obj.has("present").unwrap());
    assert!(obj.has("zero").unwrap());
    assert!(!obj.has("absent").unwrap());
}

#[test]
fn test_symbol_keys_are_never_forwarded() {
    let vm = vm();
    let obj = vm.eval("({ a: 1 })").unwrap();
    let obj = obj.as_stand_in().unwrap();
    let tag = Symbol::new(Some("tag"));

    assert_eq!(obj.get(tag.clone()).unwrap(), Value::Undefined);
    assert!(!obj.has(tag.clone()).unwrap());
    assert_eq!(
        obj.set(tag.clone(), 1).unwrap_err(),
        VmError::UnsupportedKeyType("Symbol(tag)".to_string())
    );
    assert!(matches!(
        obj.define_property(tag, PropertyDescriptor::data(1.0)),
        Err(VmError::UnsupportedKeyType(_))
    ));
    assert_eq!(obj.own_keys().unwrap(), vec!["a"]);
}

#[test]
fn test_define_property() {
    let vm = vm();
    let obj = vm.eval("var target = {}; target").unwrap();
    let obj = obj.as_stand_in().unwrap();

    obj.define_property(
        "hidden",
        PropertyDescriptor::data("secret").writable(false),
    )
    .unwrap();
    obj.define_property(
        "shown",
        PropertyDescriptor::data(1.0).enumerable(true).writable(true),
    )
    .unwrap();

    assert_eq!(obj.own_keys().unwrap(), vec!["shown"]);
    assert_eq!(vm.eval("target.hidden").unwrap(), Value::from("secret"));
    vm.eval("target.hidden = 'changed'; target.shown = 2;").unwrap();
    assert_eq!(obj.get("hidden").unwrap(), Value::from("secret"));
    assert_eq!(obj.get("shown").unwrap(), Value::Number(2.0));

    assert_eq!(
        obj.define_property(
            "computed",
            PropertyDescriptor::accessor(Some(Value::Undefined), None)
        )
        .unwrap_err(),
        VmError::UnsupportedDescriptor
    );
    assert!(!obj.has("computed").unwrap());
}

#[test]
fn test_function_stand_ins_apply() {
    let vm = vm();
    let obj = vm
        .eval("var calc = { factor: 3, scale: function(x) { return this.factor * x; } }; calc")
        .unwrap();
    let calc = obj.as_stand_in().unwrap();
    let scale = calc.get("scale").unwrap();
    let scale = scale.as_stand_in().unwrap();
    assert!(scale.is_function());

    assert_eq!(
        scale.apply(&obj, &[Value::from(4)]).unwrap(),
        Value::Number(12.0)
    );

    let mut other = FxHashMap::default();
    other.insert("factor".to_string(), Value::from(10));
    assert_eq!(
        scale.apply(&Value::Map(other), &[Value::from(2)]).unwrap(),
        Value::Number(20.0)
    );
}

#[test]
fn test_apply_propagates_exceptions() {
    let vm = vm();
    let fail = vm
        .eval("(function(msg) { throw new TypeError(msg); })")
        .unwrap();
    let fail = fail.as_stand_in().unwrap();
    assert_eq!(
        fail.call(&[Value::from("nope")]).unwrap_err(),
        VmError::EngineException("TypeError: nope".to_string())
    );

    let not_callable = vm.eval("({})").unwrap();
    assert!(matches!(
        not_callable.as_stand_in().unwrap().call(&[]),
        Err(VmError::EngineException(text)) if text.starts_with("TypeError")
    ));
}

#[test]
fn test_apply_is_metered_with_default_limit() {
    init();
    let vm = create_vm(
        VmOptions::new()
            .with_memory_size(512 * 1024)
            .with_cycle_limit(3),
    )
    .unwrap();
    let spin = vm.eval("(() => { while (true) {} })").unwrap();
    assert!(matches!(
        spin.as_stand_in().unwrap().call(&[]),
        Err(VmError::CycleLimitExceeded { limit: 3, .. })
    ));
}

#[test]
fn test_functions_returned_from_calls() {
    let vm = vm();
    vm.eval("function adder(n) { return (x) => x + n; }").unwrap();
    let add5 = vm.call_function("adder", &[Value::from(5)]).unwrap();
    let add5 = add5.as_stand_in().unwrap();
    assert_eq!(add5.kind(), StandInKind::Function);
    assert_eq!(add5.call(&[Value::from(10)]).unwrap(), Value::Number(15.0));
}

mod failing_engine {
    use forkvm::engine::arena::ArenaEngine;
    use forkvm::engine::{
        Engine, EngineError, EngineFactory, EngineHandles, HandleId, InterruptHandler,
        PropertyFlags, ValueKind,
    };
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const MEMORY: usize = 256 * 1024;

    /// Shared switches and records for [`FlakyEngine`]
    #[derive(Default)]
    pub struct Faults {
        pub fail_is_array: AtomicBool,
        pub rejected: Mutex<Vec<HandleId>>,
        pub freed: Mutex<Vec<HandleId>>,
    }

    /// Arena engine whose `is_array` can be made to fail.
    pub struct FlakyEngine {
        inner: ArenaEngine,
        faults: Arc<Faults>,
    }

    pub struct FlakyFactory(pub Arc<Faults>);

    impl EngineFactory for FlakyFactory {
        fn create(&self) -> Result<Box<dyn Engine>, EngineError> {
            Ok(Box::new(FlakyEngine {
                inner: ArenaEngine::new(MEMORY),
                faults: self.0.clone(),
            }))
        }

        fn memory_size(&self) -> usize {
            MEMORY
        }
    }

    impl Engine for FlakyEngine {
        fn initialize(&mut self) -> Result<EngineHandles, EngineError> {
            self.inner.initialize()
        }
        fn attach(&mut self, handles: EngineHandles) -> Result<(), EngineError> {
            self.inner.attach(handles)
        }
        fn memory(&self) -> &[u8] {
            self.inner.memory()
        }
        fn memory_mut(&mut self) -> &mut [u8] {
            self.inner.memory_mut()
        }
        fn allocate(&mut self, size: usize) -> Result<u32, EngineError> {
            self.inner.allocate(size)
        }
        fn set_interrupt_handler(&mut self, handler: Option<InterruptHandler>) {
            self.inner.set_interrupt_handler(handler)
        }
        fn evaluate(&mut self, source: &str) -> Result<HandleId, EngineError> {
            self.inner.evaluate(source)
        }
        fn invoke(&mut self, name: &str, args: &[HandleId]) -> Result<HandleId, EngineError> {
            self.inner.invoke(name, args)
        }
        fn call(
            &mut self,
            func: HandleId,
            this: HandleId,
            args: &[HandleId],
        ) -> Result<HandleId, EngineError> {
            self.inner.call(func, this, args)
        }
        fn global(&mut self) -> Result<HandleId, EngineError> {
            self.inner.global()
        }
        fn type_of(&self, value: HandleId) -> Result<ValueKind, EngineError> {
            self.inner.type_of(value)
        }
        fn is_array(&self, value: HandleId) -> Result<bool, EngineError> {
            if self.faults.fail_is_array.load(Ordering::SeqCst) {
                self.faults.rejected.lock().push(value);
                return Err(EngineError::InvalidHandle(value));
            }
            self.inner.is_array(value)
        }
        fn strict_equals(&self, a: HandleId, b: HandleId) -> Result<bool, EngineError> {
            self.inner.strict_equals(a, b)
        }
        fn to_bool(&self, value: HandleId) -> Result<bool, EngineError> {
            self.inner.to_bool(value)
        }
        fn to_number(&self, value: HandleId) -> Result<f64, EngineError> {
            self.inner.to_number(value)
        }
        fn to_string(&self, value: HandleId) -> Result<String, EngineError> {
            self.inner.to_string(value)
        }
        fn new_undefined(&mut self) -> Result<HandleId, EngineError> {
            self.inner.new_undefined()
        }
        fn new_null(&mut self) -> Result<HandleId, EngineError> {
            self.inner.new_null()
        }
        fn new_bool(&mut self, value: bool) -> Result<HandleId, EngineError> {
            self.inner.new_bool(value)
        }
        fn new_number(&mut self, value: f64) -> Result<HandleId, EngineError> {
            self.inner.new_number(value)
        }
        fn new_string(&mut self, value: &str) -> Result<HandleId, EngineError> {
            self.inner.new_string(value)
        }
        fn new_object(&mut self) -> Result<HandleId, EngineError> {
            self.inner.new_object()
        }
        fn new_array(&mut self) -> Result<HandleId, EngineError> {
            self.inner.new_array()
        }
        fn get_property(&mut self, object: HandleId, key: &str) -> Result<HandleId, EngineError> {
            self.inner.get_property(object, key)
        }
        fn set_property(
            &mut self,
            object: HandleId,
            key: &str,
            value: HandleId,
        ) -> Result<(), EngineError> {
            self.inner.set_property(object, key, value)
        }
        fn has_property(&self, object: HandleId, key: &str) -> Result<bool, EngineError> {
            self.inner.has_property(object, key)
        }
        fn define_property(
            &mut self,
            object: HandleId,
            key: &str,
            value: HandleId,
            flags: PropertyFlags,
        ) -> Result<(), EngineError> {
            self.inner.define_property(object, key, value, flags)
        }
        fn own_keys(&self, object: HandleId) -> Result<Vec<String>, EngineError> {
            self.inner.own_keys(object)
        }
        fn dup(&mut self, value: HandleId) -> Result<HandleId, EngineError> {
            self.inner.dup(value)
        }
        fn free(&mut self, value: HandleId) -> Result<(), EngineError> {
            self.faults.freed.lock().push(value);
            self.inner.free(value)
        }
    }
}

#[test]
fn test_failed_object_conversion_releases_handle() {
    use failing_engine::{Faults, FlakyFactory};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    init();
    let faults = Arc::new(Faults::default());
    let vm = forkvm::create_vm_with_factory(VmOptions::new(), Arc::new(FlakyFactory(faults.clone())))
        .unwrap();

    faults.freed.lock().clear();
    faults.fail_is_array.store(true, Ordering::SeqCst);
    assert!(vm.eval("({ a: 1 })").is_err());
    faults.fail_is_array.store(false, Ordering::SeqCst);

    let rejected = faults.rejected.lock().clone();
    assert_eq!(rejected.len(), 1);
    assert!(faults.freed.lock().contains(&rejected[0]));

    // the vm keeps working and conversions succeed again
    assert_eq!(vm.eval("[1, 2].length").unwrap(), Value::Number(2.0));
}
