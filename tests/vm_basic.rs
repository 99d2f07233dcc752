// Integration tests for VM creation, evaluation, calls and disposal

use forkvm::{create_preloaded_vm, create_vm, Value, VmError, VmOptions};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small() -> VmOptions {
    VmOptions::new().with_memory_size(512 * 1024)
}

#[test]
fn test_eval_primitives() {
    init();
    let vm = create_vm(small()).expect("vm creation failed");

    assert_eq!(vm.eval("1 + 2").unwrap(), Value::Number(3.0));
    assert_eq!(vm.eval("'fork' + 'vm'").unwrap(), Value::from("forkvm"));
    assert_eq!(vm.eval("3 > 2 && !false").unwrap(), Value::Bool(true));
    assert_eq!(vm.eval("null").unwrap(), Value::Null);
    assert_eq!(vm.eval("undefined").unwrap(), Value::Undefined);
    assert_eq!(vm.eval("let nothing = 1;").unwrap(), Value::Undefined);
    assert!(vm.eval("0 / 0").unwrap().as_f64().unwrap().is_nan());
    assert_eq!(vm.eval("-1 / 0").unwrap(), Value::Number(f64::NEG_INFINITY));
}

#[test]
fn test_state_persists_between_evals() {
    init();
    let vm = create_vm(small()).unwrap();
    vm.eval("let counter = 0; function bump(by) { counter += by; return counter; }")
        .unwrap();
    vm.eval("bump(2)").unwrap();
    assert_eq!(vm.eval("bump(3)").unwrap(), Value::Number(5.0));
    assert_eq!(vm.eval("counter").unwrap(), Value::Number(5.0));
}

#[test]
fn test_call_function_marshals_arguments() {
    init();
    let vm = create_vm(small()).unwrap();
    vm.eval(
        "function describe(name, count, flag) { return name + ':' + count + ':' + flag; }
         function missing(a, b) { return typeof b; }",
    )
    .unwrap();

    let result = vm
        .call_function(
            "describe",
            &[Value::from("apples"), Value::from(3), Value::from(true)],
        )
        .unwrap();
    assert_eq!(result, Value::from("apples:3:true"));
    assert_eq!(
        vm.call_function("missing", &[Value::Null]).unwrap(),
        Value::from("undefined")
    );
}

#[test]
fn test_engine_exceptions_carry_text() {
    init();
    let vm = create_vm(small()).unwrap();
    assert_eq!(
        vm.eval("throw new RangeError('too far')").unwrap_err(),
        VmError::EngineException("RangeError: too far".to_string())
    );
    assert_eq!(
        vm.eval("nope + 1").unwrap_err(),
        VmError::EngineException("ReferenceError: nope is not defined".to_string())
    );
    assert_eq!(
        vm.call_function("notDefinedAnywhere", &[]).unwrap_err(),
        VmError::EngineException("TypeError: undefined is not a function".to_string())
    );
    match vm.eval("let = 5").unwrap_err() {
        VmError::EngineException(text) => assert!(text.starts_with("SyntaxError"), "{}", text),
        other => panic!("unexpected error {:?}", other),
    }
    // still usable
    assert_eq!(vm.eval("40 + 2").unwrap(), Value::Number(42.0));
}

#[test]
fn test_deeply_nested_source_is_rejected() {
    init();
    let vm = create_vm(small()).unwrap();

    for source in ["[".repeat(10_000), "(".repeat(10_000), "{".repeat(10_000)] {
        match vm.eval(&source) {
            Err(VmError::EngineException(text)) => {
                assert!(text.starts_with("SyntaxError: nesting too deep"), "{}", text)
            }
            other => panic!("expected a syntax error, got {:?}", other),
        }
    }

    let nested = format!("{}7{}", "[".repeat(24), "]".repeat(24));
    vm.eval(&format!("var nested = {};", nested)).unwrap();
    assert_eq!(
        vm.eval(&format!("nested{}", "[0]".repeat(24))).unwrap(),
        Value::Number(7.0)
    );
}

#[test]
fn test_recursion_through_nested_expressions_is_bounded() {
    init();
    let vm = create_vm(small()).unwrap();
    let wrap = 20;
    vm.eval(&format!(
        "function dig(n) {{ return n > 0 ? {}dig(n - 1){} : 0; }}",
        "[".repeat(wrap),
        "]".repeat(wrap)
    ))
    .unwrap();

    assert_eq!(
        vm.eval("dig(60)").unwrap_err(),
        VmError::EngineException("RangeError: Maximum call stack size exceeded".to_string())
    );
    assert_eq!(
        vm.eval("try { dig(60); 'no' } catch (e) { e.name }").unwrap(),
        Value::from("RangeError")
    );
    assert_eq!(vm.eval("dig(3).length").unwrap(), Value::Number(1.0));
}

#[test]
fn test_redeclaring_top_level_binding_fails() {
    init();
    let vm = create_vm(small()).unwrap();
    vm.eval("const answer = 42").unwrap();
    assert!(matches!(
        vm.eval("let answer = 1"),
        Err(VmError::EngineException(text)) if text.starts_with("SyntaxError")
    ));
    assert_eq!(vm.eval("answer").unwrap(), Value::Number(42.0));
}

#[test]
fn test_dispose_is_idempotent_and_final() {
    init();
    let vm = create_vm(small()).unwrap();
    let global = vm.global().unwrap();
    assert!(!vm.is_disposed());

    vm.dispose();
    vm.dispose();
    assert!(vm.is_disposed());

    assert_eq!(vm.eval("1").unwrap_err(), VmError::AlreadyDisposed);
    assert_eq!(
        vm.call_function("f", &[]).unwrap_err(),
        VmError::AlreadyDisposed
    );
    assert_eq!(vm.global().unwrap_err(), VmError::AlreadyDisposed);
    assert_eq!(global.get("x").unwrap_err(), VmError::AlreadyDisposed);
}

#[test]
fn test_stand_in_outliving_vm_reports_disposed() {
    init();
    let global = {
        let vm = create_vm(small()).unwrap();
        vm.global().unwrap()
    };
    assert_eq!(global.own_keys().unwrap_err(), VmError::AlreadyDisposed);
}

#[test]
fn test_preloaded_vm_runs_bootstrap() {
    init();
    let vm = create_preloaded_vm(
        "var greeting = 'hello'; function greet(who) { return greeting + ', ' + who; }",
        small(),
    )
    .unwrap();
    assert_eq!(
        vm.call_function("greet", &[Value::from("world")]).unwrap(),
        Value::from("hello, world")
    );
}

#[test]
fn test_preloaded_vm_bootstrap_failure() {
    init();
    let err = create_preloaded_vm("var ready = false; throw new Error('bad bootstrap')", small())
        .unwrap_err();
    assert_eq!(
        err,
        VmError::EngineException("Error: bad bootstrap".to_string())
    );
}

#[test]
fn test_options_are_reported() {
    let vm = create_vm(small().with_cycle_limit(50)).unwrap();
    let options = vm.options();
    assert_eq!(options.cycle_limit, Some(50));
    assert_eq!(options.memory_size, 512 * 1024);
    assert_eq!(vm.generation(), 0);
}

#[test]
fn test_options_deserialize_with_defaults() {
    let options: VmOptions = serde_json::from_str(r#"{ "cycle_limit": 10 }"#).unwrap();
    assert_eq!(options.cycle_limit, Some(10));
    assert_eq!(options.memory_size, VmOptions::default().memory_size);

    let json = serde_json::to_string(&VmOptions::new().with_memory_size(65536)).unwrap();
    let back: VmOptions = serde_json::from_str(&json).unwrap();
    assert_eq!(back.memory_size, 65536);
    assert_eq!(back.cycle_limit, None);
}

#[test]
fn test_short_lived_objects_are_reclaimed() {
    init();
    let vm = create_vm(small()).unwrap();

    let top_level = vm
        .eval("let sum = 0; for (let i = 0; i < 100000; i++) { let o = { x: i }; sum += o.x; } sum")
        .unwrap();
    assert_eq!(top_level, Value::Number(4999950000.0));

    vm.eval(
        "function churn(n) {
             let last = null;
             for (let i = 0; i < n; i++) { last = { x: i, tag: 'item' + i }; }
             return last.tag;
         }",
    )
    .unwrap();
    assert_eq!(vm.call_function("churn", &[Value::from(100000)]).unwrap(), Value::from("item99999"));

    // a long-lived vm keeps working across many evaluations
    vm.eval("var kept = [];").unwrap();
    for round in 0..50 {
        vm.eval(&format!("kept.push({{ round: {} }}); for (var j = 0; j < 2000; j++) {{ var t = [j]; }}", round))
            .unwrap();
    }
    assert_eq!(vm.eval("kept.length + kept[49].round").unwrap(), Value::Number(99.0));
}
