// Integration tests for per-call cycle budgets and metrics

use forkvm::{create_vm, CallOptions, Value, VmError, VmOptions};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn options() -> VmOptions {
    VmOptions::new().with_memory_size(512 * 1024)
}

#[test]
fn test_metrics_are_deterministic() {
    init();
    let vm = create_vm(options()).unwrap();
    let first = vm
        .eval_with_metrics("1+2", CallOptions::default())
        .unwrap();
    assert_eq!(first.value, Value::Number(3.0));
    assert_eq!(first.cycles, 1);

    for _ in 0..5 {
        let again = vm
            .eval_with_metrics("1+2", CallOptions::default())
            .unwrap();
        assert_eq!(again.cycles, first.cycles);
    }
}

#[test]
fn test_cycles_grow_with_work() {
    init();
    let vm = create_vm(options()).unwrap();
    let short = vm
        .eval_with_metrics("for (let i = 0; i < 100; i++) {}", CallOptions::default())
        .unwrap();
    let long = vm
        .eval_with_metrics("for (let i = 0; i < 10000; i++) {}", CallOptions::default())
        .unwrap();
    assert_eq!(short.cycles, 1);
    assert_eq!(long.cycles, 3);
}

#[test]
fn test_call_function_metrics() {
    init();
    let vm = create_vm(options()).unwrap();
    vm.eval("function spin(n) { let s = 0; for (let i = 0; i < n; i++) { s += i; } return s; }")
        .unwrap();
    let result = vm
        .call_function_with_metrics("spin", &[Value::from(5000)], CallOptions::default())
        .unwrap();
    assert_eq!(result.value, Value::Number(12497500.0));
    assert_eq!(result.cycles, 2);
}

#[test]
fn test_unbounded_loop_hits_limit() {
    init();
    let vm = create_vm(options()).unwrap();
    let err = vm
        .eval_with("while (true) {}", CallOptions::with_cycle_limit(5))
        .unwrap_err();
    assert_eq!(err, VmError::CycleLimitExceeded { limit: 5, cycles: 6 });
}

#[test]
fn test_same_program_succeeds_without_limit() {
    init();
    let vm = create_vm(options()).unwrap();
    let program = "var steps = 0; while (steps < 50000) { steps++; } steps";
    assert!(matches!(
        vm.eval_with(program, CallOptions::with_cycle_limit(3)),
        Err(VmError::CycleLimitExceeded { .. })
    ));
    assert_eq!(vm.eval(program).unwrap(), Value::Number(50000.0));
}

#[test]
fn test_default_limit_applies_to_every_call() {
    init();
    let vm = create_vm(options().with_cycle_limit(4)).unwrap();
    assert!(matches!(
        vm.eval("while (true) {}"),
        Err(VmError::CycleLimitExceeded { limit: 4, .. })
    ));
    vm.eval("function forever() { while (true) {} }").unwrap();
    assert!(matches!(
        vm.call_function("forever", &[]),
        Err(VmError::CycleLimitExceeded { limit: 4, .. })
    ));
    // per-call override wins over the default
    let done = vm
        .eval_with(
            "var k = 0; while (k < 40000) { k++; } k",
            CallOptions::with_cycle_limit(1000),
        )
        .unwrap();
    assert_eq!(done, Value::Number(40000.0));
}

#[test]
fn test_per_call_limit_does_not_persist() {
    init();
    let vm = create_vm(options()).unwrap();
    assert!(vm
        .eval_with("while (true) {}", CallOptions::with_cycle_limit(1))
        .is_err());
    assert_eq!(
        vm.eval("var j = 0; while (j < 20000) { j++; } j").unwrap(),
        Value::Number(20000.0)
    );
}

#[test]
fn test_zero_limit_fails_every_call() {
    init();
    let vm = create_vm(options()).unwrap();
    assert_eq!(
        vm.eval_with("1", CallOptions::with_cycle_limit(0)).unwrap_err(),
        VmError::CycleLimitExceeded { limit: 0, cycles: 1 }
    );
}

#[test]
fn test_side_effects_before_limit_are_kept() {
    init();
    let vm = create_vm(options()).unwrap();
    vm.eval("var progress = 0;").unwrap();
    assert!(vm
        .eval_with(
            "while (true) { progress = progress + 1; }",
            CallOptions::with_cycle_limit(2)
        )
        .is_err());
    assert_eq!(vm.eval("progress > 4000").unwrap(), Value::Bool(true));
}

#[test]
fn test_interrupt_is_not_catchable_by_guest() {
    init();
    let vm = create_vm(options()).unwrap();
    let err = vm
        .eval_with(
            "var caught = false; try { while (true) {} } catch (e) { caught = true; } finally { caught = 'finally'; }",
            CallOptions::with_cycle_limit(2),
        )
        .unwrap_err();
    assert!(matches!(err, VmError::CycleLimitExceeded { .. }));
    assert_eq!(vm.eval("caught").unwrap(), Value::Bool(false));
}

#[test]
fn test_unbounded_call_lifts_default_limit() {
    init();
    let vm = create_vm(options().with_cycle_limit(1)).unwrap();
    let program = "var n = 0; while (n < 30000) { n++; } n";
    assert!(matches!(
        vm.eval(program),
        Err(VmError::CycleLimitExceeded { limit: 1, .. })
    ));
    let run = vm
        .eval_with_metrics(program, CallOptions::unbounded())
        .unwrap();
    assert_eq!(run.value, Value::Number(30000.0));
    assert!(run.cycles >= 7);

    // the default applies again on the next plain call
    assert!(vm.eval(program).is_err());
}
