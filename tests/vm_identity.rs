// Integration tests for stand-in identity and handle round trips

use forkvm::{create_vm, ForkOptions, Value, VmError, VmOptions};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn options() -> VmOptions {
    VmOptions::new().with_memory_size(512 * 1024)
}

#[test]
fn test_separate_reads_are_distinct_but_consistent() {
    init();
    let vm = create_vm(options()).unwrap();
    vm.eval("const shared = { count: 1 };").unwrap();

    let first = vm.eval("shared").unwrap();
    let second = vm.eval("shared").unwrap();
    assert_ne!(first, second);

    let first = first.as_stand_in().unwrap().clone();
    let second = second.as_stand_in().unwrap().clone();
    first.set("count", 7).unwrap();
    assert_eq!(second.get("count").unwrap(), Value::Number(7.0));
    assert_eq!(vm.eval("shared.count").unwrap(), Value::Number(7.0));
}

#[test]
fn test_global_reads_are_distinct() {
    init();
    let vm = create_vm(options()).unwrap();
    vm.eval("var config = { mode: 'fast' };").unwrap();
    let global = vm.global().unwrap();
    let a = global.get("config").unwrap();
    let b = global.get("config").unwrap();
    assert_ne!(a, b);
    assert_eq!(
        a.as_stand_in().unwrap().get("mode").unwrap(),
        b.as_stand_in().unwrap().get("mode").unwrap()
    );
    assert_ne!(vm.global().unwrap(), global);
}

#[test]
fn test_clones_share_identity() {
    init();
    let vm = create_vm(options()).unwrap();
    let obj = vm.eval("({ a: 1 })").unwrap();
    let copy = obj.clone();
    assert_eq!(obj, copy);
}

#[test]
fn test_stand_in_round_trips_with_identity() {
    init();
    let vm = create_vm(options()).unwrap();
    vm.eval(
        "const registry = { id: 'r' };
         function same(x, y) { return x === y; }
         function isRegistry(x) { return x === registry; }
         function identity(x) { return x; }",
    )
    .unwrap();

    let a = vm.eval("registry").unwrap();
    let b = vm.eval("registry").unwrap();
    assert_eq!(
        vm.call_function("same", &[a.clone(), b.clone()]).unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        vm.call_function("isRegistry", &[a.clone()]).unwrap(),
        Value::Bool(true)
    );

    // a host map is converted, not passed by identity
    assert_eq!(
        vm.call_function("isRegistry", &[Value::Map(Default::default())])
            .unwrap(),
        Value::Bool(false)
    );

    let echoed = vm.call_function("identity", &[a.clone()]).unwrap();
    assert_ne!(echoed, a);
    assert_eq!(
        echoed.as_stand_in().unwrap().get("id").unwrap(),
        Value::from("r")
    );
}

#[test]
fn test_foreign_stand_in_is_rejected() {
    init();
    let one = create_vm(options()).unwrap();
    let two = create_vm(options()).unwrap();
    two.eval("function identity(x) { return x; }").unwrap();

    let foreign = one.eval("({ from: 'one' })").unwrap();
    assert!(matches!(
        two.call_function("identity", &[foreign]),
        Err(VmError::UnsupportedArgumentType(_))
    ));
}

#[tokio::test]
async fn test_parent_stand_in_is_foreign_to_child() {
    init();
    let parent = create_vm(options()).unwrap();
    parent
        .eval("const box = { v: 1 }; function identity(x) { return x; }")
        .unwrap();
    let in_parent = parent.eval("box").unwrap();

    let child = parent.fork(ForkOptions::default()).await.unwrap();
    assert!(matches!(
        child.call_function("identity", &[in_parent.clone()]),
        Err(VmError::UnsupportedArgumentType(_))
    ));

    // writes through the parent's stand-in stay in the parent
    in_parent.as_stand_in().unwrap().set("v", 2).unwrap();
    assert_eq!(child.eval("box.v").unwrap(), Value::Number(1.0));
    assert_eq!(parent.eval("box.v").unwrap(), Value::Number(2.0));
}

#[test]
fn test_dropped_stand_ins_release_handles() {
    init();
    let vm = create_vm(options()).unwrap();
    vm.eval("const big = { n: 0 };").unwrap();
    // every read makes a new handle; dropping each must free it again
    for _ in 0..10_000 {
        let value = vm.eval("big").unwrap();
        drop(value);
    }
    assert_eq!(vm.eval("big.n").unwrap(), Value::Number(0.0));
}
