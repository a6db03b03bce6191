//! Calls, returns, closure capture and lexical super scopes.

use quill::{BufferedIo, HostValue, Opcode, Script, ScriptBuilder, Vm, VmError};

fn run(script: &Script) -> (Result<HostValue, VmError>, String) {
    let mut io = BufferedIo::new("");
    let result = {
        let mut vm = Vm::new(&mut io);
        let result = vm.run(script);
        assert_eq!(vm.live_heap_objects(), 0, "heap not empty after run");
        result
    };
    (result, io.into_output())
}

fn run_value(script: &Script) -> HostValue {
    run(script).0.expect("script failed")
}

fn run_err(script: &Script) -> String {
    run(script).0.expect_err("script unexpectedly succeeded").to_string()
}

#[test]
fn closure_reads_and_writes_its_captured_scope() {
    let mut b = ScriptBuilder::new();
    let skip = b.emit_jump(Opcode::Jump);

    // Closure body: print the captured `a`, set it to 2, return it.
    let entry = b.offset();
    b.emit_str(Opcode::LoadSuper, "a");
    b.emit(Opcode::Dup);
    b.emit(Opcode::Out);
    b.push_bint(2);
    b.emit_str(Opcode::StoreSuper, "a");
    b.emit(Opcode::Return);

    b.patch_jump(skip);
    b.push_bint(1);
    b.emit_str(Opcode::Store, "a");
    b.emit_u8(Opcode::PushClosure, u8::try_from(entry).unwrap());
    b.emit_u8(Opcode::Call, 0);
    b.emit(Opcode::Pop);
    b.emit_str(Opcode::Load, "a");
    b.emit(Opcode::Dup);
    b.emit(Opcode::Out);
    b.emit(Opcode::Return);

    let (result, output) = run(&b.build());
    assert_eq!(result.unwrap(), HostValue::Int(2));
    assert_eq!(output, "1\n2\n");
}

#[test]
fn arguments_are_read_with_push_arg() {
    let mut b = ScriptBuilder::new();
    let skip = b.emit_jump(Opcode::Jump);

    let entry = b.offset();
    b.emit_u8(Opcode::PushArg, 0);
    b.emit_u8(Opcode::PushArg, 1);
    b.emit(Opcode::Add);
    b.emit(Opcode::Return);

    b.patch_jump(skip);
    b.emit_u8(Opcode::PushClosure, u8::try_from(entry).unwrap());
    b.push_bint(4);
    b.push_bint(5);
    b.emit_u8(Opcode::Call, 2);
    b.emit(Opcode::Return);

    assert_eq!(run_value(&b.build()), HostValue::Int(9));
}

#[test]
fn out_of_range_argument_is_nil() {
    let mut b = ScriptBuilder::new();
    let skip = b.emit_jump(Opcode::Jump);

    let entry = b.offset();
    b.emit_u8(Opcode::PushArg, 5);
    b.emit(Opcode::Return);

    b.patch_jump(skip);
    b.emit_u8(Opcode::PushClosure, u8::try_from(entry).unwrap());
    b.push_bint(1);
    b.emit_u8(Opcode::Call, 1);
    b.emit(Opcode::Return);

    assert_eq!(run_value(&b.build()), HostValue::Nil);
}

#[test]
fn push_arg_outside_a_call_is_nil() {
    let mut b = ScriptBuilder::new();
    b.emit_u8(Opcode::PushArg, 0);
    b.emit(Opcode::Return);
    assert_eq!(run_value(&b.build()), HostValue::Nil);
}

#[test]
fn push_super_reaches_the_captured_bindings() {
    let mut b = ScriptBuilder::new();
    let skip = b.emit_jump(Opcode::Jump);

    // Closure body: read `a` through the level-0 super bindings object.
    let entry = b.offset();
    b.emit_u8(Opcode::PushSuper, 0);
    b.emit_str(Opcode::LoadField, "a");
    b.emit(Opcode::Return);

    b.patch_jump(skip);
    b.push_bint(7);
    b.emit_str(Opcode::Store, "a");
    b.emit_u8(Opcode::PushClosure, u8::try_from(entry).unwrap());
    b.emit_u8(Opcode::Call, 0);
    b.emit(Opcode::Return);

    assert_eq!(run_value(&b.build()), HostValue::Int(7));
}

#[test]
fn super_chain_shorter_than_requested_level_fails() {
    let mut b = ScriptBuilder::new();
    b.emit_u8(Opcode::PushSuper, 0);
    b.emit(Opcode::Return);
    assert_eq!(
        run_err(&b.build()),
        "Trying to get level 0 super closure which does not exist"
    );

    let mut b = ScriptBuilder::new();
    b.emit_str(Opcode::LoadSuper, "a");
    b.emit(Opcode::Return);
    assert_eq!(
        run_err(&b.build()),
        "Trying to get level 0 super closure which does not exist"
    );
}

#[test]
fn closure_equality_is_by_identity() {
    let mut b = ScriptBuilder::new();
    b.emit_u8(Opcode::PushClosure, 0);
    b.emit(Opcode::Dup);
    b.emit(Opcode::CmpEq);
    b.emit(Opcode::Return);
    assert_eq!(run_value(&b.build()), HostValue::Bool(true));

    let mut b = ScriptBuilder::new();
    b.emit_u8(Opcode::PushClosure, 0);
    b.emit_u8(Opcode::PushClosure, 0);
    b.emit(Opcode::CmpEq);
    b.emit(Opcode::Return);
    assert_eq!(run_value(&b.build()), HostValue::Bool(false));
}

#[test]
fn captured_state_survives_garbage_collection_between_calls() {
    // A counter closure bumps `n` in its captured scope; the GC that runs
    // on every return must keep the scope and the closure alive.
    let mut b = ScriptBuilder::new();
    let skip = b.emit_jump(Opcode::Jump);

    let entry = b.offset();
    b.emit_str(Opcode::LoadSuper, "n");
    b.push_bint(1);
    b.emit(Opcode::Add);
    b.emit_str(Opcode::StoreSuper, "n");
    b.push_bint(0);
    b.emit(Opcode::Return);

    b.patch_jump(skip);
    b.push_bint(0);
    b.emit_str(Opcode::Store, "n");
    b.emit_u8(Opcode::PushClosure, u8::try_from(entry).unwrap());
    b.emit_str(Opcode::Store, "f");
    for _ in 0..2 {
        b.emit_str(Opcode::Load, "f");
        b.emit_u8(Opcode::Call, 0);
        b.emit(Opcode::Pop);
    }
    b.emit_str(Opcode::Load, "n");
    b.emit(Opcode::Return);

    assert_eq!(run_value(&b.build()), HostValue::Int(2));
}

#[test]
fn recursive_closure_sums_down_to_zero() {
    // f(n) = n + f(n - 1) for n > 0, else 0; f resolves through the
    // captured scope of the frame that defined it.
    let mut b = ScriptBuilder::new();
    let skip = b.emit_jump(Opcode::Jump);

    let entry = b.offset();
    b.emit_u8(Opcode::PushArg, 0);
    b.push_bint(0);
    b.emit(Opcode::CmpGt);
    let to_base = b.emit_jump(Opcode::JumpUnless);
    b.emit_u8(Opcode::PushArg, 0);
    b.emit_str(Opcode::LoadSuper, "f");
    b.emit_u8(Opcode::PushArg, 0);
    b.push_bint(1);
    b.emit(Opcode::Sub);
    b.emit_u8(Opcode::Call, 1);
    b.emit(Opcode::Add);
    b.emit(Opcode::Return);
    b.patch_jump(to_base);
    b.push_bint(0);
    b.emit(Opcode::Return);

    b.patch_jump(skip);
    b.emit_u8(Opcode::PushClosure, u8::try_from(entry).unwrap());
    b.emit_str(Opcode::Store, "f");
    b.emit_str(Opcode::Load, "f");
    b.push_bint(3);
    b.emit_u8(Opcode::Call, 1);
    b.emit(Opcode::Return);

    assert_eq!(run_value(&b.build()), HostValue::Int(6));
}

#[test]
fn closures_stored_in_objects_stay_callable() {
    let mut b = ScriptBuilder::new();
    let skip = b.emit_jump(Opcode::Jump);

    let entry = b.offset();
    b.push_bint(42);
    b.emit(Opcode::Return);

    b.patch_jump(skip);
    b.emit_str(Opcode::LoadLib, "G");
    b.emit_u8(Opcode::PushClosure, u8::try_from(entry).unwrap());
    b.emit_str(Opcode::StoreField, "f");
    b.emit_str(Opcode::LoadLib, "G");
    b.emit_str(Opcode::LoadField, "f");
    b.emit_u8(Opcode::Call, 0);
    b.emit(Opcode::Return);

    assert_eq!(run_value(&b.build()), HostValue::Int(42));
}

#[test]
fn calling_a_non_closure_fails() {
    let mut b = ScriptBuilder::new();
    b.push_bint(1);
    b.emit_u8(Opcode::Call, 0);
    b.emit(Opcode::Return);
    assert_eq!(run_err(&b.build()), "Invalid type int, closure expected");
}

#[test]
fn return_requires_exactly_one_value_above_the_frame_base() {
    let mut b = ScriptBuilder::new();
    b.push_bint(1);
    b.push_bint(2);
    b.emit(Opcode::Return);
    assert_eq!(run_err(&b.build()), "Incorrect stack top position");

    let mut b = ScriptBuilder::new();
    b.emit(Opcode::Return);
    assert_eq!(run_err(&b.build()), "Incorrect stack top position");
}

#[test]
fn nested_closures_walk_two_super_levels() {
    // outer stores a=5, builds inner closure inside a called closure;
    // the innermost reads `a` two scopes up with PUSH_SUPER 1.
    let mut b = ScriptBuilder::new();
    let skip = b.emit_jump(Opcode::Jump);

    // Innermost body.
    let inner_entry = b.offset();
    b.emit_u8(Opcode::PushSuper, 1);
    b.emit_str(Opcode::LoadField, "a");
    b.emit(Opcode::Return);

    // Middle body: build the innermost closure (capturing this frame's
    // scope) and call it.
    let middle_entry = b.offset();
    b.emit_u8(Opcode::PushClosure, u8::try_from(inner_entry).unwrap());
    b.emit_u8(Opcode::Call, 0);
    b.emit(Opcode::Return);

    b.patch_jump(skip);
    b.push_bint(5);
    b.emit_str(Opcode::Store, "a");
    b.emit_u8(Opcode::PushClosure, u8::try_from(middle_entry).unwrap());
    b.emit_u8(Opcode::Call, 0);
    b.emit(Opcode::Return);

    assert_eq!(run_value(&b.build()), HostValue::Int(5));
}
