//! x86-64 System V glue: argument and return locations, caller-save
//! brackets around calls, prologue/epilogue and the literal pool.

use tpde_wasm::core::{Architecture, CompileError, Frame, PoolValue, RegisterFile, VCall};
use tpde_wasm::ir::{Type, Value};
use tpde_wasm::x64::registers::*;
use tpde_wasm::x64::{X64Encoder, X64Inst};
use tpde_wasm::X86_64;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn vcall(name: &str, ret_type: Option<Type>) -> VCall {
    VCall {
        function_name: name.into(),
        args: Vec::new(),
        ret_type,
    }
}

/// Frame whose call site `site` has `live` registers allocated, in order.
fn frame_with_live(live: &[tpde_wasm::core::AsmReg], site: Value) -> Frame {
    let arch = X86_64;
    let mut frame = arch.new_frame("caller", &[], None).unwrap();
    let mut regs = RegisterFile::new();
    for (i, &reg) in live.iter().enumerate() {
        regs.allocate_fixed(reg, Value(100 + i as u32)).unwrap();
    }
    regs.record_call(&mut frame, site, None);
    regs.commit(&mut frame);
    frame
}

#[test]
fn test_minimal_prologue_and_epilogue() {
    init();
    let arch = X86_64;
    let frame = arch.new_frame("leaf", &[Type::I32], Some(Type::I32)).unwrap();

    let prologue = arch.prologue(&frame);
    assert_eq!(
        prologue,
        vec![
            X64Inst::Label("leaf".into()),
            X64Inst::Push(RBP),
            X64Inst::Mov { dst: RBP, src: RSP },
        ]
    );
    let epilogue = arch.epilogue(&frame).unwrap();
    assert_eq!(epilogue, vec![X64Inst::Pop(RBP), X64Inst::Ret]);

    let text: Vec<String> = prologue.iter().chain(&epilogue).map(|i| i.to_string()).collect();
    assert_eq!(text, vec!["leaf:", "push rbp", "mov rbp, rsp", "pop rbp", "ret"]);
}

#[test]
fn test_call_without_live_registers() {
    init();
    let site = Value(7);
    let frame = frame_with_live(&[], site);
    let code = X86_64.make_call(&frame, site, &vcall("g", None), None).unwrap();
    assert_eq!(code, vec![X64Inst::Call("g".into())]);
}

#[test]
fn test_call_with_one_live_register() {
    init();
    let site = Value(7);
    let frame = frame_with_live(&[R10], site);
    let code = X86_64.make_call(&frame, site, &vcall("g", None), None).unwrap();
    assert_eq!(
        code,
        vec![X64Inst::Push(R10), X64Inst::Call("g".into()), X64Inst::Pop(R10)]
    );
}

#[test]
fn test_call_restores_in_reverse_order() {
    init();
    let site = Value(7);
    let frame = frame_with_live(&[RBX, R8, R11], site);
    let code = X86_64.make_call(&frame, site, &vcall("g", None), None).unwrap();
    assert_eq!(
        code,
        vec![
            X64Inst::Push(RBX),
            X64Inst::Push(R8),
            X64Inst::Push(R11),
            X64Inst::Call("g".into()),
            X64Inst::Pop(R11),
            X64Inst::Pop(R8),
            X64Inst::Pop(RBX),
        ]
    );

    // Other call sites see nothing live.
    let other = X86_64.make_call(&frame, Value(8), &vcall("g", None), None).unwrap();
    assert_eq!(other, vec![X64Inst::Call("g".into())]);
}

#[test]
fn test_call_destination_is_not_saved() {
    init();
    let arch = X86_64;
    let site = Value(3);
    let mut frame = arch.new_frame("caller", &[], Some(Type::I64)).unwrap();
    let mut regs = RegisterFile::new();
    let class = arch.register_class_for(Type::I64).unwrap();
    let kept = regs.allocate(class, Value(1)).unwrap();
    regs.allocate_fixed(RAX, site).unwrap();

    let (dest, _) = arch.determine_rv_location(Type::I64).unwrap();
    regs.record_call(&mut frame, site, Some(dest));
    let code = arch
        .make_call(&frame, site, &vcall("h", Some(Type::I64)), Some(dest))
        .unwrap();
    assert_eq!(
        code,
        vec![X64Inst::Push(kept), X64Inst::Call("h".into()), X64Inst::Pop(kept)]
    );
}

#[test]
fn test_live_xmm_across_call_is_unsupported() {
    init();
    let site = Value(1);
    let frame = frame_with_live(&[RBX, xmm(3)], site);
    let err = X86_64.make_call(&frame, site, &vcall("g", None), None).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedConstruct { .. }));
}

#[test]
fn test_argument_and_return_locations() {
    init();
    let arch = X86_64;
    let (locs, live_in) = arch
        .determine_arg_locations(&[Type::I64, Type::F64, Type::Ptr, Type::F32, Type::I32])
        .unwrap();
    assert_eq!(locs, vec![RDI, xmm(0), RSI, xmm(1), RDX]);
    assert!(live_in.contains(RBP));
    assert_eq!(live_in.len(), 6);

    assert_eq!(arch.determine_rv_location(Type::F64).unwrap().0, XMM0);
    assert_eq!(arch.determine_rv_location(Type::I32).unwrap().0, RAX);

    // Procedures only keep the frame pointer live on exit.
    let frame = arch.new_frame("p", &[], None).unwrap();
    assert_eq!(frame.rv, None);
    assert!(frame.live_out.contains(RBP));
    assert_eq!(frame.live_out.len(), 1);

    let err = arch.determine_arg_locations(&[Type::I32; 7]).unwrap_err();
    assert!(matches!(err, CompileError::ConventionOverflow { .. }));
}

#[test]
fn test_fill_arguments_skips_registers_already_in_place() {
    init();
    let mut live = tpde_wasm::core::RegBitSet::new();
    let code = X86_64
        .gen_fill_arguments(&[Type::I32, Type::I32], &[RDI, RBX], &mut live)
        .unwrap();
    assert_eq!(code, vec![X64Inst::Mov { dst: RSI, src: RBX }]);

    let err = X86_64
        .gen_fill_arguments(&[Type::I32], &[RDI, RSI], &mut live)
        .unwrap_err();
    assert!(matches!(err, CompileError::InternalInvariant { .. }));
}

#[test]
fn test_full_frame_with_callee_saves_and_stack() {
    init();
    let arch = X86_64;
    let mut frame = arch.new_frame("big", &[Type::I64], Some(Type::I64)).unwrap();
    let mut regs = RegisterFile::new();
    regs.allocate_fixed(R12, Value(1)).unwrap();
    regs.allocate_fixed(RBX, Value(2)).unwrap();
    regs.allocate_fixed(R10, Value(3)).unwrap();
    regs.commit(&mut frame);
    frame.set_stack_size(48);

    let code = arch
        .gen_function(&frame, vec![X64Inst::Mov { dst: RAX, src: RDI }])
        .unwrap();
    let text: Vec<String> = code.iter().map(|i| i.to_string()).collect();
    assert_eq!(
        text,
        vec![
            "big:",
            "push rbp",
            "push rbx",
            "push r12",
            "sub rsp, 48",
            "mov rbp, rsp",
            "mov rax, rdi",
            "add rsp, 48",
            "pop r12",
            "pop rbx",
            "pop rbp",
            "ret",
        ]
    );
}

#[test]
fn test_literal_pool_follows_return() {
    init();
    let arch = X86_64;
    let mut frame = arch.new_frame("lit", &[], None).unwrap();
    let label = frame.add_constant(PoolValue::Bytes(vec![0x2a, 0x00]));
    assert_eq!(label, "lit_literal_0");

    let epilogue = arch.epilogue(&frame).unwrap();
    assert_eq!(
        epilogue,
        vec![
            X64Inst::Pop(RBP),
            X64Inst::Ret,
            X64Inst::Label("lit_literal_0".into()),
            X64Inst::Db(0x2a),
            X64Inst::Db(0x00),
        ]
    );

    frame.add_constant(PoolValue::Float(1.5));
    let err = arch.epilogue(&frame).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedConstruct { .. }));
    assert!(err.to_string().contains("float"), "{err}");
}

#[test]
fn test_encoded_function_calls_external_symbol() {
    init();
    let arch = X86_64;
    let site = Value(5);
    let frame = frame_with_live(&[RBX], site);
    let body = arch.make_call(&frame, site, &vcall("puts", None), None).unwrap();
    let code = arch.gen_function(&frame, body).unwrap();

    let mut encoder = X64Encoder::new(0x40_0000).unwrap();
    encoder.define_symbol("puts", 0x40_1000);
    encoder.encode(&code).unwrap();
    let bytes = encoder.finalize().unwrap();

    // push rbp; push rbx; mov rbp, rsp
    assert_eq!(&bytes[..5], &[0x55, 0x53, 0x48, 0x89, 0xe5]);
    // ...; pop rbx; pop rbp; ret
    assert_eq!(&bytes[bytes.len() - 3..], &[0x5b, 0x5d, 0xc3]);
}

#[test]
fn test_register_file_exhaustion() {
    init();
    let class = X86_64.register_class_for(Type::I8).unwrap();
    assert_eq!(class.name, "reg8");
    let mut regs = RegisterFile::new();
    regs.allocate(class, Value(0)).unwrap();
    regs.allocate(class, Value(1)).unwrap();
    let err: CompileError = regs.allocate(class, Value(2)).unwrap_err().into();
    assert!(matches!(err, CompileError::RegisterAllocation(_)));
}
