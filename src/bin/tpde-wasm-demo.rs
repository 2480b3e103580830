//! Demo driver: lowers a small built-in module and prints the IR, the
//! x86-64 frame glue and the session statistics.
//!
//! ```text
//! tpde-wasm-demo --emit all -vv
//! RUST_LOG=tpde_wasm=trace tpde-wasm-demo --emit ir
//! ```

use bumpalo::Bump;
use clap::{ArgAction, Parser, ValueEnum};
use log::LevelFilter;

use tpde_wasm::core::{Architecture, CompileResult, RegisterFile};
use tpde_wasm::ir::{Function, InstKind, Module};
use tpde_wasm::wasm::{
    BlockType, FuncBody, FuncType, Import, ImportKind, Instruction, Literal, NumOp, RelOp,
    ValType, WasmModule,
};
use tpde_wasm::x64::{registers::reg_name, X64Encoder};
use tpde_wasm::{wasm_to_ir, CompilationSession, LowerOptions, X86_64};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// The lowered IR module.
    Ir,
    /// Frames, call glue and encoded sizes.
    Frame,
    All,
}

#[derive(Parser, Debug)]
#[command(name = "tpde-wasm-demo", version, about = "Lower a sample wasm module and show the x86-64 glue")]
struct Args {
    #[arg(long, value_enum, default_value_t = Emit::All)]
    emit: Emit,

    /// Skip IR verification after lowering.
    #[arg(long)]
    no_verify: bool,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn sample_module() -> WasmModule {
    use Instruction::*;

    let mut m = WasmModule::default();
    let print_ty = m.add_type(FuncType::new(&[ValType::I32], &[]));
    let binary_ty = m.add_type(FuncType::new(&[ValType::I32, ValType::I32], &[ValType::I32]));
    let unary_ty = m.add_type(FuncType::new(&[ValType::I32], &[ValType::I32]));
    let main_ty = m.add_type(FuncType::new(&[], &[]));

    m.imports.push(Import {
        module: "env".into(),
        name: "print".into(),
        kind: ImportKind::Function(print_ty),
    });

    let max = m.add_function("max", FuncBody {
        type_index: binary_ty,
        locals: Vec::new(),
        body: vec![
            LocalGet(0),
            LocalGet(1),
            Compare(ValType::I32, RelOp::Gt),
            If(BlockType::Value(ValType::I32)),
            LocalGet(0),
            Else,
            LocalGet(1),
            End,
            End,
        ],
    });

    let sum = m.add_function("sum", FuncBody {
        type_index: unary_ty,
        locals: vec![ValType::I32],
        body: vec![
            Block(BlockType::Empty),
            Loop(BlockType::Empty),
            LocalGet(0),
            Eqz(ValType::I32),
            BrIf(1),
            LocalGet(1),
            LocalGet(0),
            Binary(ValType::I32, NumOp::Add),
            LocalSet(1),
            LocalGet(0),
            Const(Literal::I32(1)),
            Binary(ValType::I32, NumOp::Sub),
            LocalSet(0),
            Br(0),
            End,
            End,
            LocalGet(1),
            End,
        ],
    });

    m.add_function("main", FuncBody {
        type_index: main_ty,
        locals: Vec::new(),
        body: vec![
            Const(Literal::I32(7)),
            Const(Literal::I32(3)),
            Call(max),
            Call(sum),
            Call(0),
            End,
        ],
    });
    m
}

/// Frame, caller-save brackets and encoded code for one lowered function.
///
/// Values stay in their argument registers; every call result is given the
/// next free register of its class so later calls have something to save.
fn emit_frame(arch: &X86_64, encoder: &mut X64Encoder, func: &Function) -> CompileResult<()> {
    let params: Vec<_> = func.params.iter().filter_map(|&p| func.ty(p)).collect();
    let mut frame = arch.new_frame(&func.name, &params, func.ret_type)?;
    let mut regs = RegisterFile::new();
    for (&param, &loc) in func.params.iter().zip(&frame.arg_locs) {
        regs.allocate_fixed(loc, param)?;
    }

    let mut body = Vec::new();
    for &block in func.blocks() {
        for &site in &func.block(block).insts {
            let InstKind::Call(vcall) = &func.value(site).kind else {
                continue;
            };
            let dest = match vcall.ret_type {
                Some(ty) => Some(arch.determine_rv_location(ty)?.0),
                None => None,
            };
            regs.record_call(&mut frame, site, dest);
            body.extend(arch.make_call(&frame, site, vcall, dest)?);
            if let Some(class) = vcall.ret_type.and_then(|ty| arch.register_class_for(ty)) {
                regs.allocate(class, site)?;
            }
        }
    }
    regs.commit(&mut frame);

    let code = arch.gen_function(&frame, body)?;
    let args: Vec<_> = frame
        .arg_locs
        .iter()
        .map(|&r| reg_name(r).unwrap_or("?"))
        .collect();
    println!(
        "{}: args [{}] rv {}",
        frame.name,
        args.join(", "),
        frame.rv.and_then(reg_name).unwrap_or("-")
    );
    for inst in &code {
        match inst {
            tpde_wasm::x64::X64Inst::Label(_) => println!("{inst}"),
            _ => println!("    {inst}"),
        }
    }
    encoder.encode(&code)?;
    Ok(())
}

fn run(args: &Args) -> CompileResult<()> {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let arch = X86_64::new();
    let options = LowerOptions {
        verify: !args.no_verify,
        dump_ir: args.verbose > 0,
    };

    let module: Module = wasm_to_ir(&sample_module(), &arch, &session, &options)?;

    if matches!(args.emit, Emit::Ir | Emit::All) {
        print!("{module}");
    }
    if matches!(args.emit, Emit::Frame | Emit::All) {
        let mut encoder = X64Encoder::new(0x1000)?;
        for (i, ext) in module.externals.iter().enumerate() {
            encoder.define_symbol(ext.name.clone(), 0x10_0000 + 0x100 * i as u64);
        }
        for func in &module.functions {
            emit_frame(&arch, &mut encoder, func)?;
        }
        let code = encoder.finalize()?;
        println!("encoded {} bytes", code.len());
    }

    println!("{}", session.stats());
    Ok(())
}

fn main() {
    let args = Args::parse();
    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if let Err(err) = run(&args) {
        log::error!("{err}");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
