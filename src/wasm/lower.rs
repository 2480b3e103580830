// This module implements the structured control flow lowering engine: it turns the nested,
// stack-machine bytecode of a decoded WebAssembly module into IR functions made of basic blocks,
// explicit jumps and phi nodes. Each function is translated with two arena-allocated stacks. The
// operand stack holds in-flight values and, transiently, comparisons that have not been turned
// into a value because only the next if or br_if consumes them. The scope stack holds one entry
// per open block, loop, if or else region with its continuation block, the restart block of a
// loop, an optional pending phi for the region result and the operand stack height at region
// entry. Branches by nesting depth resolve against that stack: a branch to a loop restarts it,
// a branch to anything else leaves the region and feeds the region phi. Code after br and return
// is emitted into fresh blocks nothing jumps to; those blocks emit no edges of their own and are
// pruned once the function is complete. Signatures of defined functions and call targets are
// checked against the target calling convention, so argument overflow is reported here rather
// than during code generation.

//! WebAssembly to IR lowering.

use bumpalo::collections::Vec as BumpVec;
use hashbrown::HashMap;

use super::{
    BlockType, ExportKind, FuncBody, FuncType, ImportKind, Instruction, Literal, NumOp, RelOp,
    ValType, WasmModule,
};
use crate::core::arch::{Architecture, VCall};
use crate::core::error::{CompileError, CompileResult};
use crate::core::session::CompilationSession;
use crate::ir::{
    verify_function, BinOp, Block, Builder, CmpCond, ConstValue, ExternalFunction, GlobalId,
    GlobalVar, InstKind, Module, Type, UnOp, Value,
};

/// Lowering configuration.
#[derive(Debug, Clone)]
pub struct LowerOptions {
    /// Run the IR verifier on every finished function.
    pub verify: bool,
    /// Log every finished function at debug level.
    pub dump_ir: bool,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            verify: true,
            dump_ir: false,
        }
    }
}

/// Lower a decoded module for `arch`.
pub fn wasm_to_ir<A: Architecture>(
    module: &WasmModule,
    arch: &A,
    session: &CompilationSession<'_>,
    options: &LowerOptions,
) -> CompileResult<Module> {
    WasmToIrCompiler::new(arch, session, options.clone()).generate(module)
}

/// Operand stack entry.
#[derive(Debug, Clone, Copy)]
enum StackEntry {
    Value(Value),
    /// Comparison waiting for the branch that consumes it.
    Compare { lhs: Value, cond: CmpCond, rhs: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Block,
    Loop,
    If,
    Else,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    continuation: Block,
    /// Loop header, the target of branches to a loop.
    restart: Option<Block>,
    /// Index into the pending phi arena.
    phi: Option<usize>,
    /// Operand stack height when the region was entered.
    height: usize,
    /// The region was opened in live code. Regions opened after a `br` or
    /// `return` stay dead up to their `end`, whatever edges they contain.
    entered_reachable: bool,
    /// Blocks of a then-branch that branched out of the `if`. Their target is
    /// the else entry until an `else` moves them to the real continuation.
    breaks: Vec<Block>,
}

#[derive(Debug)]
struct PendingPhi {
    ty: Type,
    incoming: Vec<(Block, Value)>,
}

struct FunctionState<'arena> {
    stack: BumpVec<'arena, StackEntry>,
    scopes: BumpVec<'arena, Scope>,
    phis: BumpVec<'arena, PendingPhi>,
    /// Slot type and address per local index (parameters first).
    locals: Vec<(Type, Value)>,
    ret_type: Option<Type>,
    /// The active block has no predecessors.
    unreachable: bool,
    /// A top-level `end` closed the body.
    ended: bool,
}

/// Translates the functions of one decoded module into an IR module.
pub struct WasmToIrCompiler<'a, 'arena, A: Architecture> {
    arch: &'a A,
    session: &'a CompilationSession<'arena>,
    options: LowerOptions,
    builder: Builder,
    types: Vec<FuncType>,
    /// Signature per function index.
    function_space: Vec<FuncType>,
    function_names: HashMap<u32, String>,
    globals: Vec<(Type, bool, GlobalId)>,
    blocknr: usize,
}

impl<'a, 'arena, A: Architecture> WasmToIrCompiler<'a, 'arena, A> {
    pub fn new(arch: &'a A, session: &'a CompilationSession<'arena>, options: LowerOptions) -> Self {
        Self {
            arch,
            session,
            options,
            builder: Builder::new("mainmodule"),
            types: Vec::new(),
            function_space: Vec::new(),
            function_names: HashMap::new(),
            globals: Vec::new(),
            blocknr: 0,
        }
    }

    pub fn generate(mut self, module: &WasmModule) -> CompileResult<Module> {
        self.types = module.types.clone();

        for import in &module.imports {
            let ImportKind::Function(type_index) = import.kind else {
                return Err(CompileError::unsupported(format!(
                    "import of kind {} ({}.{})",
                    import.kind.name(),
                    import.module,
                    import.name
                )));
            };
            let sig = self.signature(type_index)?.clone();
            let index = self.function_space.len() as u32;
            self.function_names.insert(index, import.name.clone());
            self.builder.module_mut().externals.push(ExternalFunction {
                name: import.name.clone(),
                params: sig.params.iter().map(|p| p.ir_type()).collect(),
                ret_type: single_result(&sig)?,
            });
            self.function_space.push(sig);
        }

        for export in &module.exports {
            match export.kind {
                ExportKind::Function(index) => {
                    self.function_names.insert(index, export.name.clone());
                }
                _ => log::debug!("ignoring non-function export {}", export.name),
            }
        }

        for (i, global) in module.globals.iter().enumerate() {
            let ty = global.ty.ir_type();
            let init = global.init.val_type();
            let compatible = init == global.ty
                || (global.ty == ValType::Ptr && matches!(global.init, Literal::I64(_)));
            if !compatible {
                return Err(CompileError::TypeMismatch {
                    expected: ty,
                    found: init.ir_type(),
                    context: "global initializer",
                });
            }
            let id = self.builder.add_global(GlobalVar {
                name: format!("global{i}"),
                size: ty.size(),
                align: ty.size(),
                value: global.init.to_le_bytes(),
            });
            self.globals.push((ty, global.mutable, id));
        }

        let mut functions = Vec::with_capacity(module.functions.len());
        for body in &module.functions {
            let sig = self.signature(body.type_index)?.clone();
            let index = self.function_space.len() as u32;
            let name = self
                .function_names
                .entry(index)
                .or_insert_with(|| format!("unnamed{index}"))
                .clone();
            self.function_space.push(sig.clone());
            functions.push((name, sig, body));
        }

        for (name, sig, body) in functions {
            self.generate_function(&name, &sig, body)?;
        }

        self.builder.finish()
    }

    fn signature(&self, type_index: u32) -> CompileResult<&FuncType> {
        self.types.get(type_index as usize).ok_or_else(|| {
            CompileError::malformed(format!("type index {type_index} out of range"))
        })
    }

    fn new_block(&mut self) -> CompileResult<Block> {
        self.blocknr += 1;
        log::debug!("creating block {}", self.blocknr);
        let name = format!("{}_block{}", self.builder.function()?.name, self.blocknr);
        self.session.record_block_created();
        self.builder.new_block(name)
    }

    fn emit(&mut self, name: &str, ty: Option<Type>, kind: InstKind) -> CompileResult<Value> {
        self.builder.emit(name, ty, kind)
    }

    fn value_type(&self, value: Value) -> CompileResult<Type> {
        self.builder
            .ty(value)?
            .ok_or_else(|| CompileError::invariant(format!("{value} has no type")))
    }

    fn generate_function(&mut self, name: &str, sig: &FuncType, body: &FuncBody) -> CompileResult<()> {
        log::debug!("Generating wasm function {} {}", name, sig);
        let ret_type = single_result(sig)?;
        let param_types: Vec<Type> = sig.params.iter().map(|p| p.ir_type()).collect();
        self.arch.check_signature(name, &param_types)?;

        match ret_type {
            Some(ty) => self.builder.new_function(name, ty)?,
            None => self.builder.new_procedure(name)?,
        }
        let entry = self.new_block()?;
        self.builder.set_block(entry);

        let arena = self.session.arena();
        let mut st = FunctionState {
            stack: BumpVec::new_in(arena),
            scopes: BumpVec::new_in(arena),
            phis: BumpVec::new_in(arena),
            locals: Vec::with_capacity(sig.params.len() + body.locals.len()),
            ret_type,
            unreachable: false,
            ended: false,
        };

        // Parameters come first in the local index space.
        for (i, &ty) in param_types.iter().enumerate() {
            let param = self.builder.function_mut()?.add_param(format!("param{i}"), ty);
            let addr = self.alloc_local(i, ty)?;
            self.emit("", None, InstKind::Store { value: param, addr })?;
            st.locals.push((ty, addr));
        }
        for (i, local) in body.locals.iter().enumerate() {
            let ty = local.ir_type();
            let addr = self.alloc_local(st.locals.len(), ty)?;
            let zero = self.emit("zero", Some(ty), InstKind::Const(zero_of(ty)))?;
            self.emit("", None, InstKind::Store { value: zero, addr })?;
            st.locals.push((ty, addr));
            log::trace!("declared local {} of {}", sig.params.len() + i, name);
        }

        let num = body.body.len();
        for (nr, instruction) in body.body.iter().enumerate() {
            let opcode = instruction.opcode();
            log::trace!("{}/{} {}", nr + 1, num, opcode);
            if st.ended {
                return Err(CompileError::malformed(format!(
                    "{opcode} after the end of {name}"
                )));
            }
            self.session.record_instruction_lowered(&opcode);
            self.generate_instruction(&mut st, instruction, &opcode)?;
        }

        if !st.scopes.is_empty() {
            return Err(CompileError::malformed(format!(
                "{} regions still open at the end of {name}",
                st.scopes.len()
            )));
        }

        // Add terminating instruction.
        if !self.builder.is_closed()? {
            if st.unreachable {
                self.emit("", None, InstKind::Exit)?;
            } else {
                self.emit_return(&mut st, "end")?;
            }
        }
        if !st.stack.is_empty() {
            log::warn!("{name}: {} operands left on the stack", st.stack.len());
        }

        let options = self.options.clone();
        let session = self.session;
        let function = self.builder.function_mut()?;
        let pruned = function.delete_unreachable();
        session.record_blocks_pruned(pruned);
        if options.dump_ir {
            log::debug!("{}", function);
        }
        if options.verify {
            verify_function(function)?;
        }
        let function = self.builder.finish_function()?;
        session.record_function_lowered(&function.name, function.blocks().len());
        Ok(())
    }

    fn alloc_local(&mut self, index: usize, ty: Type) -> CompileResult<Value> {
        let size = ty.size();
        self.emit(
            &format!("local{index}"),
            Some(Type::Ptr),
            InstKind::Alloc { size, align: size },
        )
    }

    fn generate_instruction(
        &mut self,
        st: &mut FunctionState<'arena>,
        instruction: &Instruction,
        opcode: &str,
    ) -> CompileResult<()> {
        match instruction {
            Instruction::Binary(vt, op) => {
                let ty = vt.ir_type();
                let op = binop(*vt, *op).ok_or_else(|| {
                    CompileError::unsupported(format!("opcode {opcode}"))
                })?;
                let rhs = self.pop_typed(st, opcode, ty, "binary operand")?;
                let lhs = self.pop_typed(st, opcode, ty, "binary operand")?;
                let name = opcode.rsplit('.').next().unwrap_or(opcode);
                let value = self.emit(name, Some(ty), InstKind::Binop { op, lhs, rhs })?;
                st.stack.push(StackEntry::Value(value));
            }

            Instruction::Compare(vt, op) => {
                let ty = vt.ir_type();
                if vt.is_float() && op.is_unsigned() {
                    return Err(CompileError::unsupported(format!("opcode {opcode}")));
                }
                let rhs = self.pop_typed(st, opcode, ty, "comparison operand")?;
                let lhs = self.pop_typed(st, opcode, ty, "comparison operand")?;
                st.stack.push(StackEntry::Compare {
                    lhs,
                    cond: cmp_cond(*op),
                    rhs,
                });
            }

            Instruction::Eqz(vt) => {
                let ty = vt.ir_type();
                let operand = self.pop_typed(st, opcode, ty, "comparison operand")?;
                let zero = self.emit("zero", Some(ty), InstKind::Const(zero_of(ty)))?;
                st.stack.push(StackEntry::Compare {
                    lhs: operand,
                    cond: CmpCond::Eq,
                    rhs: zero,
                });
            }

            Instruction::Neg(vt) if vt.is_float() => {
                let ty = vt.ir_type();
                let operand = self.pop_typed(st, opcode, ty, "neg operand")?;
                let value = self.emit("neg", Some(ty), InstKind::Unop { op: UnOp::Neg, operand })?;
                st.stack.push(StackEntry::Value(value));
            }

            Instruction::Floor(vt) if vt.is_float() => {
                let ty = vt.ir_type();
                let operand = self.pop_typed(st, opcode, ty, "floor operand")?;
                let int = self.emit("floor_cast_1", Some(Type::I64), InstKind::Cast { operand })?;
                let value = self.emit("floor_cast_2", Some(ty), InstKind::Cast { operand: int })?;
                st.stack.push(StackEntry::Value(value));
            }

            Instruction::Const(lit) => {
                let ty = lit.val_type().ir_type();
                let value = self.emit("const", Some(ty), InstKind::Const(const_of(*lit)))?;
                st.stack.push(StackEntry::Value(value));
            }

            Instruction::LocalGet(index) => {
                let (ty, addr) = local(st, *index)?;
                let value = self.emit("getlocal", Some(ty), InstKind::Load { addr })?;
                st.stack.push(StackEntry::Value(value));
            }

            Instruction::LocalSet(index) | Instruction::LocalTee(index) => {
                let (ty, addr) = local(st, *index)?;
                let value = self.pop_typed(st, opcode, ty, "local.set")?;
                self.emit("", None, InstKind::Store { value, addr })?;
                if matches!(instruction, Instruction::LocalTee(_)) {
                    st.stack.push(StackEntry::Value(value));
                }
            }

            Instruction::GlobalGet(index) => {
                let (ty, _, id) = self.global(*index)?;
                let addr = self.emit("global_addr", Some(Type::Ptr), InstKind::GlobalAddr(id))?;
                let value = self.emit("get_global", Some(ty), InstKind::Load { addr })?;
                st.stack.push(StackEntry::Value(value));
            }

            Instruction::GlobalSet(index) => {
                let (ty, mutable, id) = self.global(*index)?;
                if !mutable {
                    return Err(CompileError::malformed(format!(
                        "global.set of immutable global {index}"
                    )));
                }
                let value = self.pop_typed(st, opcode, ty, "global.set")?;
                let addr = self.emit("global_addr", Some(Type::Ptr), InstKind::GlobalAddr(id))?;
                self.emit("", None, InstKind::Store { value, addr })?;
            }

            Instruction::Load { ty, offset, .. } => {
                let base = self.pop_typed(st, opcode, Type::Ptr, "load address")?;
                let addr = self.effective_address(base, *offset)?;
                let value = self.emit("load", Some(ty.ir_type()), InstKind::Load { addr })?;
                st.stack.push(StackEntry::Value(value));
            }

            Instruction::Store { ty, offset, .. } => {
                let value = self.pop_typed(st, opcode, ty.ir_type(), "store value")?;
                let base = self.pop_typed(st, opcode, Type::Ptr, "store address")?;
                let addr = self.effective_address(base, *offset)?;
                self.emit("", None, InstKind::Store { value, addr })?;
            }

            Instruction::Block(bt) | Instruction::Loop(bt) => {
                let is_loop = matches!(instruction, Instruction::Loop(_));
                let phi = self.get_phi(st, *bt)?;
                let inner = self.new_block()?;
                let continuation = self.new_block()?;
                self.emit("", None, InstKind::Jump { target: inner })?;
                self.builder.set_block(inner);
                st.scopes.push(Scope {
                    kind: if is_loop { ScopeKind::Loop } else { ScopeKind::Block },
                    continuation,
                    restart: is_loop.then_some(inner),
                    phi,
                    height: st.stack.len(),
                    entered_reachable: !st.unreachable,
                    breaks: Vec::new(),
                });
            }

            Instruction::If(bt) => {
                let (lhs, cond, rhs) = self.pop_condition(st, opcode)?;
                let then_block = self.new_block()?;
                let continuation = self.new_block()?;
                self.emit("", None, InstKind::CJump {
                    lhs,
                    cond,
                    rhs,
                    yes: then_block,
                    no: continuation,
                })?;
                self.builder.set_block(then_block);
                let phi = self.get_phi(st, *bt)?;
                st.scopes.push(Scope {
                    kind: ScopeKind::If,
                    continuation,
                    restart: None,
                    phi,
                    height: st.stack.len(),
                    entered_reachable: !st.unreachable,
                    breaks: Vec::new(),
                });
            }

            Instruction::Else => {
                let scope = st
                    .scopes
                    .pop()
                    .ok_or_else(|| CompileError::malformed("else outside of any region"))?;
                if scope.kind != ScopeKind::If {
                    return Err(CompileError::malformed("else without matching if"));
                }
                let else_block = scope.continuation;
                let continuation = self.new_block()?;
                self.close_region(st, &scope, continuation)?;
                for &from in &scope.breaks {
                    self.builder
                        .function_mut()?
                        .retarget(from, else_block, continuation)?;
                }
                self.builder.set_block(else_block);
                st.unreachable = !scope.entered_reachable
                    || self.builder.function()?.predecessors(else_block).is_empty();
                st.scopes.push(Scope {
                    kind: ScopeKind::Else,
                    continuation,
                    restart: None,
                    phi: scope.phi,
                    height: scope.height,
                    entered_reachable: scope.entered_reachable,
                    breaks: Vec::new(),
                });
            }

            Instruction::End => {
                let Some(scope) = st.scopes.pop() else {
                    st.ended = true;
                    return Ok(());
                };
                if scope.kind == ScopeKind::If && scope.phi.is_some() {
                    return Err(CompileError::unsupported("if with a result but no else"));
                }
                let continuation = scope.continuation;
                self.close_region(st, &scope, continuation)?;
                self.builder.set_block(continuation);
                st.unreachable = !scope.entered_reachable
                    || self.builder.function()?.predecessors(continuation).is_empty();
                if let Some(phi) = scope.phi {
                    self.materialize_phi(st, phi)?;
                }
            }

            Instruction::Br(depth) => {
                if st.unreachable {
                    return Ok(());
                }
                match self.branch_target(st, *depth, opcode)? {
                    None => self.emit_return(st, opcode)?,
                    Some(target) => {
                        self.emit("", None, InstKind::Jump { target })?;
                    }
                }
                self.enter_dead_block(st)?;
            }

            Instruction::BrIf(depth) => {
                let (lhs, cond, rhs) = self.pop_condition(st, opcode)?;
                if st.unreachable {
                    return Ok(());
                }
                let target = self.branch_target(st, *depth, opcode)?;
                let taken = match target {
                    Some(target) => target,
                    None => self.new_block()?,
                };
                let fallthrough = self.new_block()?;
                self.emit("", None, InstKind::CJump {
                    lhs,
                    cond,
                    rhs,
                    yes: taken,
                    no: fallthrough,
                })?;
                if target.is_none() {
                    // Conditional exit from the function body.
                    self.builder.set_block(taken);
                    self.emit_return_keep(st, opcode)?;
                }
                self.builder.set_block(fallthrough);
            }

            Instruction::Call(index) => self.generate_call(st, *index, opcode)?,

            Instruction::Return => {
                if st.unreachable {
                    return Ok(());
                }
                self.emit_return(st, opcode)?;
                self.enter_dead_block(st)?;
            }

            Instruction::Drop => {
                self.pop_entry(st, opcode)?;
            }

            Instruction::Nop => {}

            _ => return Err(CompileError::unsupported(format!("opcode {opcode}"))),
        }
        Ok(())
    }

    /// Base plus immediate offset, as a pointer.
    fn effective_address(&mut self, base: Value, offset: u32) -> CompileResult<Value> {
        let offset = self.emit(
            "offset",
            Some(Type::Ptr),
            InstKind::Const(ConstValue::Int(i64::from(offset))),
        )?;
        self.emit("address", Some(Type::Ptr), InstKind::Binop {
            op: BinOp::Add,
            lhs: base,
            rhs: offset,
        })
    }

    fn global(&self, index: u32) -> CompileResult<(Type, bool, GlobalId)> {
        self.globals
            .get(index as usize)
            .copied()
            .ok_or_else(|| CompileError::malformed(format!("global index {index} out of range")))
    }

    fn get_phi(&self, st: &mut FunctionState<'arena>, bt: BlockType) -> CompileResult<Option<usize>> {
        match bt {
            BlockType::Empty => Ok(None),
            BlockType::Value(vt) => {
                st.phis.push(PendingPhi {
                    ty: vt.ir_type(),
                    incoming: Vec::new(),
                });
                Ok(Some(st.phis.len() - 1))
            }
            BlockType::TypeIndex(index) => Err(CompileError::unsupported(format!(
                "block type with signature index {index}"
            ))),
        }
    }

    /// Record `value` as the phi input from the active block.
    fn fill_phi(&self, st: &mut FunctionState<'arena>, phi: usize, value: Value) -> CompileResult<()> {
        let block = self.builder.block()?;
        let found = self.value_type(value)?;
        let pending = &mut st.phis[phi];
        if found != pending.ty {
            return Err(CompileError::TypeMismatch {
                expected: pending.ty,
                found,
                context: "block result",
            });
        }
        pending.incoming.push((block, value));
        Ok(())
    }

    /// Leave the active region for `continuation` at `else` or `end`.
    fn close_region(
        &mut self,
        st: &mut FunctionState<'arena>,
        scope: &Scope,
        continuation: Block,
    ) -> CompileResult<()> {
        if st.unreachable {
            // Nothing reaches this block; it is pruned later.
            st.stack.truncate(scope.height.min(st.stack.len()));
            self.emit("", None, InstKind::Exit)?;
            return Ok(());
        }
        if let Some(phi) = scope.phi {
            let above = st.stack.len().saturating_sub(scope.height);
            if above != 1 {
                return Err(CompileError::invariant(format!(
                    "{above} operands above the region base when closing a result region, expected 1"
                )));
            }
            let value = match st.stack.pop() {
                Some(StackEntry::Value(value)) => value,
                _ => {
                    return Err(CompileError::unsupported(
                        "comparison result used as a region result",
                    ))
                }
            };
            self.fill_phi(st, phi, value)?;
        }
        st.stack.truncate(scope.height.min(st.stack.len()));
        self.emit("", None, InstKind::Jump {
            target: continuation,
        })?;
        Ok(())
    }

    /// Emit the phi collected for a closed region at the top of the active
    /// block and push its value.
    fn materialize_phi(&mut self, st: &mut FunctionState<'arena>, phi: usize) -> CompileResult<()> {
        let ty = st.phis[phi].ty;
        let incoming = std::mem::take(&mut st.phis[phi].incoming);
        let value = if incoming.is_empty() {
            // No path reaches the continuation; keep the stack shape for the
            // dead code that follows.
            self.emit("undef", Some(ty), InstKind::Const(zero_of(ty)))?
        } else {
            self.session.record_phi_created();
            self.emit("block_result", Some(ty), InstKind::Phi { incoming })?
        };
        st.stack.push(StackEntry::Value(value));
        Ok(())
    }

    /// Resolve a branch by nesting depth. Returns `None` for a branch to the
    /// function body itself, which behaves like `return`.
    fn branch_target(
        &mut self,
        st: &mut FunctionState<'arena>,
        depth: u32,
        opcode: &str,
    ) -> CompileResult<Option<Block>> {
        let depth = depth as usize;
        if depth == st.scopes.len() {
            return Ok(None);
        }
        let index = st
            .scopes
            .len()
            .checked_sub(depth + 1)
            .ok_or_else(|| CompileError::malformed(format!("{opcode} depth {depth} exceeds nesting")))?;

        let block = self.builder.block()?;
        let scope = &mut st.scopes[index];
        if let Some(restart) = scope.restart {
            return Ok(Some(restart));
        }
        let target = scope.continuation;
        if scope.kind == ScopeKind::If {
            scope.breaks.push(block);
        }
        if let Some(phi) = scope.phi {
            let value = self.peek_value(st, opcode)?;
            self.fill_phi(st, phi, value)?;
        }
        Ok(Some(target))
    }

    /// Continue in a fresh block nothing jumps to. Operands of the region
    /// are dropped; dead code that needs more gets placeholders.
    fn enter_dead_block(&mut self, st: &mut FunctionState<'arena>) -> CompileResult<()> {
        let dead = self.new_block()?;
        self.builder.set_block(dead);
        let floor = stack_floor(st);
        st.stack.truncate(floor);
        st.unreachable = true;
        Ok(())
    }

    /// Stand-in for an operand popped past the region base in dead code.
    fn dead_operand(&mut self, ty: Type) -> CompileResult<Value> {
        self.emit("undef", Some(ty), InstKind::Const(zero_of(ty)))
    }

    /// Return the top of the stack without popping it; the fallthrough of a
    /// conditional return still sees the value.
    fn emit_return_keep(&mut self, st: &FunctionState<'arena>, opcode: &str) -> CompileResult<()> {
        match st.ret_type {
            None => {
                self.emit("", None, InstKind::Exit)?;
            }
            Some(expected) => {
                let value = self.peek_value(st, opcode)?;
                let found = self.value_type(value)?;
                if found != expected {
                    return Err(CompileError::TypeMismatch {
                        expected,
                        found,
                        context: "return",
                    });
                }
                self.emit("", None, InstKind::Return { value })?;
            }
        }
        Ok(())
    }

    fn emit_return(&mut self, st: &mut FunctionState<'arena>, opcode: &str) -> CompileResult<()> {
        match st.ret_type {
            None => {
                self.emit("", None, InstKind::Exit)?;
            }
            Some(ty) => {
                let value = self.pop_typed(st, opcode, ty, "return")?;
                self.emit("", None, InstKind::Return { value })?;
            }
        }
        Ok(())
    }

    fn generate_call(
        &mut self,
        st: &mut FunctionState<'arena>,
        index: u32,
        opcode: &str,
    ) -> CompileResult<()> {
        let sig = self
            .function_space
            .get(index as usize)
            .cloned()
            .ok_or_else(|| CompileError::malformed(format!("function index {index} out of range")))?;
        let name = self
            .function_names
            .get(&index)
            .cloned()
            .ok_or_else(|| CompileError::invariant(format!("function {index} has no name")))?;

        let param_types: Vec<Type> = sig.params.iter().map(|p| p.ir_type()).collect();
        self.arch.check_signature(&name, &param_types)?;
        let ret_type = single_result(&sig)?;

        let mut args = Vec::with_capacity(param_types.len());
        for &ty in param_types.iter().rev() {
            args.push(self.pop_typed(st, opcode, ty, "call argument")?);
        }
        args.reverse();

        let vcall = VCall {
            function_name: name.clone(),
            args,
            ret_type,
        };
        let value = self.emit("call", ret_type, InstKind::Call(vcall))?;
        self.session.record_call_lowered(&name);
        if ret_type.is_some() {
            st.stack.push(StackEntry::Value(value));
        }
        Ok(())
    }

    fn pop_entry(&mut self, st: &mut FunctionState<'arena>, opcode: &str) -> CompileResult<StackEntry> {
        if st.stack.len() <= stack_floor(st) {
            if st.unreachable {
                return Ok(StackEntry::Value(self.dead_operand(Type::I32)?));
            }
            return Err(CompileError::malformed(format!(
                "operand stack underflow at {opcode}"
            )));
        }
        st.stack
            .pop()
            .ok_or_else(|| CompileError::malformed(format!("operand stack underflow at {opcode}")))
    }

    fn peek_value(&self, st: &FunctionState<'arena>, opcode: &str) -> CompileResult<Value> {
        let floor = stack_floor(st);
        match st.stack.last() {
            Some(StackEntry::Value(value)) if st.stack.len() > floor => Ok(*value),
            Some(StackEntry::Compare { .. }) => Err(CompileError::unsupported(format!(
                "comparison result consumed by {opcode}"
            ))),
            _ => Err(CompileError::malformed(format!(
                "operand stack underflow at {opcode}"
            ))),
        }
    }

    fn pop_value(&mut self, st: &mut FunctionState<'arena>, opcode: &str) -> CompileResult<Value> {
        match self.pop_entry(st, opcode)? {
            StackEntry::Value(value) => Ok(value),
            StackEntry::Compare { .. } => Err(CompileError::unsupported(format!(
                "comparison result consumed by {opcode}"
            ))),
        }
    }

    fn pop_typed(
        &mut self,
        st: &mut FunctionState<'arena>,
        opcode: &str,
        expected: Type,
        context: &'static str,
    ) -> CompileResult<Value> {
        if st.unreachable && st.stack.len() <= stack_floor(st) {
            return self.dead_operand(expected);
        }
        let value = self.pop_value(st, opcode)?;
        let found = self.value_type(value)?;
        if found != expected {
            return Err(CompileError::TypeMismatch {
                expected,
                found,
                context,
            });
        }
        Ok(value)
    }

    /// Branch condition: a pending comparison, or an integer tested against zero.
    fn pop_condition(
        &mut self,
        st: &mut FunctionState<'arena>,
        opcode: &str,
    ) -> CompileResult<(Value, CmpCond, Value)> {
        match self.pop_entry(st, opcode)? {
            StackEntry::Compare { lhs, cond, rhs } => Ok((lhs, cond, rhs)),
            StackEntry::Value(value) => {
                let ty = self.value_type(value)?;
                if !matches!(ty, Type::I32 | Type::I64) {
                    return Err(CompileError::TypeMismatch {
                        expected: Type::I32,
                        found: ty,
                        context: "branch condition",
                    });
                }
                let zero = self.emit("zero", Some(ty), InstKind::Const(zero_of(ty)))?;
                Ok((value, CmpCond::Ne, zero))
            }
        }
    }
}

/// Lowest operand stack height the innermost region may pop to.
fn stack_floor(st: &FunctionState<'_>) -> usize {
    st.scopes.last().map_or(0, |s| s.height)
}

fn local(st: &FunctionState<'_>, index: u32) -> CompileResult<(Type, Value)> {
    st.locals
        .get(index as usize)
        .copied()
        .ok_or_else(|| CompileError::malformed(format!("local index {index} out of range")))
}

fn single_result(sig: &FuncType) -> CompileResult<Option<Type>> {
    match sig.results.as_slice() {
        [] => Ok(None),
        [ty] => Ok(Some(ty.ir_type())),
        many => Err(CompileError::unsupported(format!(
            "{} return values",
            many.len()
        ))),
    }
}

fn binop(ty: ValType, op: NumOp) -> Option<BinOp> {
    let op = match op {
        NumOp::Add => BinOp::Add,
        NumOp::Sub => BinOp::Sub,
        NumOp::Mul => BinOp::Mul,
        NumOp::Div => BinOp::Div,
        NumOp::DivU => BinOp::DivU,
        NumOp::Rem => BinOp::Rem,
        NumOp::RemU => BinOp::RemU,
        NumOp::And => BinOp::And,
        NumOp::Or => BinOp::Or,
        NumOp::Xor => BinOp::Xor,
        NumOp::Shl => BinOp::Shl,
        NumOp::Shr => BinOp::Shr,
        NumOp::ShrU => BinOp::ShrU,
    };
    if ty == ValType::Ptr || (ty.is_float() && !op.allows_float()) {
        return None;
    }
    Some(op)
}

fn cmp_cond(op: RelOp) -> CmpCond {
    match op {
        RelOp::Eq => CmpCond::Eq,
        RelOp::Ne => CmpCond::Ne,
        RelOp::Lt => CmpCond::Lt,
        RelOp::LtU => CmpCond::LtU,
        RelOp::Gt => CmpCond::Gt,
        RelOp::GtU => CmpCond::GtU,
        RelOp::Le => CmpCond::Le,
        RelOp::LeU => CmpCond::LeU,
        RelOp::Ge => CmpCond::Ge,
        RelOp::GeU => CmpCond::GeU,
    }
}

fn const_of(lit: Literal) -> ConstValue {
    match lit {
        Literal::I32(v) => ConstValue::Int(i64::from(v)),
        Literal::I64(v) => ConstValue::Int(v),
        Literal::F32(v) => ConstValue::Float(f64::from(v)),
        Literal::F64(v) => ConstValue::Float(v),
    }
}

fn zero_of(ty: Type) -> ConstValue {
    if ty.is_float() {
        ConstValue::Float(0.0)
    } else {
        ConstValue::Int(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x64::X86_64;
    use bumpalo::Bump;

    fn lower(module: &WasmModule) -> CompileResult<Module> {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        wasm_to_ir(module, &X86_64, &session, &LowerOptions::default())
    }

    fn single(params: &[ValType], results: &[ValType], locals: &[ValType], body: Vec<Instruction>) -> WasmModule {
        let mut m = WasmModule::default();
        let ty = m.add_type(FuncType::new(params, results));
        m.add_function("f", FuncBody {
            type_index: ty,
            locals: locals.to_vec(),
            body,
        });
        m
    }

    #[test]
    fn test_gt_s_lowers_to_greater_than() {
        use Instruction::*;
        let m = single(&[ValType::I32, ValType::I32], &[], &[], vec![
            LocalGet(0),
            LocalGet(1),
            Compare(ValType::I32, RelOp::Gt),
            If(BlockType::Empty),
            End,
            End,
        ]);
        let module = lower(&m).unwrap();
        let f = module.function("f").unwrap();
        let entry = f.entry().unwrap();
        match f.terminator(entry) {
            Some(InstKind::CJump { cond, .. }) => assert_eq!(*cond, CmpCond::Gt),
            other => panic!("unexpected terminator {other:?}"),
        }
    }

    #[test]
    fn test_declared_locals_start_at_zero() {
        use Instruction::*;
        let m = single(&[], &[ValType::I64], &[ValType::I64], vec![LocalGet(0), End]);
        let module = lower(&m).unwrap();
        let text = module.function("f").unwrap().to_string();
        assert!(text.contains("const 0 ; zero"), "{text}");
    }

    #[test]
    fn test_local_tee_keeps_value() {
        use Instruction::*;
        let m = single(&[ValType::I32], &[ValType::I32], &[ValType::I32], vec![
            LocalGet(0),
            LocalTee(1),
            End,
        ]);
        let module = lower(&m).unwrap();
        let f = module.function("f").unwrap();
        assert!(matches!(
            f.terminator(f.entry().unwrap()),
            Some(InstKind::Return { .. })
        ));
    }

    #[test]
    fn test_float_remainder_is_unsupported() {
        use Instruction::*;
        let m = single(&[ValType::F64, ValType::F64], &[ValType::F64], &[], vec![
            LocalGet(0),
            LocalGet(1),
            Binary(ValType::F64, NumOp::Rem),
        ]);
        assert!(matches!(
            lower(&m),
            Err(CompileError::UnsupportedConstruct { .. })
        ));
    }

    #[test]
    fn test_instruction_after_final_end_is_malformed() {
        use Instruction::*;
        let m = single(&[], &[], &[], vec![End, Nop]);
        assert!(matches!(lower(&m), Err(CompileError::Malformed { .. })));
    }

    #[test]
    fn test_unclosed_region_is_malformed() {
        use Instruction::*;
        let m = single(&[], &[], &[], vec![Block(BlockType::Empty)]);
        assert!(matches!(lower(&m), Err(CompileError::Malformed { .. })));
    }

    #[test]
    fn test_integer_if_condition_compares_against_zero() {
        use Instruction::*;
        let m = single(&[ValType::I32], &[], &[], vec![LocalGet(0), If(BlockType::Empty), End]);
        let module = lower(&m).unwrap();
        let f = module.function("f").unwrap();
        assert!(matches!(
            f.terminator(f.entry().unwrap()),
            Some(InstKind::CJump { cond: CmpCond::Ne, .. })
        ));
    }

    #[test]
    fn test_conditional_return_keeps_value_for_fallthrough() {
        use Instruction::*;
        let m = single(&[ValType::I32], &[ValType::I32], &[], vec![
            LocalGet(0),
            LocalGet(0),
            BrIf(0),
            Drop,
            Const(Literal::I32(0)),
            End,
        ]);
        let module = lower(&m).unwrap();
        let f = module.function("f").unwrap();
        let returns = f
            .blocks()
            .iter()
            .filter(|&&b| matches!(f.terminator(b), Some(InstKind::Return { .. })))
            .count();
        assert_eq!(returns, 2);
    }
}
