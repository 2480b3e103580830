//! Decoded WebAssembly modules and their lowering to IR.
//!
//! The types here describe a module after decoding: sections are already
//! split into tables and function bodies into instruction lists. Reading the
//! binary or text format is left to the embedder.
//!
//! Function indices cover imported functions first, then defined functions,
//! in declaration order.

use std::fmt;

use crate::ir::Type;

pub mod lower;

pub use lower::{wasm_to_ir, LowerOptions, WasmToIrCompiler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    /// Host pointer, only produced by embedder signatures. The only legal
    /// base for loads and stores.
    Ptr,
}

impl ValType {
    pub const fn ir_type(self) -> Type {
        match self {
            ValType::I32 => Type::I32,
            ValType::I64 => Type::I64,
            ValType::F32 => Type::F32,
            ValType::F64 => Type::F64,
            ValType::Ptr => Type::Ptr,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::Ptr => "ptr",
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, ValType::F32 | ValType::F64)
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl FuncType {
    pub fn new(params: &[ValType], results: &[ValType]) -> Self {
        Self {
            params: params.to_vec(),
            results: results.to_vec(),
        }
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, p) in self.params.iter().enumerate() {
            let sep = if i == 0 { "" } else { ", " };
            write!(f, "{sep}{p}")?;
        }
        f.write_str(") -> (")?;
        for (i, r) in self.results.iter().enumerate() {
            let sep = if i == 0 { "" } else { ", " };
            write!(f, "{sep}{r}")?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportKind {
    /// Imported function with its type index.
    Function(u32),
    Table,
    Memory,
    Global,
}

impl ImportKind {
    pub fn name(&self) -> &'static str {
        match self {
            ImportKind::Function(_) => "function",
            ImportKind::Table => "table",
            ImportKind::Memory => "memory",
            ImportKind::Global => "global",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub kind: ImportKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportKind {
    Function(u32),
    Table(u32),
    Memory(u32),
    Global(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Literal {
    pub const fn val_type(self) -> ValType {
        match self {
            Literal::I32(_) => ValType::I32,
            Literal::I64(_) => ValType::I64,
            Literal::F32(_) => ValType::F32,
            Literal::F64(_) => ValType::F64,
        }
    }

    /// Little-endian byte image.
    pub fn to_le_bytes(self) -> Vec<u8> {
        match self {
            Literal::I32(v) => v.to_le_bytes().to_vec(),
            Literal::I64(v) => v.to_le_bytes().to_vec(),
            Literal::F32(v) => v.to_le_bytes().to_vec(),
            Literal::F64(v) => v.to_le_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub ty: ValType,
    pub mutable: bool,
    pub init: Literal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncBody {
    pub type_index: u32,
    /// Declared locals, numbered after the parameters.
    pub locals: Vec<ValType>,
    pub body: Vec<Instruction>,
}

/// Result type of a structured region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Value(ValType),
    /// Multi-value signature by type index.
    TypeIndex(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumOp {
    Add,
    Sub,
    Mul,
    /// Signed integer or float division.
    Div,
    DivU,
    Rem,
    RemU,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrU,
}

impl NumOp {
    pub const fn name(self, ty: ValType) -> &'static str {
        let float = ty.is_float();
        match self {
            NumOp::Add => "add",
            NumOp::Sub => "sub",
            NumOp::Mul => "mul",
            NumOp::Div if float => "div",
            NumOp::Div => "div_s",
            NumOp::DivU => "div_u",
            NumOp::Rem => "rem_s",
            NumOp::RemU => "rem_u",
            NumOp::And => "and",
            NumOp::Or => "or",
            NumOp::Xor => "xor",
            NumOp::Shl => "shl",
            NumOp::Shr => "shr_s",
            NumOp::ShrU => "shr_u",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Ne,
    /// Signed integer or float ordering.
    Lt,
    LtU,
    Gt,
    GtU,
    Le,
    LeU,
    Ge,
    GeU,
}

impl RelOp {
    pub const fn name(self, ty: ValType) -> &'static str {
        let float = ty.is_float();
        match self {
            RelOp::Eq => "eq",
            RelOp::Ne => "ne",
            RelOp::Lt if float => "lt",
            RelOp::Lt => "lt_s",
            RelOp::LtU => "lt_u",
            RelOp::Gt if float => "gt",
            RelOp::Gt => "gt_s",
            RelOp::GtU => "gt_u",
            RelOp::Le if float => "le",
            RelOp::Le => "le_s",
            RelOp::LeU => "le_u",
            RelOp::Ge if float => "ge",
            RelOp::Ge => "ge_s",
            RelOp::GeU => "ge_u",
        }
    }

    pub const fn is_unsigned(self) -> bool {
        matches!(self, RelOp::LtU | RelOp::GtU | RelOp::LeU | RelOp::GeU)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Binary(ValType, NumOp),
    Compare(ValType, RelOp),
    Eqz(ValType),
    Neg(ValType),
    Floor(ValType),
    Const(Literal),
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),
    Load { ty: ValType, offset: u32, align: u32 },
    Store { ty: ValType, offset: u32, align: u32 },
    Block(BlockType),
    Loop(BlockType),
    If(BlockType),
    Else,
    End,
    Br(u32),
    BrIf(u32),
    Call(u32),
    Return,
    Drop,
    Nop,
    // Decoded but not lowered.
    BrTable { targets: Vec<u32>, default: u32 },
    CallIndirect(u32),
    Select,
    Unreachable,
    MemorySize,
    MemoryGrow,
}

impl Instruction {
    /// Text format mnemonic, e.g. `i32.add` or `br_if`.
    pub fn opcode(&self) -> String {
        match self {
            Instruction::Binary(ty, op) => format!("{ty}.{}", op.name(*ty)),
            Instruction::Compare(ty, op) => format!("{ty}.{}", op.name(*ty)),
            Instruction::Eqz(ty) => format!("{ty}.eqz"),
            Instruction::Neg(ty) => format!("{ty}.neg"),
            Instruction::Floor(ty) => format!("{ty}.floor"),
            Instruction::Const(lit) => format!("{}.const", lit.val_type()),
            Instruction::Load { ty, .. } => format!("{ty}.load"),
            Instruction::Store { ty, .. } => format!("{ty}.store"),
            other => other.control_name().to_string(),
        }
    }

    fn control_name(&self) -> &'static str {
        match self {
            Instruction::LocalGet(_) => "local.get",
            Instruction::LocalSet(_) => "local.set",
            Instruction::LocalTee(_) => "local.tee",
            Instruction::GlobalGet(_) => "global.get",
            Instruction::GlobalSet(_) => "global.set",
            Instruction::Block(_) => "block",
            Instruction::Loop(_) => "loop",
            Instruction::If(_) => "if",
            Instruction::Else => "else",
            Instruction::End => "end",
            Instruction::Br(_) => "br",
            Instruction::BrIf(_) => "br_if",
            Instruction::Call(_) => "call",
            Instruction::Return => "return",
            Instruction::Drop => "drop",
            Instruction::Nop => "nop",
            Instruction::BrTable { .. } => "br_table",
            Instruction::CallIndirect(_) => "call_indirect",
            Instruction::Select => "select",
            Instruction::Unreachable => "unreachable",
            Instruction::MemorySize => "memory.size",
            Instruction::MemoryGrow => "memory.grow",
            _ => "numeric",
        }
    }
}

/// A decoded module.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WasmModule {
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    pub functions: Vec<FuncBody>,
    pub exports: Vec<Export>,
    pub globals: Vec<Global>,
}

impl WasmModule {
    /// Add a type and return its index.
    pub fn add_type(&mut self, ty: FuncType) -> u32 {
        self.types.push(ty);
        self.types.len() as u32 - 1
    }

    /// Add a defined function exported under `name`; returns its function index.
    pub fn add_function(&mut self, name: &str, body: FuncBody) -> u32 {
        let imported = self
            .imports
            .iter()
            .filter(|im| matches!(im.kind, ImportKind::Function(_)))
            .count();
        let index = (imported + self.functions.len()) as u32;
        self.functions.push(body);
        self.exports.push(Export {
            name: name.to_string(),
            kind: ExportKind::Function(index),
        });
        index
    }
}
