//! Typed SSA intermediate representation.
//!
//! The IR is deliberately small: every instruction is a [`Value`] (terminators
//! and stores simply have no type), values and blocks are `u32` indices into
//! per-function arenas, and merges are explicit [`InstKind::Phi`] nodes.
//!
//! ```text
//! function i32 max(i32 param0, i32 param1)
//!   max_block1:
//!     %2 = ptr alloc 4 align 4
//!     store %0, %2
//!     ...
//!     cjmp %6 < %7 ? max_block3 : max_block4
//! ```

use std::fmt;

pub mod builder;
pub mod function;
pub mod module;
pub mod printer;
pub mod types;
pub mod verify;

pub use builder::Builder;
pub use function::{BlockData, Function, ValueData};
pub use module::{ExternalFunction, GlobalId, GlobalVar, Module};
pub use types::Type;
pub use verify::verify_function;

use crate::core::arch::VCall;

/// SSA value (and instruction) reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub u32);

/// Basic block reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(pub u32);

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(v) => write!(f, "{v}"),
            ConstValue::Float(v) => write!(f, "{v:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
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

impl BinOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::DivU => "/u",
            BinOp::Rem => "%",
            BinOp::RemU => "%u",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::ShrU => ">>u",
        }
    }

    /// Whether the operation is defined on floating point operands.
    pub const fn allows_float(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
}

/// Condition of a conditional jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpCond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LtU,
    LeU,
    GtU,
    GeU,
}

impl CmpCond {
    pub const fn symbol(self) -> &'static str {
        match self {
            CmpCond::Eq => "==",
            CmpCond::Ne => "!=",
            CmpCond::Lt => "<",
            CmpCond::Le => "<=",
            CmpCond::Gt => ">",
            CmpCond::Ge => ">=",
            CmpCond::LtU => "<u",
            CmpCond::LeU => "<=u",
            CmpCond::GtU => ">u",
            CmpCond::GeU => ">=u",
        }
    }
}

/// Operation performed by an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    /// Incoming function argument, not placed in any block.
    Param { index: u32 },
    Const(ConstValue),
    /// Stack slot of `size` bytes; the value is its address.
    Alloc { size: u32, align: u32 },
    GlobalAddr(GlobalId),
    Binop { op: BinOp, lhs: Value, rhs: Value },
    Unop { op: UnOp, operand: Value },
    Cast { operand: Value },
    Load { addr: Value },
    Store { value: Value, addr: Value },
    Phi { incoming: Vec<(Block, Value)> },
    Call(VCall),
    Jump { target: Block },
    CJump {
        lhs: Value,
        cond: CmpCond,
        rhs: Value,
        yes: Block,
        no: Block,
    },
    Return { value: Value },
    Exit,
}

impl InstKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Jump { .. } | InstKind::CJump { .. } | InstKind::Return { .. } | InstKind::Exit
        )
    }

    /// Control-flow successors of a terminator, in branch order.
    pub fn successors(&self) -> Vec<Block> {
        match self {
            InstKind::Jump { target } => vec![*target],
            InstKind::CJump { yes, no, .. } => vec![*yes, *no],
            _ => Vec::new(),
        }
    }

    /// Value operands in evaluation order (phi operands included).
    pub fn operands(&self) -> Vec<Value> {
        match self {
            InstKind::Param { .. }
            | InstKind::Const(_)
            | InstKind::Alloc { .. }
            | InstKind::GlobalAddr(_)
            | InstKind::Jump { .. }
            | InstKind::Exit => Vec::new(),
            InstKind::Binop { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::Unop { operand, .. } | InstKind::Cast { operand } => vec![*operand],
            InstKind::Load { addr } => vec![*addr],
            InstKind::Store { value, addr } => vec![*value, *addr],
            InstKind::Phi { incoming } => incoming.iter().map(|&(_, v)| v).collect(),
            InstKind::Call(vcall) => vcall.args.clone(),
            InstKind::CJump { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::Return { value } => vec![*value],
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            InstKind::Param { .. } => "param",
            InstKind::Const(_) => "const",
            InstKind::Alloc { .. } => "alloc",
            InstKind::GlobalAddr(_) => "global",
            InstKind::Binop { .. } => "binop",
            InstKind::Unop { .. } => "unop",
            InstKind::Cast { .. } => "cast",
            InstKind::Load { .. } => "load",
            InstKind::Store { .. } => "store",
            InstKind::Phi { .. } => "phi",
            InstKind::Call(_) => "call",
            InstKind::Jump { .. } => "jmp",
            InstKind::CJump { .. } => "cjmp",
            InstKind::Return { .. } => "return",
            InstKind::Exit => "exit",
        }
    }
}
