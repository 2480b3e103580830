//! Machine instructions emitted by the x86-64 backend glue.

use std::fmt;

use super::registers::reg_name;
use crate::core::register_file::AsmReg;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum X64Inst {
    /// Position marker: function entry or literal pool entry.
    Label(String),
    Push(AsmReg),
    Pop(AsmReg),
    SubImm { reg: AsmReg, imm: u32 },
    AddImm { reg: AsmReg, imm: u32 },
    /// Register copy; both operands are in the same bank.
    Mov { dst: AsmReg, src: AsmReg },
    /// Direct call of a label in the stream or an external symbol.
    Call(String),
    Ret,
    /// One raw data byte.
    Db(u8),
}

struct Reg(AsmReg);

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match reg_name(self.0) {
            Some(name) => f.write_str(name),
            None => write!(f, "r{}:{}", self.0.bank, self.0.id),
        }
    }
}

impl fmt::Display for X64Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            X64Inst::Label(name) => write!(f, "{name}:"),
            X64Inst::Push(reg) => write!(f, "push {}", Reg(*reg)),
            X64Inst::Pop(reg) => write!(f, "pop {}", Reg(*reg)),
            X64Inst::SubImm { reg, imm } => write!(f, "sub {}, {imm}", Reg(*reg)),
            X64Inst::AddImm { reg, imm } => write!(f, "add {}, {imm}", Reg(*reg)),
            X64Inst::Mov { dst, src } if dst.bank == super::registers::XMM_BANK => {
                write!(f, "movaps {}, {}", Reg(*dst), Reg(*src))
            }
            X64Inst::Mov { dst, src } => write!(f, "mov {}, {}", Reg(*dst), Reg(*src)),
            X64Inst::Call(target) => write!(f, "call {target}"),
            X64Inst::Ret => f.write_str("ret"),
            X64Inst::Db(byte) => write!(f, "db {byte:#04x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x64::registers::{xmm, RBP, RSP};

    #[test]
    fn test_display() {
        assert_eq!(X64Inst::Push(RBP).to_string(), "push rbp");
        assert_eq!(X64Inst::Mov { dst: RBP, src: RSP }.to_string(), "mov rbp, rsp");
        assert_eq!(
            X64Inst::Mov { dst: xmm(1), src: xmm(0) }.to_string(),
            "movaps xmm1, xmm0"
        );
        assert_eq!(X64Inst::SubImm { reg: RSP, imm: 16 }.to_string(), "sub rsp, 16");
        assert_eq!(X64Inst::Db(0x2a).to_string(), "db 0x2a");
        assert_eq!(X64Inst::Label("f".into()).to_string(), "f:");
    }
}
