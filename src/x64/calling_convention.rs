// This module implements the register part of the System V AMD64 calling convention. SysVAssigner
// walks an argument list in order and hands each argument the next free register of its bank:
// integer and pointer arguments take RDI, RSI, RDX, RCX, R8 and R9, floating point arguments
// take XMM0 through XMM7. Passing arguments on the stack is a deliberate hard limitation: once a
// bank is exhausted the assignment fails with a ConventionOverflow error naming the bank, the
// number of arguments of that bank and the number of registers available. Return values live in
// RAX for integer types and XMM0 for floats.

//! System V x86-64 argument and return register assignment.

use super::registers::{xmm, GP_BANK, R8, R9, RAX, RCX, RDI, RDX, RSI, XMM0, XMM_BANK};
use crate::core::arch::convention_overflow;
use crate::core::error::CompileResult;
use crate::core::register_file::AsmReg;
use crate::ir::Type;

/// Register bank an IR type is passed in.
pub fn bank_of(ty: Type) -> u8 {
    if ty.is_float() {
        XMM_BANK
    } else {
        GP_BANK
    }
}

fn bank_name(bank: u8) -> &'static str {
    if bank == XMM_BANK {
        "float"
    } else {
        "integer"
    }
}

/// System V x86-64 argument assigner.
#[derive(Debug, Default)]
pub struct SysVAssigner {
    /// Current GP argument register index.
    gp_cnt: usize,
    /// Current XMM argument register index.
    xmm_cnt: usize,
}

impl SysVAssigner {
    /// System V x86-64 GP argument registers.
    pub const GP_ARG_REGS: [AsmReg; 6] = [RDI, RSI, RDX, RCX, R8, R9];

    /// System V x86-64 XMM argument registers.
    pub const XMM_ARG_REGS: [AsmReg; 8] = [
        xmm(0),
        xmm(1),
        xmm(2),
        xmm(3),
        xmm(4),
        xmm(5),
        xmm(6),
        xmm(7),
    ];

    pub fn new() -> Self {
        Self::default()
    }

    /// Number of GP argument registers used so far.
    pub fn gp_used(&self) -> usize {
        self.gp_cnt
    }

    /// Number of XMM argument registers used so far.
    pub fn xmm_used(&self) -> usize {
        self.xmm_cnt
    }

    /// Next register for an argument of type `ty`, `None` once its bank is
    /// exhausted.
    pub fn assign_arg(&mut self, ty: Type) -> Option<AsmReg> {
        let is_xmm = bank_of(ty) == XMM_BANK;
        let regs: &[AsmReg] = if is_xmm {
            &Self::XMM_ARG_REGS
        } else {
            &Self::GP_ARG_REGS
        };
        let cnt = if is_xmm {
            &mut self.xmm_cnt
        } else {
            &mut self.gp_cnt
        };
        let reg = regs.get(*cnt).copied()?;
        *cnt += 1;
        Some(reg)
    }

    /// Assign every argument of a signature.
    pub fn assign_all(arg_types: &[Type]) -> CompileResult<Vec<AsmReg>> {
        let mut assigner = Self::new();
        let mut locs = Vec::with_capacity(arg_types.len());
        for &ty in arg_types {
            match assigner.assign_arg(ty) {
                Some(reg) => locs.push(reg),
                None => {
                    let bank = bank_of(ty);
                    let count = arg_types.iter().filter(|&&t| bank_of(t) == bank).count();
                    let available = if bank == XMM_BANK {
                        Self::XMM_ARG_REGS.len()
                    } else {
                        Self::GP_ARG_REGS.len()
                    };
                    return Err(convention_overflow(bank_name(bank), count, available));
                }
            }
        }
        Ok(locs)
    }

    pub fn ret_reg(ty: Type) -> AsmReg {
        if ty.is_float() {
            XMM0
        } else {
            RAX
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::CompileError;

    #[test]
    fn test_mixed_banks_count_separately() {
        let locs =
            SysVAssigner::assign_all(&[Type::I32, Type::F64, Type::Ptr, Type::F32]).unwrap();
        assert_eq!(locs, vec![RDI, xmm(0), RSI, xmm(1)]);
    }

    #[test]
    fn test_seventh_integer_argument_overflows() {
        let err = SysVAssigner::assign_all(&[Type::I64; 7]).unwrap_err();
        assert_eq!(
            err,
            CompileError::ConventionOverflow {
                bank: "integer",
                count: 7,
                available: 6,
            }
        );
    }

    #[test]
    fn test_ninth_float_argument_overflows() {
        let mut args = vec![Type::I32; 6];
        args.extend([Type::F64; 9]);
        let err = SysVAssigner::assign_all(&args).unwrap_err();
        assert!(matches!(
            err,
            CompileError::ConventionOverflow { bank: "float", count: 9, available: 8 }
        ));
    }

    #[test]
    fn test_assigner_counters() {
        let mut cc = SysVAssigner::new();
        cc.assign_arg(Type::I32);
        cc.assign_arg(Type::F32);
        cc.assign_arg(Type::I64);
        assert_eq!(cc.gp_used(), 2);
        assert_eq!(cc.xmm_used(), 1);
        assert_eq!(SysVAssigner::ret_reg(Type::F64), XMM0);
        assert_eq!(SysVAssigner::ret_reg(Type::Ptr), RAX);
    }
}
