//! x86-64 register numbering and register classes.
//!
//! General purpose registers are bank 0 and XMM registers bank 1; ids follow
//! the hardware encoding order used by iced-x86 (RAX, RCX, RDX, RBX, RSP, ...).

use crate::core::register_file::{AsmReg, RegisterClass};
use crate::ir::Type;

pub const GP_BANK: u8 = 0;
pub const XMM_BANK: u8 = 1;

pub const RAX: AsmReg = AsmReg::new(GP_BANK, 0);
pub const RCX: AsmReg = AsmReg::new(GP_BANK, 1);
pub const RDX: AsmReg = AsmReg::new(GP_BANK, 2);
pub const RBX: AsmReg = AsmReg::new(GP_BANK, 3);
pub const RSP: AsmReg = AsmReg::new(GP_BANK, 4);
pub const RBP: AsmReg = AsmReg::new(GP_BANK, 5);
pub const RSI: AsmReg = AsmReg::new(GP_BANK, 6);
pub const RDI: AsmReg = AsmReg::new(GP_BANK, 7);
pub const R8: AsmReg = AsmReg::new(GP_BANK, 8);
pub const R9: AsmReg = AsmReg::new(GP_BANK, 9);
pub const R10: AsmReg = AsmReg::new(GP_BANK, 10);
pub const R11: AsmReg = AsmReg::new(GP_BANK, 11);
pub const R12: AsmReg = AsmReg::new(GP_BANK, 12);
pub const R13: AsmReg = AsmReg::new(GP_BANK, 13);
pub const R14: AsmReg = AsmReg::new(GP_BANK, 14);
pub const R15: AsmReg = AsmReg::new(GP_BANK, 15);

/// Low byte views share the id of their full register.
pub const AL: AsmReg = RAX;
pub const BL: AsmReg = RBX;

pub const fn xmm(id: u8) -> AsmReg {
    AsmReg::new(XMM_BANK, id)
}

pub const XMM0: AsmReg = xmm(0);

/// Callee-saved registers in prologue push order.
pub const CALLEE_SAVE: [AsmReg; 5] = [RBX, R12, R13, R14, R15];

const GP_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

const XMM_NAMES: [&str; 16] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm8", "xmm9", "xmm10",
    "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
];

/// Assembly name of a register, `None` for ids outside both banks.
pub fn reg_name(reg: AsmReg) -> Option<&'static str> {
    match reg.bank {
        GP_BANK => GP_NAMES.get(reg.id as usize).copied(),
        XMM_BANK => XMM_NAMES.get(reg.id as usize).copied(),
        _ => None,
    }
}

pub static REGISTER_CLASSES: [RegisterClass; 3] = [
    RegisterClass {
        name: "reg64",
        bank: GP_BANK,
        value_types: &[Type::I32, Type::I64, Type::Ptr],
        registers: &[RBX, RDX, RCX, RDI, RSI, R8, R9, R10, R11, R14, R15],
        callee_saved: &CALLEE_SAVE,
    },
    RegisterClass {
        name: "reg8",
        bank: GP_BANK,
        value_types: &[Type::I8],
        registers: &[AL, BL],
        callee_saved: &[BL],
    },
    RegisterClass {
        name: "xmm",
        bank: XMM_BANK,
        value_types: &[Type::F32, Type::F64],
        registers: &[
            xmm(0),
            xmm(1),
            xmm(2),
            xmm(3),
            xmm(4),
            xmm(5),
            xmm(6),
            xmm(7),
            xmm(8),
            xmm(9),
            xmm(10),
            xmm(11),
            xmm(12),
            xmm(13),
            xmm(14),
            xmm(15),
        ],
        callee_saved: &[],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_follow_encoding_order() {
        assert_eq!(reg_name(RDI), Some("rdi"));
        assert_eq!(reg_name(R15), Some("r15"));
        assert_eq!(reg_name(xmm(9)), Some("xmm9"));
        assert_eq!(reg_name(AsmReg::new(2, 0)), None);
    }

    #[test]
    fn test_classes_cover_all_types() {
        for ty in [Type::I8, Type::I32, Type::I64, Type::F32, Type::F64, Type::Ptr] {
            assert_eq!(
                REGISTER_CLASSES.iter().filter(|c| c.holds(ty)).count(),
                1,
                "{ty}"
            );
        }
        assert!(!REGISTER_CLASSES[0].registers.contains(&RSP));
        assert!(!REGISTER_CLASSES[0].registers.contains(&RBP));
    }
}
