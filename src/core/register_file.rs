//! Register identifiers, register sets and the register file.
//!
//! [`AsmReg`] names one physical register as a (bank, id) pair and
//! [`RegBitSet`] tracks sets of them per bank. A [`RegisterClass`] groups the
//! interchangeable registers for a value category together with the
//! registers the convention designates callee-saved.
//!
//! [`RegisterFile`] is the small allocator that runs after lowering. It hands
//! out registers from a class, remembers every register it ever handed out
//! (the frame's used set) and snapshots which registers are live across each
//! call site. The backend never talks to it directly; it only consumes the
//! snapshot through [`CallLiveness`](crate::core::arch::CallLiveness).

use thiserror::Error;

use crate::core::frame::Frame;
use crate::ir::{Type, Value};

/// Maximum number of register banks supported (GP, FP, etc.).
pub const MAX_REGISTER_BANKS: usize = 4;

/// Type for register bank indices.
pub type RegBank = u8;

/// Type for register IDs within a bank.
pub type RegId = u8;

/// Combined register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsmReg {
    pub bank: RegBank,
    pub id: RegId,
}

impl AsmReg {
    pub const fn new(bank: RegBank, id: RegId) -> Self {
        Self { bank, id }
    }
}

/// Bit set for efficiently tracking register sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegBitSet {
    /// Bit mask for each register bank.
    banks: [u64; MAX_REGISTER_BANKS],
}

impl RegBitSet {
    /// Create empty register set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_regs(regs: &[AsmReg]) -> Self {
        let mut set = Self::new();
        for &reg in regs {
            set.set(reg);
        }
        set
    }

    /// Check if register is set.
    pub fn contains(&self, reg: AsmReg) -> bool {
        if reg.bank as usize >= MAX_REGISTER_BANKS || reg.id >= 64 {
            return false;
        }
        (self.banks[reg.bank as usize] & (1u64 << reg.id)) != 0
    }

    /// Set a register.
    pub fn set(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] |= 1u64 << reg.id;
        }
    }

    /// Clear a register.
    pub fn clear(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] &= !(1u64 << reg.id);
        }
    }

    /// Set union with another set.
    pub fn union(&mut self, other: &RegBitSet) {
        for i in 0..MAX_REGISTER_BANKS {
            self.banks[i] |= other.banks[i];
        }
    }

    pub fn len(&self) -> usize {
        self.banks.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.iter().all(|&b| b == 0)
    }

    /// Registers in ascending (bank, id) order.
    pub fn iter(&self) -> impl Iterator<Item = AsmReg> + '_ {
        self.banks.iter().enumerate().flat_map(|(bank, &mask)| {
            (0..64u8)
                .filter(move |id| mask & (1u64 << id) != 0)
                .map(move |id| AsmReg::new(bank as RegBank, id))
        })
    }
}

/// A named group of interchangeable registers for one value category.
#[derive(Debug)]
pub struct RegisterClass {
    pub name: &'static str,
    pub bank: RegBank,
    /// IR types whose values live in this class.
    pub value_types: &'static [Type],
    /// Allocatable registers, in allocation preference order.
    pub registers: &'static [AsmReg],
    /// Registers of this bank the callee must preserve.
    pub callee_saved: &'static [AsmReg],
}

impl RegisterClass {
    pub fn holds(&self, ty: Type) -> bool {
        self.value_types.contains(&ty)
    }

    pub fn is_callee_saved(&self, reg: AsmReg) -> bool {
        self.callee_saved.contains(&reg)
    }
}

/// Error types for register allocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegAllocError {
    #[error("no registers available in class {class}")]
    NoRegistersAvailable { class: &'static str },

    #[error("register {0:?} is not allocated")]
    RegisterNotAllocated(AsmReg),

    #[error("register {0:?} is already live")]
    RegisterInUse(AsmReg),
}

/// Register file for a single function.
///
/// Live registers are kept in allocation order, which is also the order the
/// caller-save sequence around a call pushes them in.
#[derive(Debug, Default)]
pub struct RegisterFile {
    live: Vec<(AsmReg, Value)>,
    used: RegBitSet,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the first free register of `class` for `owner`.
    pub fn allocate(
        &mut self,
        class: &RegisterClass,
        owner: Value,
    ) -> Result<AsmReg, RegAllocError> {
        let reg = class
            .registers
            .iter()
            .copied()
            .find(|&reg| !self.is_live(reg))
            .ok_or(RegAllocError::NoRegistersAvailable { class: class.name })?;
        self.assign(reg, owner);
        Ok(reg)
    }

    /// Pin `owner` to a specific register, e.g. an argument or return register.
    pub fn allocate_fixed(&mut self, reg: AsmReg, owner: Value) -> Result<(), RegAllocError> {
        if self.is_live(reg) {
            return Err(RegAllocError::RegisterInUse(reg));
        }
        self.assign(reg, owner);
        Ok(())
    }

    fn assign(&mut self, reg: AsmReg, owner: Value) {
        log::trace!("assign {:?} to {}", reg, owner);
        self.live.push((reg, owner));
        self.used.set(reg);
    }

    pub fn free(&mut self, reg: AsmReg) -> Result<(), RegAllocError> {
        let pos = self
            .live
            .iter()
            .position(|&(r, _)| r == reg)
            .ok_or(RegAllocError::RegisterNotAllocated(reg))?;
        self.live.remove(pos);
        Ok(())
    }

    /// Release every register held by `owner`.
    pub fn free_value(&mut self, owner: Value) {
        self.live.retain(|&(_, v)| v != owner);
    }

    pub fn is_live(&self, reg: AsmReg) -> bool {
        self.live.iter().any(|&(r, _)| r == reg)
    }

    pub fn owner(&self, reg: AsmReg) -> Option<Value> {
        self.live.iter().find(|&&(r, _)| r == reg).map(|&(_, v)| v)
    }

    /// Currently live registers in allocation order.
    pub fn live_regs(&self) -> Vec<AsmReg> {
        self.live.iter().map(|&(r, _)| r).collect()
    }

    /// Every register handed out since the function started.
    pub fn used(&self) -> &RegBitSet {
        &self.used
    }

    /// Record the registers live across call `site` in `frame`.
    ///
    /// `dest` is the register receiving the call result; it is clobbered by
    /// the call itself and never part of the saved set.
    pub fn record_call(&self, frame: &mut Frame, site: Value, dest: Option<AsmReg>) {
        let live = self
            .live_regs()
            .into_iter()
            .filter(|&r| Some(r) != dest)
            .collect();
        frame.set_live_over(site, live);
    }

    /// Publish the used set into the frame for prologue/epilogue generation.
    pub fn commit(&self, frame: &mut Frame) {
        for reg in self.used.iter() {
            frame.mark_used(reg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const R0: AsmReg = AsmReg::new(0, 0);
    const R1: AsmReg = AsmReg::new(0, 1);
    const R2: AsmReg = AsmReg::new(0, 2);

    static TEST_CLASS: RegisterClass = RegisterClass {
        name: "test",
        bank: 0,
        value_types: &[Type::I64],
        registers: &[R0, R1, R2],
        callee_saved: &[R2],
    };

    #[test]
    fn test_regbitset_operations() {
        let mut set = RegBitSet::new();
        let reg = AsmReg::new(0, 5);

        assert!(!set.contains(reg));
        set.set(reg);
        assert!(set.contains(reg));
        set.clear(reg);
        assert!(!set.contains(reg));
        assert!(set.is_empty());
    }

    #[test]
    fn test_regbitset_iter_is_ordered() {
        let set = RegBitSet::from_regs(&[AsmReg::new(1, 3), AsmReg::new(0, 9), AsmReg::new(0, 2)]);
        let regs: Vec<_> = set.iter().collect();
        assert_eq!(regs, vec![AsmReg::new(0, 2), AsmReg::new(0, 9), AsmReg::new(1, 3)]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_allocation_order_and_exhaustion() {
        let mut regs = RegisterFile::new();
        assert_eq!(regs.allocate(&TEST_CLASS, Value(0)).unwrap(), R0);
        assert_eq!(regs.allocate(&TEST_CLASS, Value(1)).unwrap(), R1);
        assert_eq!(regs.allocate(&TEST_CLASS, Value(2)).unwrap(), R2);
        assert_eq!(
            regs.allocate(&TEST_CLASS, Value(3)),
            Err(RegAllocError::NoRegistersAvailable { class: "test" })
        );

        regs.free(R1).unwrap();
        assert_eq!(regs.allocate(&TEST_CLASS, Value(4)).unwrap(), R1);
        assert_eq!(regs.live_regs(), vec![R0, R2, R1]);
        assert_eq!(regs.owner(R1), Some(Value(4)));
    }

    #[test]
    fn test_used_survives_free() {
        let mut regs = RegisterFile::new();
        let r = regs.allocate(&TEST_CLASS, Value(0)).unwrap();
        regs.free_value(Value(0));
        assert!(!regs.is_live(r));
        assert!(regs.used().contains(r));
        assert_eq!(regs.free(r), Err(RegAllocError::RegisterNotAllocated(r)));
    }

    #[test]
    fn test_fixed_allocation_conflicts() {
        let mut regs = RegisterFile::new();
        regs.allocate_fixed(R2, Value(0)).unwrap();
        assert_eq!(regs.allocate_fixed(R2, Value(1)), Err(RegAllocError::RegisterInUse(R2)));
        assert!(TEST_CLASS.is_callee_saved(R2));
        assert!(TEST_CLASS.holds(Type::I64));
        assert!(!TEST_CLASS.holds(Type::F32));
    }
}
