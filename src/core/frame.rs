//! Per-function backend record.
//!
//! A [`Frame`] is created from a function signature by
//! [`Architecture::new_frame`](crate::core::arch::Architecture::new_frame),
//! filled in by the register file (used registers, liveness over call sites)
//! and by constant-pool insertions, and finally read by prologue and epilogue
//! generation.

use hashbrown::HashMap;

use crate::core::arch::CallLiveness;
use crate::core::register_file::{AsmReg, RegBitSet};
use crate::ir::Value;

/// Literal pool entry payload.
///
/// Only raw bytes can be emitted into the pool; the other kinds exist so a
/// front end can hand over a constant before deciding how to pack it.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolValue {
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
}

impl PoolValue {
    pub fn kind(&self) -> &'static str {
        match self {
            PoolValue::Bytes(_) => "bytes",
            PoolValue::Int(_) => "int",
            PoolValue::Float(_) => "float",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub name: String,
    /// Argument registers in parameter order.
    pub arg_locs: Vec<AsmReg>,
    /// Registers live on entry: argument registers plus the frame pointer.
    pub live_in: RegBitSet,
    /// Return register, `None` for procedures.
    pub rv: Option<AsmReg>,
    /// Registers live on exit: return register plus the frame pointer.
    pub live_out: RegBitSet,
    used_regs: RegBitSet,
    stacksize: u32,
    constants: Vec<(String, PoolValue)>,
    live_over: HashMap<Value, Vec<AsmReg>>,
}

impl Frame {
    pub fn new(
        name: impl Into<String>,
        arg_locs: Vec<AsmReg>,
        live_in: RegBitSet,
        rv: Option<AsmReg>,
        live_out: RegBitSet,
    ) -> Self {
        Self {
            name: name.into(),
            arg_locs,
            live_in,
            rv,
            live_out,
            used_regs: RegBitSet::new(),
            stacksize: 0,
            constants: Vec::new(),
            live_over: HashMap::new(),
        }
    }

    pub fn mark_used(&mut self, reg: AsmReg) {
        self.used_regs.set(reg);
    }

    pub fn is_used(&self, reg: AsmReg) -> bool {
        self.used_regs.contains(reg)
    }

    pub fn used_regs(&self) -> &RegBitSet {
        &self.used_regs
    }

    pub fn stacksize(&self) -> u32 {
        self.stacksize
    }

    pub fn set_stack_size(&mut self, size: u32) {
        self.stacksize = size;
    }

    /// Add a literal pool entry and return its label.
    pub fn add_constant(&mut self, value: PoolValue) -> String {
        let label = format!("{}_literal_{}", self.name, self.constants.len());
        self.constants.push((label.clone(), value));
        label
    }

    pub fn constants(&self) -> &[(String, PoolValue)] {
        &self.constants
    }

    /// Record the registers live across call `site`, in save order.
    pub fn set_live_over(&mut self, site: Value, regs: Vec<AsmReg>) {
        self.live_over.insert(site, regs);
    }
}

impl CallLiveness for Frame {
    fn live_regs_over(&self, site: Value) -> Vec<AsmReg> {
        self.live_over.get(&site).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::new("f", Vec::new(), RegBitSet::new(), None, RegBitSet::new())
    }

    #[test]
    fn test_constant_labels_are_sequential() {
        let mut frame = frame();
        assert_eq!(frame.add_constant(PoolValue::Bytes(vec![1])), "f_literal_0");
        assert_eq!(frame.add_constant(PoolValue::Int(2)), "f_literal_1");
        assert_eq!(frame.constants().len(), 2);
        assert_eq!(frame.constants()[1].1.kind(), "int");
    }

    #[test]
    fn test_live_over_defaults_to_empty() {
        let mut frame = frame();
        let regs = vec![AsmReg::new(0, 3), AsmReg::new(0, 1)];
        frame.set_live_over(Value(4), regs.clone());
        assert_eq!(frame.live_regs_over(Value(4)), regs);
        assert!(frame.live_regs_over(Value(5)).is_empty());
    }

    #[test]
    fn test_used_registers() {
        let mut frame = frame();
        let rbx = AsmReg::new(0, 3);
        assert!(!frame.is_used(rbx));
        frame.mark_used(rbx);
        assert!(frame.is_used(rbx));
        assert_eq!(frame.used_regs().len(), 1);
    }
}
