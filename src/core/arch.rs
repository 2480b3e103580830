// This module defines the contract every target architecture implements. The lowering engine
// only asks it calling-convention questions (does this signature fit the argument registers?)
// while the backend half turns a Frame and an instruction-selected body into the final stream:
// argument and return locations, argument moves, call lowering with a strict LIFO caller-save
// bracket, and the prologue/epilogue pair including the literal pool. Register classes and
// convention tables are static data of each implementing type. Liveness over call sites is
// consumed through the narrow CallLiveness capability so the allocator that computes it stays
// independent of the backend.

//! Architecture contract shared by all targets.

use std::fmt;

use crate::core::error::{CompileError, CompileResult};
use crate::core::frame::Frame;
use crate::core::register_file::{AsmReg, RegBitSet, RegisterClass};
use crate::ir::{Type, Value};

/// A call site that has not been lowered to machine instructions yet.
#[derive(Debug, Clone, PartialEq)]
pub struct VCall {
    pub function_name: String,
    pub args: Vec<Value>,
    pub ret_type: Option<Type>,
}

/// Answers which registers hold live values across a call site.
pub trait CallLiveness {
    /// Registers live across `site`, in the order they must be saved.
    fn live_regs_over(&self, site: Value) -> Vec<AsmReg>;
}

pub trait Architecture {
    /// Machine instruction produced by this target.
    type Inst: fmt::Display + fmt::Debug + Clone + PartialEq;

    fn name(&self) -> &'static str;

    fn register_classes(&self) -> &'static [RegisterClass];

    fn frame_pointer(&self) -> AsmReg;

    fn stack_pointer(&self) -> AsmReg;

    /// Assign each argument the next register of its bank.
    ///
    /// Returns the locations in argument order and the entry block live-in
    /// set (those registers plus the frame pointer). Arguments that do not
    /// fit in registers are rejected with [`CompileError::ConventionOverflow`].
    fn determine_arg_locations(&self, arg_types: &[Type]) -> CompileResult<(Vec<AsmReg>, RegBitSet)>;

    /// Return register and the exit block live-out set.
    fn determine_rv_location(&self, ret_type: Type) -> CompileResult<(AsmReg, RegBitSet)>;

    /// Moves copying `args` into the argument registers; adds the live-in
    /// registers to `live`.
    fn gen_fill_arguments(
        &self,
        arg_types: &[Type],
        args: &[AsmReg],
        live: &mut RegBitSet,
    ) -> CompileResult<Vec<Self::Inst>>;

    /// Lower a virtual call: save live registers, call, restore in reverse.
    ///
    /// `dest` receives the call result and is never saved.
    fn make_call(
        &self,
        liveness: &dyn CallLiveness,
        site: Value,
        vcall: &VCall,
        dest: Option<AsmReg>,
    ) -> CompileResult<Vec<Self::Inst>>;

    fn prologue(&self, frame: &Frame) -> Vec<Self::Inst>;

    /// Epilogue followed by the literal pool.
    fn epilogue(&self, frame: &Frame) -> CompileResult<Vec<Self::Inst>>;

    fn register_class_for(&self, ty: Type) -> Option<&'static RegisterClass> {
        self.register_classes().iter().find(|class| class.holds(ty))
    }

    /// Create the frame for a function with the given signature.
    fn new_frame(
        &self,
        name: &str,
        params: &[Type],
        ret_type: Option<Type>,
    ) -> CompileResult<Frame> {
        let (arg_locs, live_in) = self.determine_arg_locations(params)?;
        let (rv, live_out) = match ret_type {
            Some(ty) => {
                let (rv, live_out) = self.determine_rv_location(ty)?;
                (Some(rv), live_out)
            }
            None => (None, RegBitSet::from_regs(&[self.frame_pointer()])),
        };
        Ok(Frame::new(name, arg_locs, live_in, rv, live_out))
    }

    /// Prologue, body and epilogue of one function.
    fn gen_function(&self, frame: &Frame, body: Vec<Self::Inst>) -> CompileResult<Vec<Self::Inst>> {
        let mut out = self.prologue(frame);
        out.extend(body);
        out.extend(self.epilogue(frame)?);
        log::debug!("{}: {} instructions for {}", self.name(), out.len(), frame.name);
        Ok(out)
    }

    /// Reject a signature the convention cannot pass in registers.
    fn check_signature(&self, what: &str, params: &[Type]) -> CompileResult<()> {
        self.determine_arg_locations(params).map(|_| ()).map_err(|err| {
            log::debug!("{what}: {err}");
            err
        })
    }
}

/// Shorthand for the error raised when a register bank runs out.
pub fn convention_overflow(bank: &'static str, count: usize, available: usize) -> CompileError {
    CompileError::ConventionOverflow {
        bank,
        count,
        available,
    }
}
