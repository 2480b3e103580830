//! x86-64 implementation of the architecture contract.
//!
//! Frame layout produced by [`X86_64::prologue`]:
//!
//! ```text
//! f:
//!     push rbp
//!     push rbx        ; only callee-saved registers the body used
//!     push r12
//!     sub rsp, N      ; only if the frame reserves stack space
//!     mov rbp, rsp
//! ```
//!
//! The epilogue undoes this in reverse order, returns, and is followed by the
//! literal pool so the data is never executed.

use super::calling_convention::SysVAssigner;
use super::inst::X64Inst;
use super::registers::{reg_name, CALLEE_SAVE, GP_BANK, RBP, REGISTER_CLASSES, RSP};
use crate::core::arch::{Architecture, CallLiveness, VCall};
use crate::core::error::{CompileError, CompileResult};
use crate::core::frame::{Frame, PoolValue};
use crate::core::register_file::{AsmReg, RegBitSet, RegisterClass};
use crate::ir::{Type, Value};

#[derive(Debug, Default, Clone, Copy)]
pub struct X86_64;

impl X86_64 {
    pub fn new() -> Self {
        Self
    }

    fn mov(dst: AsmReg, src: AsmReg) -> X64Inst {
        X64Inst::Mov { dst, src }
    }
}

impl Architecture for X86_64 {
    type Inst = X64Inst;

    fn name(&self) -> &'static str {
        "x86_64"
    }

    fn register_classes(&self) -> &'static [RegisterClass] {
        &REGISTER_CLASSES
    }

    fn frame_pointer(&self) -> AsmReg {
        RBP
    }

    fn stack_pointer(&self) -> AsmReg {
        RSP
    }

    fn determine_arg_locations(&self, arg_types: &[Type]) -> CompileResult<(Vec<AsmReg>, RegBitSet)> {
        let arg_locs = SysVAssigner::assign_all(arg_types)?;
        let mut live_in = RegBitSet::from_regs(&arg_locs);
        live_in.set(RBP);
        Ok((arg_locs, live_in))
    }

    fn determine_rv_location(&self, ret_type: Type) -> CompileResult<(AsmReg, RegBitSet)> {
        let rv = SysVAssigner::ret_reg(ret_type);
        Ok((rv, RegBitSet::from_regs(&[rv, RBP])))
    }

    fn gen_fill_arguments(
        &self,
        arg_types: &[Type],
        args: &[AsmReg],
        live: &mut RegBitSet,
    ) -> CompileResult<Vec<X64Inst>> {
        if arg_types.len() != args.len() {
            return Err(CompileError::invariant(format!(
                "{} argument types for {} argument registers",
                arg_types.len(),
                args.len()
            )));
        }
        let (arg_locs, live_in) = self.determine_arg_locations(arg_types)?;
        live.union(&live_in);

        let mut out = Vec::with_capacity(args.len());
        for (&loc, &arg) in arg_locs.iter().zip(args) {
            if loc.bank != arg.bank {
                return Err(CompileError::invariant(format!(
                    "argument in bank {} cannot move to {}",
                    arg.bank,
                    reg_name(loc).unwrap_or("?")
                )));
            }
            if loc != arg {
                out.push(Self::mov(loc, arg));
            }
        }
        Ok(out)
    }

    fn make_call(
        &self,
        liveness: &dyn CallLiveness,
        site: Value,
        vcall: &VCall,
        dest: Option<AsmReg>,
    ) -> CompileResult<Vec<X64Inst>> {
        let live_regs: Vec<AsmReg> = liveness
            .live_regs_over(site)
            .into_iter()
            .filter(|&reg| Some(reg) != dest)
            .collect();

        if let Some(reg) = live_regs.iter().find(|reg| reg.bank != GP_BANK) {
            return Err(CompileError::unsupported(format!(
                "caller-save of {} around call to {}",
                reg_name(*reg).unwrap_or("non-gp register"),
                vcall.function_name
            )));
        }
        log::trace!(
            "call {} saves {} registers",
            vcall.function_name,
            live_regs.len()
        );

        let mut out = Vec::with_capacity(live_regs.len() * 2 + 1);
        out.extend(live_regs.iter().map(|&reg| X64Inst::Push(reg)));
        out.push(X64Inst::Call(vcall.function_name.clone()));
        out.extend(live_regs.iter().rev().map(|&reg| X64Inst::Pop(reg)));
        Ok(out)
    }

    fn prologue(&self, frame: &Frame) -> Vec<X64Inst> {
        let mut out = vec![X64Inst::Label(frame.name.clone()), X64Inst::Push(RBP)];

        for reg in CALLEE_SAVE {
            if frame.is_used(reg) {
                out.push(X64Inst::Push(reg));
            }
        }

        if frame.stacksize() > 0 {
            out.push(X64Inst::SubImm {
                reg: RSP,
                imm: frame.stacksize(),
            });
        }

        out.push(Self::mov(RBP, RSP));
        out
    }

    fn epilogue(&self, frame: &Frame) -> CompileResult<Vec<X64Inst>> {
        let mut out = Vec::new();
        if frame.stacksize() > 0 {
            out.push(X64Inst::AddImm {
                reg: RSP,
                imm: frame.stacksize(),
            });
        }

        for reg in CALLEE_SAVE.iter().rev() {
            if frame.is_used(*reg) {
                out.push(X64Inst::Pop(*reg));
            }
        }

        out.push(X64Inst::Pop(RBP));
        out.push(X64Inst::Ret);

        // Literal pool.
        for (label, value) in frame.constants() {
            let PoolValue::Bytes(bytes) = value else {
                return Err(CompileError::unsupported(format!(
                    "literal pool value of kind {} in {}",
                    value.kind(),
                    label
                )));
            };
            out.push(X64Inst::Label(label.clone()));
            out.extend(bytes.iter().map(|&b| X64Inst::Db(b)));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x64::registers::{xmm, RAX, RBX, RCX, RDI, RSI, R12, R15};

    struct Fixed(Vec<AsmReg>);

    impl CallLiveness for Fixed {
        fn live_regs_over(&self, _site: Value) -> Vec<AsmReg> {
            self.0.clone()
        }
    }

    fn vcall() -> VCall {
        VCall {
            function_name: "g".into(),
            args: Vec::new(),
            ret_type: Some(Type::I64),
        }
    }

    #[test]
    fn test_live_in_contains_frame_pointer() {
        let (locs, live_in) = X86_64.determine_arg_locations(&[Type::I32, Type::I32]).unwrap();
        assert_eq!(locs, vec![RDI, RSI]);
        assert_eq!(live_in, RegBitSet::from_regs(&[RDI, RSI, RBP]));

        let (rv, live_out) = X86_64.determine_rv_location(Type::I32).unwrap();
        assert_eq!(rv, RAX);
        assert_eq!(live_out, RegBitSet::from_regs(&[RAX, RBP]));
    }

    #[test]
    fn test_call_excludes_destination() {
        let live = Fixed(vec![RBX, RAX, RCX]);
        let code = X86_64
            .make_call(&live, Value(0), &vcall(), Some(RAX))
            .unwrap();
        assert_eq!(
            code,
            vec![
                X64Inst::Push(RBX),
                X64Inst::Push(RCX),
                X64Inst::Call("g".into()),
                X64Inst::Pop(RCX),
                X64Inst::Pop(RBX),
            ]
        );
    }

    #[test]
    fn test_call_rejects_live_xmm() {
        let live = Fixed(vec![RBX, xmm(2)]);
        let err = X86_64.make_call(&live, Value(0), &vcall(), None).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedConstruct { .. }));
        assert!(err.to_string().contains("xmm2"));
    }

    #[test]
    fn test_prologue_pushes_used_callee_saves_in_order() {
        let mut frame = X86_64.new_frame("f", &[], None).unwrap();
        frame.mark_used(R15);
        frame.mark_used(RBX);
        frame.mark_used(RCX);
        frame.set_stack_size(32);

        let prologue = X86_64.prologue(&frame);
        assert_eq!(
            prologue,
            vec![
                X64Inst::Label("f".into()),
                X64Inst::Push(RBP),
                X64Inst::Push(RBX),
                X64Inst::Push(R15),
                X64Inst::SubImm { reg: RSP, imm: 32 },
                X64Inst::Mov { dst: RBP, src: RSP },
            ]
        );

        let epilogue = X86_64.epilogue(&frame).unwrap();
        assert_eq!(
            epilogue,
            vec![
                X64Inst::AddImm { reg: RSP, imm: 32 },
                X64Inst::Pop(R15),
                X64Inst::Pop(RBX),
                X64Inst::Pop(RBP),
                X64Inst::Ret,
            ]
        );
        assert!(!prologue.contains(&X64Inst::Push(R12)));
    }

    #[test]
    fn test_fill_arguments_moves_into_locations() {
        let mut live = RegBitSet::new();
        let code = X86_64
            .gen_fill_arguments(&[Type::I64, Type::F64], &[RBX, xmm(4)], &mut live)
            .unwrap();
        assert_eq!(
            code,
            vec![
                X64Inst::Mov { dst: RDI, src: RBX },
                X64Inst::Mov { dst: xmm(0), src: xmm(4) },
            ]
        );
        assert!(live.contains(RDI));
        assert!(live.contains(xmm(0)));
        assert!(live.contains(RBP));
    }
}
