// This module turns the instruction streams produced by the x86-64 backend glue into machine
// code using the iced-x86 code assembler. X64Encoder maps AsmReg register references onto
// iced registers (general purpose registers in bank 0, XMM registers in bank 1) and encodes the
// small instruction set the prologue, epilogue, argument moves and call lowering need: push,
// pop, mov/movaps, add/sub with immediates, call, ret and raw data bytes for the literal pool.
// Labels in the stream become iced CodeLabels, so calls between functions encoded into the same
// buffer resolve directly, in either direction. Calls to anything else go through a
// caller-supplied table of symbol addresses; a call target that is neither a label nor a known
// symbol is reported when the buffer is finalized.

//! x86-64 instruction encoding using iced-x86.

use hashbrown::{HashMap, HashSet};
use iced_x86::code_asm::*;
use iced_x86::IcedError;
use thiserror::Error;

use super::inst::X64Inst;
use crate::core::register_file::AsmReg;

/// Error types for instruction encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("invalid register {0:?} for operation")]
    InvalidRegister(AsmReg),

    #[error("immediate {0} does not fit in 32 bits")]
    ImmediateOutOfRange(u32),

    #[error("unknown call target {0}")]
    UnknownSymbol(String),

    #[error("label {0} defined twice")]
    DuplicateLabel(String),

    #[error("assembly error: {0}")]
    AssemblyError(String),
}

fn asm_err(e: IcedError) -> EncodingError {
    EncodingError::AssemblyError(e.to_string())
}

/// x86-64 instruction encoder using iced-x86.
pub struct X64Encoder {
    assembler: CodeAssembler,
    /// Address the first encoded byte is placed at.
    base: u64,
    labels: HashMap<String, CodeLabel>,
    placed: HashSet<String>,
    symbols: HashMap<String, u64>,
}

impl X64Encoder {
    pub fn new(base: u64) -> Result<Self, EncodingError> {
        let assembler = CodeAssembler::new(64).map_err(asm_err)?;
        Ok(Self {
            assembler,
            base,
            labels: HashMap::new(),
            placed: HashSet::new(),
            symbols: HashMap::new(),
        })
    }

    /// Make an external function callable by name.
    pub fn define_symbol(&mut self, name: impl Into<String>, address: u64) {
        self.symbols.insert(name.into(), address);
    }

    /// Convert AsmReg to iced-x86 64-bit GP register.
    fn to_gp64_register(reg: AsmReg) -> Result<AsmRegister64, EncodingError> {
        const GP64_REGS: [AsmRegister64; 16] = [
            rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8, r9, r10, r11, r12, r13, r14, r15,
        ];

        if reg.bank != 0 {
            return Err(EncodingError::InvalidRegister(reg));
        }
        GP64_REGS
            .get(reg.id as usize)
            .copied()
            .ok_or(EncodingError::InvalidRegister(reg))
    }

    /// Convert AsmReg to iced-x86 Register for XMM registers.
    fn to_xmm_register(reg: AsmReg) -> Result<AsmRegisterXmm, EncodingError> {
        const XMM_REGS: [AsmRegisterXmm; 16] = [
            xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, xmm10, xmm11, xmm12,
            xmm13, xmm14, xmm15,
        ];

        if reg.bank != 1 {
            return Err(EncodingError::InvalidRegister(reg));
        }
        XMM_REGS
            .get(reg.id as usize)
            .copied()
            .ok_or(EncodingError::InvalidRegister(reg))
    }

    fn label(&mut self, name: &str) -> CodeLabel {
        if let Some(&label) = self.labels.get(name) {
            return label;
        }
        let label = self.assembler.create_label();
        self.labels.insert(name.to_string(), label);
        label
    }

    fn imm(value: u32) -> Result<i32, EncodingError> {
        i32::try_from(value).map_err(|_| EncodingError::ImmediateOutOfRange(value))
    }

    /// Append an instruction stream to the buffer.
    pub fn encode(&mut self, code: &[X64Inst]) -> Result<(), EncodingError> {
        // Labels of this stream take precedence over external symbols.
        for inst in code {
            if let X64Inst::Label(name) = inst {
                self.label(name);
            }
        }
        for inst in code {
            self.encode_one(inst)?;
        }
        Ok(())
    }

    fn encode_one(&mut self, inst: &X64Inst) -> Result<(), EncodingError> {
        match inst {
            X64Inst::Label(name) => {
                if !self.placed.insert(name.clone()) {
                    return Err(EncodingError::DuplicateLabel(name.clone()));
                }
                let mut label = self.label(name);
                self.assembler.set_label(&mut label).map_err(asm_err)?;
            }
            X64Inst::Push(reg) => {
                let reg = Self::to_gp64_register(*reg)?;
                self.assembler.push(reg).map_err(asm_err)?;
            }
            X64Inst::Pop(reg) => {
                let reg = Self::to_gp64_register(*reg)?;
                self.assembler.pop(reg).map_err(asm_err)?;
            }
            X64Inst::SubImm { reg, imm } => {
                let reg = Self::to_gp64_register(*reg)?;
                self.assembler.sub(reg, Self::imm(*imm)?).map_err(asm_err)?;
            }
            X64Inst::AddImm { reg, imm } => {
                let reg = Self::to_gp64_register(*reg)?;
                self.assembler.add(reg, Self::imm(*imm)?).map_err(asm_err)?;
            }
            X64Inst::Mov { dst, src } if dst.bank == 1 => {
                let dst = Self::to_xmm_register(*dst)?;
                let src = Self::to_xmm_register(*src)?;
                self.assembler.movaps(dst, src).map_err(asm_err)?;
            }
            X64Inst::Mov { dst, src } => {
                let dst = Self::to_gp64_register(*dst)?;
                let src = Self::to_gp64_register(*src)?;
                self.assembler.mov(dst, src).map_err(asm_err)?;
            }
            X64Inst::Call(target) => {
                if !self.labels.contains_key(target.as_str()) {
                    if let Some(&address) = self.symbols.get(target.as_str()) {
                        self.assembler.call(address).map_err(asm_err)?;
                        return Ok(());
                    }
                }
                // Resolved by a later stream or reported by finalize.
                let label = self.label(target);
                self.assembler.call(label).map_err(asm_err)?;
            }
            X64Inst::Ret => self.assembler.ret().map_err(asm_err)?,
            X64Inst::Db(byte) => self.assembler.db(&[*byte]).map_err(asm_err)?,
        }
        Ok(())
    }

    /// Generate the final machine code bytes.
    pub fn finalize(mut self) -> Result<Vec<u8>, EncodingError> {
        let mut unresolved: Vec<&String> = self
            .labels
            .keys()
            .filter(|name| !self.placed.contains(*name))
            .collect();
        unresolved.sort();
        if let Some(name) = unresolved.first() {
            return Err(EncodingError::UnknownSymbol((*name).clone()));
        }
        self.assembler.assemble(self.base).map_err(asm_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x64::registers::{RBP, RBX, RCX, RSP};

    #[test]
    fn test_minimal_frame_bytes() {
        let mut encoder = X64Encoder::new(0x1000).unwrap();
        encoder
            .encode(&[
                X64Inst::Label("f".into()),
                X64Inst::Push(RBP),
                X64Inst::Mov { dst: RBP, src: RSP },
                X64Inst::Pop(RBP),
                X64Inst::Ret,
            ])
            .unwrap();
        let code = encoder.finalize().unwrap();
        assert_eq!(code, vec![0x55, 0x48, 0x89, 0xe5, 0x5d, 0xc3]);
    }

    #[test]
    fn test_calls_resolve_labels_and_symbols() {
        let mut encoder = X64Encoder::new(0x1000).unwrap();
        encoder.define_symbol("puts", 0x2000);
        encoder
            .encode(&[
                X64Inst::Label("main".into()),
                X64Inst::Call("helper".into()),
                X64Inst::Call("puts".into()),
                X64Inst::Ret,
            ])
            .unwrap();
        encoder
            .encode(&[X64Inst::Label("helper".into()), X64Inst::Ret])
            .unwrap();
        let code = encoder.finalize().unwrap();
        assert_eq!(code[0], 0xe8);
        assert_eq!(*code.last().unwrap(), 0xc3);
    }

    #[test]
    fn test_unknown_call_target() {
        let mut encoder = X64Encoder::new(0).unwrap();
        encoder
            .encode(&[X64Inst::Call("missing".into()), X64Inst::Ret])
            .unwrap();
        assert_eq!(
            encoder.finalize().unwrap_err(),
            EncodingError::UnknownSymbol("missing".into())
        );
    }

    #[test]
    fn test_rejects_bad_operands() {
        let mut encoder = X64Encoder::new(0).unwrap();
        let err = encoder
            .encode(&[X64Inst::Push(AsmReg::new(1, 0))])
            .unwrap_err();
        assert_eq!(err, EncodingError::InvalidRegister(AsmReg::new(1, 0)));

        let err = encoder
            .encode(&[X64Inst::SubImm { reg: RSP, imm: u32::MAX }])
            .unwrap_err();
        assert_eq!(err, EncodingError::ImmediateOutOfRange(u32::MAX));

        encoder.encode(&[X64Inst::Label("a".into()), X64Inst::Push(RBX)]).unwrap();
        let err = encoder
            .encode(&[X64Inst::Label("a".into()), X64Inst::Push(RCX)])
            .unwrap_err();
        assert_eq!(err, EncodingError::DuplicateLabel("a".into()));
    }
}
