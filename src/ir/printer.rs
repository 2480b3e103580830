//! Textual IR dump.
//!
//! The format is meant for logs and test assertions, not for reparsing:
//!
//! ```text
//! module mainmodule
//! global global0 4 bytes align 4 = [2a 00 00 00]
//! external i32 puts(ptr)
//! function i32 add(i32 %0, i32 %1)
//!   add_block1:
//!     %2 = ptr alloc 4 align 4 ; local0
//!     store %0, %2
//!     %7 = i32 %5 + %6 ; add
//!     return %7
//! ```

use std::fmt::{self, Write};

use super::{Function, InstKind, Module, Value};

fn write_inst(f: &mut impl Write, func: &Function, value: Value) -> fmt::Result {
    let data = func.value(value);
    if let Some(ty) = data.ty {
        write!(f, "{value} = {ty} ")?;
    }
    match &data.kind {
        InstKind::Param { index } => write!(f, "param {index}")?,
        InstKind::Const(c) => write!(f, "const {c}")?,
        InstKind::Alloc { size, align } => write!(f, "alloc {size} align {align}")?,
        InstKind::GlobalAddr(id) => write!(f, "global {}", id.0)?,
        InstKind::Binop { op, lhs, rhs } => write!(f, "{lhs} {} {rhs}", op.symbol())?,
        InstKind::Unop { operand, .. } => write!(f, "-{operand}")?,
        InstKind::Cast { operand } => write!(f, "cast {operand}")?,
        InstKind::Load { addr } => write!(f, "load {addr}")?,
        InstKind::Store { value, addr } => write!(f, "store {value}, {addr}")?,
        InstKind::Phi { incoming } => {
            f.write_str("phi")?;
            for (i, (block, v)) in incoming.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(f, "{sep}{}: {v}", func.block(*block).name)?;
            }
        }
        InstKind::Call(vcall) => {
            write!(f, "call {}(", vcall.function_name)?;
            for (i, arg) in vcall.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{arg}")?;
            }
            f.write_str(")")?;
        }
        InstKind::Jump { target } => write!(f, "jmp {}", func.block(*target).name)?,
        InstKind::CJump { lhs, cond, rhs, yes, no } => write!(
            f,
            "cjmp {lhs} {} {rhs} ? {} : {}",
            cond.symbol(),
            func.block(*yes).name,
            func.block(*no).name
        )?,
        InstKind::Return { value } => write!(f, "return {value}")?,
        InstKind::Exit => f.write_str("exit")?,
    }
    if data.ty.is_some() && !data.name.is_empty() {
        write!(f, " ; {}", data.name)?;
    }
    Ok(())
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ret_type {
            Some(ty) => write!(f, "function {ty} {}(", self.name)?,
            None => write!(f, "procedure {}(", self.name)?,
        }
        for (i, &param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if let Some(ty) = self.ty(param) {
                write!(f, "{ty} ")?;
            }
            write!(f, "{param}")?;
        }
        writeln!(f, ")")?;

        for &block in self.blocks() {
            writeln!(f, "  {}:", self.block(block).name)?;
            for &inst in &self.block(block).insts {
                f.write_str("    ")?;
                write_inst(f, self, inst)?;
                f.write_char('\n')?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        for global in &self.globals {
            write!(
                f,
                "global {} {} bytes align {} = [",
                global.name, global.size, global.align
            )?;
            for (i, byte) in global.value.iter().enumerate() {
                let sep = if i == 0 { "" } else { " " };
                write!(f, "{sep}{byte:02x}")?;
            }
            writeln!(f, "]")?;
        }
        for ext in &self.externals {
            match ext.ret_type {
                Some(ty) => write!(f, "external {ty} {}(", ext.name)?,
                None => write!(f, "external {}(", ext.name)?,
            }
            for (i, ty) in ext.params.iter().enumerate() {
                let sep = if i == 0 { "" } else { ", " };
                write!(f, "{sep}{ty}")?;
            }
            writeln!(f, ")")?;
        }
        for function in &self.functions {
            write!(f, "{function}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{BinOp, Function, InstKind, Type};

    #[test]
    fn test_print_function() {
        let mut func = Function::new("add", Some(Type::I32));
        let a = func.add_param("param0", Type::I32);
        let b = func.add_param("param1", Type::I32);
        let entry = func.new_block("add_block1");
        let sum = func
            .append(entry, "add", Some(Type::I32), InstKind::Binop {
                op: BinOp::Add,
                lhs: a,
                rhs: b,
            })
            .unwrap();
        func.append(entry, "", None, InstKind::Return { value: sum })
            .unwrap();

        let text = func.to_string();
        assert_eq!(
            text,
            "function i32 add(i32 %0, i32 %1)\n  add_block1:\n    %2 = i32 %0 + %1 ; add\n    return %2\n"
        );
    }
}
