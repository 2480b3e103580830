//! Structural checks on a finished function.
//!
//! A function passes when every block is reachable from the entry block and
//! ends in exactly one terminator, phis sit at the start of their block with
//! one incoming entry per predecessor, and binary operands agree with the
//! result type.

use hashbrown::HashSet;

use super::{Block, Function, InstKind};
use crate::core::error::{CompileError, CompileResult};

pub fn verify_function(func: &Function) -> CompileResult<()> {
    let entry = func
        .entry()
        .ok_or_else(|| CompileError::invariant(format!("{} has no entry block", func.name)))?;
    let reachable = func.reachable();

    for &block in func.blocks() {
        let data = func.block(block);
        if !reachable.contains(&block) {
            return Err(fail(func, block, "unreachable from entry"));
        }
        if block == entry && func.phis(block).next().is_some() {
            return Err(fail(func, block, "entry block has phis"));
        }

        let Some((&last, body)) = data.insts.split_last() else {
            return Err(fail(func, block, "empty block"));
        };
        if !func.value(last).kind.is_terminator() {
            return Err(fail(func, block, "does not end in a terminator"));
        }

        let mut in_phi_prefix = true;
        for &inst in body {
            let kind = &func.value(inst).kind;
            if kind.is_terminator() {
                return Err(fail(func, block, "terminator before end of block"));
            }
            match kind {
                InstKind::Phi { incoming } => {
                    if !in_phi_prefix {
                        return Err(fail(func, block, "phi after ordinary instruction"));
                    }
                    check_phi(func, block, incoming)?;
                }
                InstKind::Binop { lhs, rhs, .. } => {
                    in_phi_prefix = false;
                    let ty = func.value(inst).ty;
                    if func.ty(*lhs) != ty || func.ty(*rhs) != ty {
                        return Err(fail(func, block, "binop operand type differs from result"));
                    }
                }
                _ => in_phi_prefix = false,
            }
        }
    }
    Ok(())
}

fn check_phi(func: &Function, block: Block, incoming: &[(Block, super::Value)]) -> CompileResult<()> {
    let keys: HashSet<Block> = incoming.iter().map(|&(b, _)| b).collect();
    if keys.len() != incoming.len() {
        return Err(fail(func, block, "phi lists a predecessor twice"));
    }
    let preds: HashSet<Block> = func.predecessors(block).into_iter().collect();
    if keys != preds {
        return Err(fail(func, block, "phi incoming blocks differ from predecessors"));
    }
    Ok(())
}

fn fail(func: &Function, block: Block, what: &str) -> CompileError {
    CompileError::invariant(format!(
        "{}: block {} {}",
        func.name,
        func.block(block).name,
        what
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ConstValue, Type};

    #[test]
    fn test_unterminated_block_fails() {
        let mut f = Function::new("f", None);
        let b = f.new_block("b");
        f.append(b, "c", Some(Type::I32), InstKind::Const(ConstValue::Int(1)))
            .unwrap();
        assert!(verify_function(&f).is_err());
    }

    #[test]
    fn test_phi_missing_predecessor_fails() {
        let mut f = Function::new("f", Some(Type::I32));
        let entry = f.new_block("entry");
        let left = f.new_block("left");
        let join = f.new_block("join");
        let one = f
            .append(entry, "c", Some(Type::I32), InstKind::Const(ConstValue::Int(1)))
            .unwrap();
        f.append(entry, "", None, InstKind::CJump {
            lhs: one,
            cond: crate::ir::CmpCond::Eq,
            rhs: one,
            yes: left,
            no: join,
        })
        .unwrap();
        f.append(left, "", None, InstKind::Jump { target: join }).unwrap();
        let phi = f
            .append(join, "p", Some(Type::I32), InstKind::Phi {
                incoming: vec![(left, one)],
            })
            .unwrap();
        f.append(join, "", None, InstKind::Return { value: phi }).unwrap();

        let err = verify_function(&f).unwrap_err();
        assert!(err.to_string().contains("differ from predecessors"));
    }

    #[test]
    fn test_unreachable_block_fails_until_pruned() {
        let mut f = Function::new("f", None);
        let entry = f.new_block("entry");
        let dead = f.new_block("dead");
        f.append(entry, "", None, InstKind::Exit).unwrap();
        f.append(dead, "", None, InstKind::Exit).unwrap();
        assert!(verify_function(&f).is_err());
        f.delete_unreachable();
        verify_function(&f).unwrap();
    }
}
