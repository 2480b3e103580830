//! IR functions: value and block arenas plus the block layout.

use hashbrown::HashSet;

use super::{Block, InstKind, Type, Value};
use crate::core::error::{CompileError, CompileResult};

/// Definition of a single value.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueData {
    pub name: String,
    /// `None` for instructions that produce nothing (stores, terminators).
    pub ty: Option<Type>,
    pub kind: InstKind,
    /// Defining block; `None` for parameters.
    pub block: Option<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockData {
    pub name: String,
    pub insts: Vec<Value>,
}

/// A function, or a procedure when `ret_type` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Value>,
    pub ret_type: Option<Type>,
    values: Vec<ValueData>,
    blocks: Vec<BlockData>,
    /// Live blocks in creation order. Pruned blocks stay in the arena but
    /// leave the layout.
    layout: Vec<Block>,
    entry: Option<Block>,
}

impl Function {
    pub fn new(name: impl Into<String>, ret_type: Option<Type>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            ret_type,
            values: Vec::new(),
            blocks: Vec::new(),
            layout: Vec::new(),
            entry: None,
        }
    }

    pub fn is_procedure(&self) -> bool {
        self.ret_type.is_none()
    }

    pub fn add_param(&mut self, name: impl Into<String>, ty: Type) -> Value {
        let index = self.params.len() as u32;
        let value = self.push_value(ValueData {
            name: name.into(),
            ty: Some(ty),
            kind: InstKind::Param { index },
            block: None,
        });
        self.params.push(value);
        value
    }

    /// Create a block. The first block created becomes the entry block.
    pub fn new_block(&mut self, name: impl Into<String>) -> Block {
        let block = Block(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            name: name.into(),
            insts: Vec::new(),
        });
        self.layout.push(block);
        if self.entry.is_none() {
            self.entry = Some(block);
        }
        block
    }

    pub fn entry(&self) -> Option<Block> {
        self.entry
    }

    /// Append an instruction to the end of `block`.
    pub fn append(
        &mut self,
        block: Block,
        name: impl Into<String>,
        ty: Option<Type>,
        kind: InstKind,
    ) -> CompileResult<Value> {
        if !self.contains_block(block) {
            return Err(CompileError::invariant(format!(
                "block {} does not belong to {}",
                block.0, self.name
            )));
        }
        if self.is_closed(block) {
            return Err(CompileError::invariant(format!(
                "emitting {} into closed block {}",
                kind.mnemonic(),
                self.block(block).name
            )));
        }
        let value = self.push_value(ValueData {
            name: name.into(),
            ty,
            kind,
            block: Some(block),
        });
        self.blocks[block.0 as usize].insts.push(value);
        Ok(value)
    }

    fn push_value(&mut self, data: ValueData) -> Value {
        let value = Value(self.values.len() as u32);
        self.values.push(data);
        value
    }

    fn contains_block(&self, block: Block) -> bool {
        self.layout.contains(&block)
    }

    pub fn value(&self, value: Value) -> &ValueData {
        &self.values[value.0 as usize]
    }

    pub fn ty(&self, value: Value) -> Option<Type> {
        self.values[value.0 as usize].ty
    }

    pub fn block(&self, block: Block) -> &BlockData {
        &self.blocks[block.0 as usize]
    }

    /// Live blocks in layout order.
    pub fn blocks(&self) -> &[Block] {
        &self.layout
    }

    pub fn terminator(&self, block: Block) -> Option<&InstKind> {
        self.block(block)
            .insts
            .last()
            .map(|&v| &self.value(v).kind)
            .filter(|kind| kind.is_terminator())
    }

    pub fn is_closed(&self, block: Block) -> bool {
        self.terminator(block).is_some()
    }

    pub fn successors(&self, block: Block) -> Vec<Block> {
        self.terminator(block)
            .map(InstKind::successors)
            .unwrap_or_default()
    }

    /// Blocks with a terminator jumping into `block`, each listed once.
    pub fn predecessors(&self, block: Block) -> Vec<Block> {
        self.layout
            .iter()
            .copied()
            .filter(|&b| self.successors(b).contains(&block))
            .collect()
    }

    /// Redirect the branch of `block`'s terminator that targets `from` to `to`.
    pub fn retarget(&mut self, block: Block, from: Block, to: Block) -> CompileResult<()> {
        let Some(&last) = self.block(block).insts.last() else {
            return Err(CompileError::invariant(format!(
                "retargeting empty block {}",
                self.block(block).name
            )));
        };
        let slot = match &mut self.values[last.0 as usize].kind {
            InstKind::Jump { target } if *target == from => Some(target),
            InstKind::CJump { yes, .. } if *yes == from => Some(yes),
            InstKind::CJump { no, .. } if *no == from => Some(no),
            _ => None,
        };
        match slot {
            Some(slot) => {
                *slot = to;
                Ok(())
            }
            None => Err(CompileError::invariant(format!(
                "block {} does not branch to {}",
                self.block(block).name,
                self.block(from).name
            ))),
        }
    }

    pub fn phis(&self, block: Block) -> impl Iterator<Item = Value> + '_ {
        self.block(block)
            .insts
            .iter()
            .copied()
            .filter(move |&v| matches!(self.value(v).kind, InstKind::Phi { .. }))
    }

    /// Blocks reachable from the entry block.
    pub fn reachable(&self) -> HashSet<Block> {
        let mut seen = HashSet::new();
        let Some(entry) = self.entry else {
            return seen;
        };
        let mut work = vec![entry];
        while let Some(block) = work.pop() {
            if seen.insert(block) {
                work.extend(self.successors(block));
            }
        }
        seen
    }

    /// Remove blocks unreachable from the entry block.
    ///
    /// Phi entries coming from removed blocks are dropped. Returns the number
    /// of blocks removed; a second call always returns zero.
    pub fn delete_unreachable(&mut self) -> usize {
        let reachable = self.reachable();
        let before = self.layout.len();
        self.layout.retain(|b| reachable.contains(b));
        let removed = before - self.layout.len();
        if removed == 0 {
            return 0;
        }

        for &block in &self.layout {
            for &inst in &self.blocks[block.0 as usize].insts {
                if let InstKind::Phi { incoming } = &mut self.values[inst.0 as usize].kind {
                    incoming.retain(|(pred, _)| reachable.contains(pred));
                }
            }
        }
        log::debug!("{}: pruned {} unreachable blocks", self.name, removed);
        removed
    }
}
