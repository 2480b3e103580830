//! Incremental IR construction.
//!
//! [`Builder`] keeps the module under construction, the function currently
//! being filled and the active block. Front ends only ever append at the end
//! of the active block; switching blocks is explicit.

use super::{Block, Function, GlobalId, GlobalVar, InstKind, Module, Type, Value};
use crate::core::error::{CompileError, CompileResult};

#[derive(Debug)]
pub struct Builder {
    module: Module,
    function: Option<Function>,
    block: Option<Block>,
}

impl Builder {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module: Module::new(module_name),
            function: None,
            block: None,
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn add_global(&mut self, global: GlobalVar) -> GlobalId {
        self.module.add_global(global)
    }

    /// Start a function returning `ret_type`.
    pub fn new_function(&mut self, name: impl Into<String>, ret_type: Type) -> CompileResult<()> {
        self.start(Function::new(name, Some(ret_type)))
    }

    /// Start a function without a return value.
    pub fn new_procedure(&mut self, name: impl Into<String>) -> CompileResult<()> {
        self.start(Function::new(name, None))
    }

    fn start(&mut self, function: Function) -> CompileResult<()> {
        if let Some(open) = &self.function {
            return Err(CompileError::invariant(format!(
                "starting {} while {} is still open",
                function.name, open.name
            )));
        }
        self.function = Some(function);
        self.block = None;
        Ok(())
    }

    pub fn function(&self) -> CompileResult<&Function> {
        self.function
            .as_ref()
            .ok_or_else(|| CompileError::invariant("no function under construction"))
    }

    pub fn function_mut(&mut self) -> CompileResult<&mut Function> {
        self.function
            .as_mut()
            .ok_or_else(|| CompileError::invariant("no function under construction"))
    }

    pub fn new_block(&mut self, name: impl Into<String>) -> CompileResult<Block> {
        Ok(self.function_mut()?.new_block(name))
    }

    pub fn set_block(&mut self, block: Block) {
        self.block = Some(block);
    }

    pub fn block(&self) -> CompileResult<Block> {
        self.block
            .ok_or_else(|| CompileError::invariant("no active block"))
    }

    /// Whether the active block already ends in a terminator.
    pub fn is_closed(&self) -> CompileResult<bool> {
        let block = self.block()?;
        Ok(self.function()?.is_closed(block))
    }

    /// Append an instruction to the active block.
    pub fn emit(
        &mut self,
        name: impl Into<String>,
        ty: Option<Type>,
        kind: InstKind,
    ) -> CompileResult<Value> {
        let block = self.block()?;
        self.function_mut()?.append(block, name, ty, kind)
    }

    /// Type of a value of the function under construction.
    pub fn ty(&self, value: Value) -> CompileResult<Option<Type>> {
        Ok(self.function()?.ty(value))
    }

    /// Close the current function and add it to the module.
    pub fn finish_function(&mut self) -> CompileResult<&Function> {
        let function = self
            .function
            .take()
            .ok_or_else(|| CompileError::invariant("no function under construction"))?;
        self.block = None;
        self.module.functions.push(function);
        Ok(&self.module.functions[self.module.functions.len() - 1])
    }

    pub fn finish(self) -> CompileResult<Module> {
        if let Some(open) = self.function {
            return Err(CompileError::invariant(format!(
                "function {} was never finished",
                open.name
            )));
        }
        Ok(self.module)
    }

    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ConstValue;

    #[test]
    fn test_build_procedure() {
        let mut b = Builder::new("m");
        b.new_procedure("p").unwrap();
        let entry = b.new_block("p_block1").unwrap();
        b.set_block(entry);
        b.emit("const", Some(Type::I32), InstKind::Const(ConstValue::Int(3)))
            .unwrap();
        assert!(!b.is_closed().unwrap());
        b.emit("", None, InstKind::Exit).unwrap();
        assert!(b.is_closed().unwrap());
        b.finish_function().unwrap();

        let module = b.finish().unwrap();
        assert_eq!(module.functions.len(), 1);
        assert!(module.function("p").unwrap().is_procedure());
    }

    #[test]
    fn test_nested_function_is_rejected() {
        let mut b = Builder::new("m");
        b.new_procedure("a").unwrap();
        assert!(b.new_procedure("b").is_err());
    }

    #[test]
    fn test_emit_without_block_is_rejected() {
        let mut b = Builder::new("m");
        b.new_procedure("a").unwrap();
        assert!(b.emit("", None, InstKind::Exit).is_err());
    }
}
