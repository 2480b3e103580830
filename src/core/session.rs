// This module provides arena-based compilation session management using the bumpalo crate.
// CompilationSession borrows an arena owned by the caller and keeps the running statistics,
// which outlive any single function translation. Per-function scratch state (the operand
// stack and the pending-scope stack of the lowering engine) is allocated as bumpalo vectors in
// the same arena, so it shares the session lifetime and is released in one go when the caller
// drops the arena. SessionStats counts lowered functions, created and pruned blocks,
// materialized phis, lowered calls and a per-opcode breakdown of the bytecode instructions
// translated, which the demo binary prints after a run.

//! Arena-based compilation session management.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// Arena-backed state shared by every function of one compilation run.
pub struct CompilationSession<'arena> {
    arena: &'arena Bump,
    stats: RefCell<SessionStats>,
}

impl<'arena> CompilationSession<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    pub fn record_function_lowered(&self, name: &str, blocks: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.functions_lowered += 1;
        if blocks > stats.largest_function_blocks {
            stats.largest_function_blocks = blocks;
            stats.largest_function_name = name.to_string();
        }
    }

    pub fn record_instruction_lowered(&self, opcode: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.instructions_lowered += 1;
        *stats
            .instruction_counts
            .entry(opcode.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_block_created(&self) {
        self.stats.borrow_mut().blocks_created += 1;
    }

    pub fn record_blocks_pruned(&self, count: usize) {
        self.stats.borrow_mut().blocks_pruned += count;
    }

    pub fn record_phi_created(&self) {
        self.stats.borrow_mut().phis_created += 1;
    }

    pub fn record_call_lowered(&self, function_name: &str) {
        self.stats.borrow_mut().calls_lowered += 1;
        log::debug!("Call site recorded: {}", function_name);
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub functions_lowered: usize,
    pub instructions_lowered: usize,
    /// Count of each bytecode opcode translated.
    pub instruction_counts: HashMap<String, usize>,
    pub blocks_created: usize,
    /// Unreachable blocks removed after generation.
    pub blocks_pruned: usize,
    /// Phis that received at least one incoming value.
    pub phis_created: usize,
    pub calls_lowered: usize,
    pub largest_function_blocks: usize,
    pub largest_function_name: String,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Functions lowered: {}", self.functions_lowered)?;
        writeln!(f, "  Instructions lowered: {}", self.instructions_lowered)?;
        writeln!(f, "  Blocks created: {}", self.blocks_created)?;
        writeln!(f, "  Blocks pruned: {}", self.blocks_pruned)?;
        writeln!(f, "  Phis created: {}", self.phis_created)?;
        writeln!(f, "  Calls lowered: {}", self.calls_lowered)?;

        if !self.largest_function_name.is_empty() {
            writeln!(
                f,
                "  Largest function: {} ({} blocks)",
                self.largest_function_name, self.largest_function_blocks
            )?;
        }

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Instruction breakdown:")?;
            let mut sorted: Vec<_> = self.instruction_counts.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

            for (opcode, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", opcode, count)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_statistics() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        session.record_instruction_lowered("i32.add");
        session.record_instruction_lowered("i32.add");
        session.record_instruction_lowered("local.get");
        session.record_block_created();
        session.record_blocks_pruned(2);
        session.record_phi_created();
        session.record_call_lowered("puts");
        session.record_function_lowered("small", 2);
        session.record_function_lowered("big", 7);

        let stats = session.stats();
        assert_eq!(stats.instructions_lowered, 3);
        assert_eq!(stats.instruction_counts.get("i32.add"), Some(&2));
        assert_eq!(stats.blocks_pruned, 2);
        assert_eq!(stats.calls_lowered, 1);
        assert_eq!(stats.functions_lowered, 2);
        assert_eq!(stats.largest_function_name, "big");
    }

    #[test]
    fn test_statistics_display() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        session.record_instruction_lowered("i32.const");
        session.record_function_lowered("f", 1);

        let text = session.stats().to_string();
        assert!(text.contains("Functions lowered: 1"));
        assert!(text.contains("i32.const: 1"));
        assert!(text.contains("Largest function: f (1 blocks)"));
    }
}
