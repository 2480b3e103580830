// This module serves as the central hub for the shared infrastructure of tpde-wasm: the pieces
// that neither the IR, the bytecode front end nor a concrete target owns alone. It exports the
// error taxonomy every stage reports through, the arena-backed compilation session with its
// statistics, register identifiers, bitsets and classes together with the small register file
// that plays the allocator role after lowering, the per-function Frame record, and the
// Architecture contract (with VCall and the CallLiveness capability) that targets implement.

//! Core infrastructure shared by the front end and the targets.
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena-based memory allocation using `bumpalo`
//! - Lowering statistics
//!
//! ## Registers (`register_file`)
//! - Register identifiers, bitsets and classes
//! - Register file that records used registers and liveness over calls
//!
//! ## Backend contract (`arch`, `frame`)
//! - `Architecture` trait implemented once per target
//! - `Frame` record read by prologue and epilogue generation

pub mod arch;
pub mod error;
pub mod frame;
pub mod register_file;
pub mod session;

pub use arch::{Architecture, CallLiveness, VCall};
pub use error::{CompileError, CompileResult};
pub use frame::{Frame, PoolValue};
pub use register_file::{AsmReg, RegAllocError, RegBitSet, RegisterClass, RegisterFile};
pub use session::{CompilationSession, SessionStats};
