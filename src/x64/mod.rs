//! x86-64 architecture-specific components.
//!
//! - Register numbering and register classes
//! - System V argument/return register assignment
//! - Prologue, epilogue and call lowering ([`X86_64`])
//! - Instruction encoding using iced-x86

pub mod arch;
pub mod calling_convention;
pub mod encoder;
pub mod inst;
pub mod registers;

pub use arch::X86_64;
pub use calling_convention::SysVAssigner;
pub use encoder::{EncodingError, X64Encoder};
pub use inst::X64Inst;
