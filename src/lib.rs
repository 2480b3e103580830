//! TPDE wasm - structured control flow lowering and x86-64 ABI glue.
//!
//! The crate has two halves that meet at the [`ir`] module. The front end
//! ([`wasm`]) lowers decoded WebAssembly function bodies, with their nested
//! `block`/`loop`/`if` regions and depth-indexed branches, into typed SSA IR
//! with explicit phi nodes. The backend half ([`x64`]) implements the
//! [`Architecture`] contract for x86-64 System V: argument and return
//! locations, call lowering with a LIFO caller-save bracket, prologue and
//! epilogue generation and the per-function literal pool.
//!
//! # Primary Usage
//!
//! ```ignore
//! use bumpalo::Bump;
//! use tpde_wasm::{wasm_to_ir, CompilationSession, LowerOptions, X86_64};
//!
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let ir = wasm_to_ir(&module, &X86_64, &session, &LowerOptions::default())?;
//! println!("{ir}");
//! println!("{}", session.stats());
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Shared infrastructure (errors, session, registers, frames, the architecture trait)
//! - [`ir`] - The SSA IR, its builder, printer and verifier
//! - [`wasm`] - Decoded module model and the lowering engine
//! - [`x64`] - x86-64 registers, calling convention, glue generation and encoding

pub mod core;
pub mod ir;
pub mod wasm;
pub mod x64;

pub use crate::core::{
    Architecture, CompilationSession, CompileError, CompileResult, Frame, RegisterFile,
    SessionStats,
};
pub use crate::wasm::{wasm_to_ir, LowerOptions, WasmModule};
pub use crate::x64::X86_64;
