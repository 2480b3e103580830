// This module defines the error taxonomy for tpde-wasm using the thiserror crate. Every failure
// is fatal to the compilation unit it occurs in: lowering is a pure, deterministic
// transformation, so nothing is retried and partial output must be discarded. CompileError
// separates bad input the toolkit does not implement (UnsupportedConstruct), values stored into
// a slot of a different type (TypeMismatch), signatures that do not fit the register-only
// calling convention (ConventionOverflow), structurally broken bytecode (Malformed), and bugs
// in the lowering engine itself (InternalInvariant). Register allocation and encoding errors
// from the backend helpers are folded in through #[from] conversions.

//! Error types for the lowering engine and the architecture backends.

use thiserror::Error;

use crate::core::register_file::RegAllocError;
use crate::ir::Type;
use crate::x64::encoder::EncodingError;

/// Main error type for a compilation unit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Unsupported construct: {what}")]
    UnsupportedConstruct { what: String },

    #[error("Type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        expected: Type,
        found: Type,
        context: &'static str,
    },

    #[error("Calling convention overflow: {count} {bank} arguments, only {available} registers")]
    ConventionOverflow {
        bank: &'static str,
        count: usize,
        available: usize,
    },

    #[error("Internal invariant violated: {reason}")]
    InternalInvariant { reason: String },

    #[error("Malformed function body: {reason}")]
    Malformed { reason: String },

    #[error("Register allocation failed: {0}")]
    RegisterAllocation(#[from] RegAllocError),

    #[error("Encoding failed: {0}")]
    Encoding(#[from] EncodingError),
}

impl CompileError {
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::UnsupportedConstruct { what: what.into() }
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        Self::InternalInvariant {
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_construct() {
        let err = CompileError::unsupported("opcode br_table");
        assert_eq!(err.to_string(), "Unsupported construct: opcode br_table");

        let err = CompileError::TypeMismatch {
            expected: Type::I32,
            found: Type::F64,
            context: "local.set",
        };
        assert_eq!(
            err.to_string(),
            "Type mismatch in local.set: expected i32, found f64"
        );
    }

    #[test]
    fn test_overflow_message() {
        let err = CompileError::ConventionOverflow {
            bank: "integer",
            count: 7,
            available: 6,
        };
        assert!(err.to_string().contains("7 integer arguments"));
    }
}
