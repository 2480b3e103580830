//! Scalar IR types.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    I8,
    I32,
    I64,
    F32,
    F64,
    /// Native pointer, 8 bytes on every supported target.
    Ptr,
}

impl Type {
    /// Size in bytes.
    pub const fn size(self) -> u32 {
        match self {
            Type::I8 => 1,
            Type::I32 | Type::F32 => 4,
            Type::I64 | Type::F64 | Type::Ptr => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Type::I8 => "i8",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::Ptr => "ptr",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
