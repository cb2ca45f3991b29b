use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, GateResult};

const DTYPE_NAMESPACE_PREFIX: &str = "torch.";

/// Element types a specialized kernel can be keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Bool,
    UInt8,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt64,
    Float16,
    BFloat16,
    Float32,
    Float64,
    Complex64,
    Complex128,
}

impl ScalarKind {
    /// Returns `true` for signed and unsigned integers. `Bool` is not an integer here.
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            ScalarKind::UInt8
                | ScalarKind::Int8
                | ScalarKind::Int16
                | ScalarKind::Int32
                | ScalarKind::Int64
                | ScalarKind::UInt64
        )
    }

    /// Returns `true` for real floating-point kinds.
    pub fn is_floating(self) -> bool {
        matches!(
            self,
            ScalarKind::Float16 | ScalarKind::BFloat16 | ScalarKind::Float32 | ScalarKind::Float64
        )
    }

    pub fn is_complex(self) -> bool {
        matches!(self, ScalarKind::Complex64 | ScalarKind::Complex128)
    }

    pub fn byte_size(self) -> usize {
        match self {
            ScalarKind::Bool | ScalarKind::UInt8 | ScalarKind::Int8 => 1,
            ScalarKind::Int16 | ScalarKind::Float16 | ScalarKind::BFloat16 => 2,
            ScalarKind::Int32 | ScalarKind::Float32 => 4,
            ScalarKind::Int64 | ScalarKind::UInt64 | ScalarKind::Float64 => 8,
            ScalarKind::Complex64 => 8,
            ScalarKind::Complex128 => 16,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::UInt8 => "uint8",
            ScalarKind::Int8 => "int8",
            ScalarKind::Int16 => "int16",
            ScalarKind::Int32 => "int32",
            ScalarKind::Int64 => "int64",
            ScalarKind::UInt64 => "uint64",
            ScalarKind::Float16 => "float16",
            ScalarKind::BFloat16 => "bfloat16",
            ScalarKind::Float32 => "float32",
            ScalarKind::Float64 => "float64",
            ScalarKind::Complex64 => "complex64",
            ScalarKind::Complex128 => "complex128",
        }
    }

    /// Parses a persisted dtype name such as `torch.float32` or `float32`.
    ///
    /// Only the kinds a persistent cache record may carry are recognized; anything
    /// else is a configuration error.
    pub fn parse(name: &str) -> GateResult<Self> {
        let canonical = match name.find(DTYPE_NAMESPACE_PREFIX) {
            Some(pos) => &name[pos + DTYPE_NAMESPACE_PREFIX.len()..],
            None => name,
        };
        match canonical {
            "float32" => Ok(ScalarKind::Float32),
            "int32" => Ok(ScalarKind::Int32),
            "int64" => Ok(ScalarKind::Int64),
            "bool" => Ok(ScalarKind::Bool),
            "bfloat16" => Ok(ScalarKind::BFloat16),
            "float16" => Ok(ScalarKind::Float16),
            "float64" => Ok(ScalarKind::Float64),
            "uint8" => Ok(ScalarKind::UInt8),
            "int8" => Ok(ScalarKind::Int8),
            "complex64" => Ok(ScalarKind::Complex64),
            "complex128" => Ok(ScalarKind::Complex128),
            _ => Err(GateError::UnknownDType(canonical.to_string())),
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strips_optional_namespace_prefix() {
        assert_eq!(ScalarKind::parse("torch.float32").unwrap(), ScalarKind::Float32);
        assert_eq!(ScalarKind::parse("float32").unwrap(), ScalarKind::Float32);
        assert_eq!(ScalarKind::parse("torch.bfloat16").unwrap(), ScalarKind::BFloat16);
        assert_eq!(ScalarKind::parse("complex128").unwrap(), ScalarKind::Complex128);
    }

    #[test]
    fn parse_rejects_unknown_names() {
        let err = ScalarKind::parse("torch.float8_e4m3fn").unwrap_err();
        assert!(matches!(err, GateError::UnknownDType(name) if name == "float8_e4m3fn"));
        assert!(ScalarKind::parse("uint64").is_err());
    }
}
