use serde::Serialize;

use crate::dtype::ScalarKind;
use crate::tensor::Tensor;

/// A number or boolean passed by value to an operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
}

impl Scalar {
    pub fn kind(self) -> ScalarKind {
        match self {
            Scalar::Bool(_) => ScalarKind::Bool,
            Scalar::Int32(_) => ScalarKind::Int32,
            Scalar::Int64(_) => ScalarKind::Int64,
            Scalar::Float32(_) => ScalarKind::Float32,
            Scalar::Float64(_) => ScalarKind::Float64,
        }
    }

    pub fn to_le_bytes(self) -> Vec<u8> {
        match self {
            Scalar::Bool(value) => vec![u8::from(value)],
            Scalar::Int32(value) => value.to_le_bytes().to_vec(),
            Scalar::Int64(value) => value.to_le_bytes().to_vec(),
            Scalar::Float32(value) => value.to_le_bytes().to_vec(),
            Scalar::Float64(value) => value.to_le_bytes().to_vec(),
        }
    }

    pub fn from_le_bytes(kind: ScalarKind, bytes: &[u8]) -> Option<Self> {
        match kind {
            ScalarKind::Bool => bytes.first().map(|byte| Scalar::Bool(*byte != 0)),
            ScalarKind::Int32 => Some(Scalar::Int32(i32::from_le_bytes(
                bytes.get(..4)?.try_into().ok()?,
            ))),
            ScalarKind::Int64 => Some(Scalar::Int64(i64::from_le_bytes(
                bytes.get(..8)?.try_into().ok()?,
            ))),
            ScalarKind::Float32 => Some(Scalar::Float32(f32::from_le_bytes(
                bytes.get(..4)?.try_into().ok()?,
            ))),
            ScalarKind::Float64 => Some(Scalar::Float64(f64::from_le_bytes(
                bytes.get(..8)?.try_into().ok()?,
            ))),
            _ => None,
        }
    }

    pub fn to_f64(self) -> f64 {
        match self {
            Scalar::Bool(value) => f64::from(u8::from(value)),
            Scalar::Int32(value) => f64::from(value),
            Scalar::Int64(value) => value as f64,
            Scalar::Float32(value) => f64::from(value),
            Scalar::Float64(value) => value,
        }
    }

    pub fn to_i64(self) -> i64 {
        match self {
            Scalar::Bool(value) => i64::from(value),
            Scalar::Int32(value) => i64::from(value),
            Scalar::Int64(value) => value,
            Scalar::Float32(value) => value as i64,
            Scalar::Float64(value) => value as i64,
        }
    }
}

/// One entry on an operator call stack.
///
/// The set of kinds is closed; anything the gate cannot fingerprint is represented
/// by the non-tensor variants and makes the call ineligible for the fast path.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Tensor(Tensor),
    OptionalTensor(Option<Tensor>),
    TensorList(Vec<Tensor>),
    OptionalTensorList(Vec<Option<Tensor>>),
    Scalar(Scalar),
    IntList(Vec<i64>),
    Str(String),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Tensor(_) => "Tensor",
            Value::OptionalTensor(_) => "Tensor?",
            Value::TensorList(_) => "Tensor[]",
            Value::OptionalTensorList(_) => "Tensor?[]",
            Value::Scalar(_) => "Scalar",
            Value::IntList(_) => "int[]",
            Value::Str(_) => "str",
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(tensor) | Value::OptionalTensor(Some(tensor)) => Some(tensor),
            _ => None,
        }
    }
}

impl From<Tensor> for Value {
    fn from(tensor: Tensor) -> Self {
        Value::Tensor(tensor)
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        Value::Scalar(scalar)
    }
}
