//! Canonical per-argument metadata used as the specialization cache key.
//!
//! A call's key is the ordered list of [`ArgumentMetaInfo`] records for its
//! tensor-bearing arguments. Tensor lists contribute one record per element, absent
//! optional tensors contribute nothing, and number arguments are materialized as
//! rank-0 tensors whose dtype is widened so that `1i32` and `1i64` share a key.

use crate::device::Device;
use crate::dtype::ScalarKind;
use crate::schema::{ArgType, Argument};
use crate::tensor::Tensor;
use crate::value::{Scalar, Value};

/// A size or stride entry: either a fixed extent or "any value".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymDim {
    Concrete(i64),
    Symbolic,
}

impl SymDim {
    pub fn concrete(self) -> Option<i64> {
        match self {
            SymDim::Concrete(value) => Some(value),
            SymDim::Symbolic => None,
        }
    }

    fn accepts(self, live: SymDim) -> bool {
        match self {
            SymDim::Symbolic => true,
            SymDim::Concrete(_) => self == live,
        }
    }
}

/// Widened value of a number argument.
///
/// Floats are stored by bit pattern so the key stays `Eq + Hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarValue {
    Float(u64),
    UInt(u64),
    Bool(bool),
}

impl ScalarValue {
    pub fn float(value: f64) -> Self {
        ScalarValue::Float(value.to_bits())
    }

    /// Integers widen by two's-complement reinterpretation.
    pub fn int(value: i64) -> Self {
        ScalarValue::UInt(value as u64)
    }

    pub fn as_f64(self) -> f64 {
        match self {
            ScalarValue::Float(bits) => f64::from_bits(bits),
            ScalarValue::UInt(value) => value as f64,
            ScalarValue::Bool(value) => f64::from(u8::from(value)),
        }
    }
}

/// Widens a number to the canonical key dtype: floats to `Float64`, integers to
/// `UInt64`, booleans stay `Bool`.
pub fn widen_scalar(scalar: Scalar) -> (ScalarKind, ScalarValue) {
    match scalar {
        Scalar::Bool(value) => (ScalarKind::Bool, ScalarValue::Bool(value)),
        Scalar::Int32(_) | Scalar::Int64(_) => {
            (ScalarKind::UInt64, ScalarValue::int(scalar.to_i64()))
        }
        Scalar::Float32(_) | Scalar::Float64(_) => {
            (ScalarKind::Float64, ScalarValue::float(scalar.to_f64()))
        }
    }
}

/// Key dtype of a number position holding a value of `kind`.
pub fn widen_kind(kind: ScalarKind) -> Option<ScalarKind> {
    if kind == ScalarKind::Bool {
        Some(ScalarKind::Bool)
    } else if kind.is_integral() {
        Some(ScalarKind::UInt64)
    } else if kind.is_floating() {
        Some(ScalarKind::Float64)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArgumentMetaInfo {
    pub is_dynamic: bool,
    pub dtype: ScalarKind,
    pub scalar_value: Option<ScalarValue>,
    pub device: Device,
    pub sizes: Vec<SymDim>,
    pub strides: Vec<SymDim>,
}

impl ArgumentMetaInfo {
    /// Fingerprints a live tensor. `is_number` marks positions declared as numbers,
    /// whose value becomes part of the key. Returns `None` when a number position
    /// does not hold a single element.
    pub fn from_tensor(tensor: &Tensor, is_number: bool) -> Option<Self> {
        let (dtype, scalar_value) = if is_number {
            let (dtype, value) = widen_scalar(tensor.item()?);
            (dtype, Some(value))
        } else {
            (tensor.dtype(), None)
        };
        Some(Self {
            is_dynamic: false,
            dtype,
            scalar_value,
            device: tensor.device().normalized(),
            sizes: tensor.sizes().iter().copied().map(SymDim::Concrete).collect(),
            strides: tensor.strides().iter().copied().map(SymDim::Concrete).collect(),
        })
    }

    pub fn has_symbolic_dims(&self) -> bool {
        self.sizes
            .iter()
            .chain(self.strides.iter())
            .any(|dim| *dim == SymDim::Symbolic)
    }

    /// Structural match where symbolic dims of `self` accept any live extent.
    pub fn matches_relaxed(&self, live: &ArgumentMetaInfo) -> bool {
        self.dtype == live.dtype
            && self.scalar_value == live.scalar_value
            && self.device == live.device
            && dims_accept(&self.sizes, &live.sizes)
            && dims_accept(&self.strides, &live.strides)
    }
}

fn dims_accept(declared: &[SymDim], live: &[SymDim]) -> bool {
    declared.len() == live.len()
        && declared
            .iter()
            .zip(live)
            .all(|(declared, live)| declared.accepts(*live))
}

/// Flattens the tensor-bearing arguments at the top of `stack`.
///
/// Number arguments are materialized as rank-0 tensors on `device` when
/// `with_scalars` is set and skipped otherwise. Returns `None` when any argument
/// holds a kind the gate cannot fingerprint.
pub fn unpack_tensors(
    arguments: &[Argument],
    stack: &[Value],
    device: Device,
    with_scalars: bool,
) -> Option<Vec<Tensor>> {
    let values = call_values(arguments, stack)?;
    let mut tensors = Vec::new();
    for (argument, value) in arguments.iter().zip(values) {
        match value {
            Value::Tensor(tensor) => tensors.push(tensor.clone()),
            Value::OptionalTensor(tensor) => tensors.extend(tensor.iter().cloned()),
            Value::TensorList(list) => tensors.extend(list.iter().cloned()),
            Value::OptionalTensorList(list) => tensors.extend(list.iter().flatten().cloned()),
            Value::Scalar(scalar) => {
                if with_scalars {
                    tensors.push(Tensor::scalar(*scalar, device));
                }
            }
            Value::None if argument.ty == ArgType::OptionalTensor => {}
            Value::None | Value::IntList(_) | Value::Str(_) => return None,
        }
    }
    Some(tensors)
}

/// For every tensor [`unpack_tensors`] yields with scalars included, the index of
/// the declaring argument.
pub fn tensor_parameter_index(arguments: &[Argument], stack: &[Value]) -> Vec<usize> {
    let Some(values) = call_values(arguments, stack) else {
        return Vec::new();
    };
    let mut index = Vec::new();
    for (idx, value) in values.iter().enumerate() {
        let count = match value {
            Value::Tensor(_) | Value::Scalar(_) => 1,
            Value::OptionalTensor(tensor) => usize::from(tensor.is_some()),
            Value::TensorList(list) => list.len(),
            Value::OptionalTensorList(list) => list.iter().flatten().count(),
            Value::None | Value::IntList(_) | Value::Str(_) => 0,
        };
        index.extend(std::iter::repeat(idx).take(count));
    }
    index
}

/// Live tensors (scalars included) paired with their key records.
pub(crate) struct ExtractedCall {
    pub tensors: Vec<Tensor>,
    pub meta: Vec<ArgumentMetaInfo>,
}

pub(crate) fn extract_call(
    arguments: &[Argument],
    stack: &[Value],
    device: Device,
) -> Option<ExtractedCall> {
    let tensors = unpack_tensors(arguments, stack, device, true)?;
    let index = tensor_parameter_index(arguments, stack);
    assert_eq!(
        index.len(),
        tensors.len(),
        "tensor parameter index does not line up with unpacked tensors"
    );
    let meta = tensors
        .iter()
        .zip(index)
        .map(|(tensor, idx)| {
            ArgumentMetaInfo::from_tensor(tensor, arguments[idx].ty.is_number())
        })
        .collect::<Option<Vec<_>>>()?;
    Some(ExtractedCall { tensors, meta })
}

/// Builds the cache key for a call. `None` means the call cannot use the cache.
pub fn extract_meta_info(
    arguments: &[Argument],
    stack: &[Value],
    device: Device,
) -> Option<Vec<ArgumentMetaInfo>> {
    extract_call(arguments, stack, device).map(|call| call.meta)
}

fn call_values<'a>(arguments: &[Argument], stack: &'a [Value]) -> Option<&'a [Value]> {
    let start = stack.len().checked_sub(arguments.len())?;
    Some(&stack[start..])
}
