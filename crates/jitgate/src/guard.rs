use crate::device::{Device, DispatchKeySet};
use crate::dtype::ScalarKind;
use crate::meta::{widen_kind, ArgumentMetaInfo};
use crate::tensor::Tensor;

/// Dispatch context of the call being matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalState {
    dispatch_keys: DispatchKeySet,
}

impl LocalState {
    pub fn new(dispatch_keys: DispatchKeySet) -> Self {
        Self { dispatch_keys }
    }

    pub fn dispatch_keys(&self) -> DispatchKeySet {
        self.dispatch_keys
    }

    /// The live context must run on every backend the specialization was built for
    /// and carry exactly the same autograd/tracing context keys.
    fn is_compatible_with(&self, recorded: DispatchKeySet) -> bool {
        self.dispatch_keys
            .is_superset_of(recorded.backend_keys())
            && self.dispatch_keys.context_keys() == recorded.context_keys()
    }
}

/// Why a guard rejected a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardFailure {
    DType {
        expected: ScalarKind,
        actual: ScalarKind,
    },
    Device {
        expected: Device,
        actual: Device,
    },
    DispatchKeys,
    Rank {
        expected: usize,
        actual: usize,
    },
    Size {
        dim: usize,
        expected: i64,
        actual: i64,
    },
    Stride {
        dim: usize,
        expected: i64,
        actual: i64,
    },
}

/// Per-position predicate built once per specialization.
///
/// `None` entries in `sizes`/`strides` are unconstrained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorGuard {
    dtype: ScalarKind,
    number: bool,
    device: Device,
    dispatch_keys: DispatchKeySet,
    sizes: Vec<Option<i64>>,
    strides: Vec<Option<i64>>,
}

impl TensorGuard {
    pub fn new(
        dtype: ScalarKind,
        device: Device,
        dispatch_keys: DispatchKeySet,
        sizes: Vec<Option<i64>>,
        strides: Vec<Option<i64>>,
    ) -> Self {
        Self {
            dtype,
            number: false,
            device: device.normalized(),
            dispatch_keys,
            sizes,
            strides,
        }
    }

    /// Guard mirroring a key record; symbolic dims become unconstrained and number
    /// positions compare the live dtype after widening.
    pub fn from_meta(meta: &ArgumentMetaInfo, dispatch_keys: DispatchKeySet) -> Self {
        Self {
            dtype: meta.dtype,
            number: meta.scalar_value.is_some(),
            device: meta.device,
            dispatch_keys,
            sizes: meta.sizes.iter().map(|dim| dim.concrete()).collect(),
            strides: meta.strides.iter().map(|dim| dim.concrete()).collect(),
        }
    }

    pub fn check(&self, state: &LocalState, tensor: &Tensor) -> bool {
        self.failure(state, tensor).is_none()
    }

    pub fn failure(&self, state: &LocalState, tensor: &Tensor) -> Option<GuardFailure> {
        let actual = if self.number {
            widen_kind(tensor.dtype()).unwrap_or(tensor.dtype())
        } else {
            tensor.dtype()
        };
        if actual != self.dtype {
            return Some(GuardFailure::DType {
                expected: self.dtype,
                actual,
            });
        }

        let device = tensor.device().normalized();
        if device != self.device {
            return Some(GuardFailure::Device {
                expected: self.device,
                actual: device,
            });
        }

        if !state.is_compatible_with(self.dispatch_keys) {
            return Some(GuardFailure::DispatchKeys);
        }

        if tensor.rank() != self.sizes.len() || tensor.strides().len() != self.strides.len() {
            return Some(GuardFailure::Rank {
                expected: self.sizes.len(),
                actual: tensor.rank(),
            });
        }
        for (dim, (expected, actual)) in self.sizes.iter().zip(tensor.sizes()).enumerate() {
            match expected {
                Some(expected) if expected != actual => {
                    return Some(GuardFailure::Size {
                        dim,
                        expected: *expected,
                        actual: *actual,
                    })
                }
                _ => {}
            }
        }
        for (dim, (expected, actual)) in self.strides.iter().zip(tensor.strides()).enumerate() {
            match expected {
                Some(expected) if expected != actual => {
                    return Some(GuardFailure::Stride {
                        dim,
                        expected: *expected,
                        actual: *actual,
                    })
                }
                _ => {}
            }
        }
        None
    }
}

/// Logical AND over every position; a count mismatch never matches.
pub fn check_all(guards: &[TensorGuard], state: &LocalState, tensors: &[Tensor]) -> bool {
    guards.len() == tensors.len()
        && guards
            .iter()
            .zip(tensors)
            .all(|(guard, tensor)| guard.check(state, tensor))
}
