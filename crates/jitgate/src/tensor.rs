use std::sync::Arc;

use crate::device::Device;
use crate::dtype::ScalarKind;
use crate::error::{GateError, GateResult};
use crate::value::Scalar;

/// Host-visible tensor handle: metadata plus shared storage.
///
/// The gate never does arithmetic on tensors; it only reads their metadata and hands
/// them to kernels.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    dtype: ScalarKind,
    device: Device,
    sizes: Vec<i64>,
    strides: Vec<i64>,
    data: Arc<Vec<u8>>,
}

impl Tensor {
    pub fn from_parts(
        dtype: ScalarKind,
        device: Device,
        sizes: Vec<i64>,
        strides: Vec<i64>,
        data: Vec<u8>,
    ) -> GateResult<Self> {
        if sizes.len() != strides.len() {
            return Err(GateError::execution(format!(
                "tensor rank mismatch: {} sizes vs {} strides",
                sizes.len(),
                strides.len()
            )));
        }
        let expected = byte_len(dtype, &sizes)?;
        if data.len() < expected {
            return Err(GateError::execution(format!(
                "tensor storage too small: {} bytes for {expected} required",
                data.len()
            )));
        }
        Ok(Self {
            dtype,
            device,
            sizes,
            strides,
            data: Arc::new(data),
        })
    }

    /// Zero-filled row-major tensor.
    pub fn zeros(dtype: ScalarKind, device: Device, sizes: &[i64]) -> GateResult<Self> {
        let bytes = byte_len(dtype, sizes)?;
        Self::from_parts(
            dtype,
            device,
            sizes.to_vec(),
            contiguous_strides(sizes),
            vec![0u8; bytes],
        )
    }

    /// Rank-0 tensor holding a single scalar of its native kind.
    pub fn scalar(value: Scalar, device: Device) -> Self {
        Self {
            dtype: value.kind(),
            device,
            sizes: Vec::new(),
            strides: Vec::new(),
            data: Arc::new(value.to_le_bytes()),
        }
    }

    pub fn dtype(&self) -> ScalarKind {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn sizes(&self) -> &[i64] {
        &self.sizes
    }

    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.sizes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Mutable storage; clones the buffer when it is shared.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Reads the single element of a rank-0 tensor.
    pub fn item(&self) -> Option<Scalar> {
        if !self.sizes.is_empty() {
            return None;
        }
        Scalar::from_le_bytes(self.dtype, self.bytes())
    }
}

pub fn contiguous_strides(sizes: &[i64]) -> Vec<i64> {
    let mut strides = vec![1i64; sizes.len()];
    let mut running = 1i64;
    for (idx, size) in sizes.iter().enumerate().rev() {
        strides[idx] = running;
        running = running.saturating_mul((*size).max(1));
    }
    strides
}

fn byte_len(dtype: ScalarKind, sizes: &[i64]) -> GateResult<usize> {
    let mut count = 1usize;
    for size in sizes {
        let size = usize::try_from(*size)
            .map_err(|_| GateError::execution(format!("invalid dimension {size}")))?;
        count = count
            .checked_mul(size)
            .ok_or_else(|| GateError::execution("dimension overflow"))?;
    }
    count
        .checked_mul(dtype.byte_size())
        .ok_or_else(|| GateError::execution("tensor byte size overflow"))
}
