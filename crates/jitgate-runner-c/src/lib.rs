//! Host-class kernel loader for jitgate.
//!
//! A compiled artifact is a shared library exporting
//!
//! ```c
//! int32_t jitgate_kernel_run(const JitgateTensor *inputs, size_t n_inputs,
//!                            JitgateTensor *outputs, size_t capacity,
//!                            size_t *n_outputs);
//! void jitgate_kernel_release(JitgateTensor *outputs, size_t n_outputs); /* optional */
//! ```
//!
//! Output buffers belong to the library. They are copied into host tensors and then
//! handed back through `jitgate_kernel_release` when it is exported.

mod dtype;

use std::os::raw::c_void;
use std::path::Path;
use std::sync::Arc;

use jitgate::tensor::contiguous_strides;
use jitgate::{
    Device, DeviceClass, DeviceKind, GateError, GateResult, Kernel, KernelLoader, Tensor,
};
use libloading::Library;

use crate::dtype::{dtype_from_tag, dtype_tag};

pub const RUN_SYMBOL: &[u8] = b"jitgate_kernel_run";
pub const RELEASE_SYMBOL: &[u8] = b"jitgate_kernel_release";

/// Upper bound on outputs a kernel may report per call.
pub const MAX_OUTPUTS: usize = 16;

#[repr(C)]
#[derive(Clone, Copy)]
struct JitgateTensor {
    dtype: u32,
    rank: u32,
    dims: *const i64,
    strides: *const i64,
    data: *mut c_void,
    nbytes: usize,
}

impl JitgateTensor {
    const EMPTY: Self = Self {
        dtype: 0,
        rank: 0,
        dims: std::ptr::null(),
        strides: std::ptr::null(),
        data: std::ptr::null_mut(),
        nbytes: 0,
    };

    fn view(tensor: &Tensor) -> Self {
        Self {
            dtype: dtype_tag(tensor.dtype()),
            rank: tensor.rank() as u32,
            dims: tensor.sizes().as_ptr(),
            strides: tensor.strides().as_ptr(),
            // Inputs are read-only for the kernel.
            data: tensor.bytes().as_ptr() as *mut c_void,
            nbytes: tensor.bytes().len(),
        }
    }

    /// Copies a library-owned output into a host tensor.
    ///
    /// # Safety
    /// `dims` and `strides` must point to `rank` elements (or be null for rank 0) and
    /// `data` to `nbytes` readable bytes.
    unsafe fn to_tensor(&self) -> GateResult<Tensor> {
        let dtype = dtype_from_tag(self.dtype).ok_or_else(|| {
            GateError::execution(format!("kernel returned unknown dtype tag {}", self.dtype))
        })?;
        let rank = self.rank as usize;
        let sizes = read_dims(self.dims, rank)
            .ok_or_else(|| GateError::execution("kernel output is missing its dims"))?;
        let strides = read_dims(self.strides, rank).unwrap_or_else(|| contiguous_strides(&sizes));
        let data = if self.nbytes == 0 {
            Vec::new()
        } else if self.data.is_null() {
            return Err(GateError::execution("kernel output has no data"));
        } else {
            std::slice::from_raw_parts(self.data as *const u8, self.nbytes).to_vec()
        };
        Tensor::from_parts(dtype, Device::cpu(), sizes, strides, data)
    }
}

unsafe fn read_dims(ptr: *const i64, rank: usize) -> Option<Vec<i64>> {
    if rank == 0 {
        return Some(Vec::new());
    }
    if ptr.is_null() {
        return None;
    }
    Some(std::slice::from_raw_parts(ptr, rank).to_vec())
}

type CKernelRun =
    unsafe extern "C" fn(*const JitgateTensor, usize, *mut JitgateTensor, usize, *mut usize) -> i32;
type CKernelRelease = unsafe extern "C" fn(*mut JitgateTensor, usize);

/// A kernel living in a loaded shared library.
pub struct CHostKernel {
    _lib: Library,
    run: CKernelRun,
    release: Option<CKernelRelease>,
}

impl CHostKernel {
    pub fn open(path: &Path) -> GateResult<Self> {
        let load_err = |err: libloading::Error| {
            tracing::debug!(path = %path.display(), error = %err, "kernel library rejected");
            GateError::KernelLoad {
                path: path.to_path_buf(),
            }
        };
        let lib = unsafe { Library::new(path) }.map_err(load_err)?;
        let run = unsafe { lib.get::<CKernelRun>(RUN_SYMBOL).map(|symbol| *symbol) }
            .map_err(load_err)?;
        let release = unsafe { lib.get::<CKernelRelease>(RELEASE_SYMBOL) }
            .ok()
            .map(|symbol| *symbol);
        Ok(Self {
            _lib: lib,
            run,
            release,
        })
    }
}

impl Kernel for CHostKernel {
    fn run(&self, inputs: &[Tensor]) -> GateResult<Vec<Tensor>> {
        let input_views: Vec<JitgateTensor> = inputs.iter().map(JitgateTensor::view).collect();
        let mut output_views = [JitgateTensor::EMPTY; MAX_OUTPUTS];
        let mut count = 0usize;

        let status = unsafe {
            (self.run)(
                input_views.as_ptr(),
                input_views.len(),
                output_views.as_mut_ptr(),
                output_views.len(),
                &mut count,
            )
        };
        if status != 0 {
            return Err(GateError::execution(format!(
                "host kernel failed with status {status}"
            )));
        }
        let filled = count.min(MAX_OUTPUTS);
        let outputs = if count > MAX_OUTPUTS {
            Err(GateError::execution(format!(
                "host kernel reported {count} outputs, capacity is {MAX_OUTPUTS}"
            )))
        } else {
            output_views[..filled]
                .iter()
                .map(|view| unsafe { view.to_tensor() })
                .collect::<GateResult<Vec<_>>>()
        };
        if let Some(release) = self.release {
            unsafe { release(output_views.as_mut_ptr(), filled) };
        }
        outputs
    }
}

/// Loads host artifacts; refuses every non-host device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CHostLoader;

impl CHostLoader {
    pub fn new() -> Self {
        Self
    }
}

impl KernelLoader for CHostLoader {
    fn load(&self, artifact: &Path, device: DeviceKind) -> Option<Arc<dyn Kernel>> {
        if device.class() != Some(DeviceClass::Host) {
            tracing::warn!(device = %device, "host loader cannot serve this device");
            return None;
        }
        match CHostKernel::open(artifact) {
            Ok(kernel) => Some(Arc::new(kernel)),
            Err(err) => {
                tracing::warn!(error = %err, "failed to open host kernel");
                None
            }
        }
    }
}
