use std::path::PathBuf;

use thiserror::Error;

use crate::device::DeviceKind;

/// Errors surfaced by the dispatch gate to its caller.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("unsupported dtype '{0}'")]
    UnknownDType(String),
    #[error("unsupported device type {0:?} for the dispatch gate")]
    UnsupportedDevice(Option<DeviceKind>),
    #[error("failed to produce a kernel library for {op} and no fallback is registered")]
    CompileFailed { op: String },
    #[error("failed to load kernel library {}", path.display())]
    KernelLoad { path: PathBuf },
    #[error("failed to unpack tensors from the stack to run the kernel for {op}")]
    Unpack { op: String },
    #[error("kernel execution failure: {0}")]
    Execution(String),
    #[error("persistent cache failure: {0}")]
    CacheStore(String),
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

impl GateError {
    pub fn execution(message: impl Into<String>) -> Self {
        GateError::Execution(message.into())
    }

    pub fn cache_store(message: impl Into<String>) -> Self {
        GateError::CacheStore(message.into())
    }
}

pub type GateResult<T> = Result<T, GateError>;
