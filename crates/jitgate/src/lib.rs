//! Dispatch gate that serves operator calls from a cache of shape, dtype and
//! device specialized kernels, compiling new specializations on a miss.

pub mod cache;
pub mod compiler;
pub mod device;
pub mod dtype;
pub mod env;
pub mod error;
pub mod gate;
pub mod guard;
pub mod kernel;
pub mod meta;
pub mod persist;
pub mod profiling;
pub mod schema;
pub mod tensor;
pub mod value;

pub use cache::{Specialization, SpecializationCache};
pub use compiler::{CompileRequest, Compiler, ExternalCompiler};
pub use device::{Device, DeviceClass, DeviceKind, DispatchKey, DispatchKeySet};
pub use dtype::ScalarKind;
pub use error::{GateError, GateResult};
pub use gate::{DispatchGate, FallbackHandler, GateConfig};
pub use guard::{LocalState, TensorGuard};
pub use kernel::{Kernel, KernelLoader, KernelLoaders};
pub use meta::ArgumentMetaInfo;
pub use persist::{CacheRecord, CacheStore, EmptyCacheStore, JsonCacheStore};
pub use schema::{ArgType, Argument, OperatorName, OperatorSchema, ReturnType};
pub use tensor::Tensor;
pub use value::{Scalar, Value};
