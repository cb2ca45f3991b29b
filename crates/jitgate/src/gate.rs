use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{Specialization, SpecializationCache};
use crate::compiler::{CompileRequest, Compiler};
use crate::device::{Device, DeviceKind, DispatchKey, DispatchKeySet};
use crate::env;
use crate::error::{GateError, GateResult};
use crate::guard::{check_all, LocalState, TensorGuard};
use crate::kernel::KernelLoaders;
use crate::meta::{extract_call, extract_meta_info, unpack_tensors, ArgumentMetaInfo};
use crate::persist::{CacheStore, JsonCacheStore};
use crate::profiling;
use crate::schema::{OperatorName, OperatorSchema};
use crate::value::Value;

/// Generic implementation used when no specialized kernel can be produced.
pub trait FallbackHandler: Send + Sync {
    fn call(
        &self,
        schema: &OperatorSchema,
        keyset: DispatchKeySet,
        stack: &mut Vec<Value>,
    ) -> GateResult<()>;
}

/// Identity of the operator overload a gate serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub namespace: String,
    pub op: String,
    pub overload: String,
    pub dispatch_key: DispatchKey,
    pub cache_dir: PathBuf,
}

impl GateConfig {
    /// A redundant `ns::` prefix on `op` is dropped and an empty overload becomes
    /// `default`. The cache directory comes from `JITGATE_CACHE_DIR`.
    pub fn new(namespace: &str, op: &str, overload: &str, dispatch_key: DispatchKey) -> Self {
        let name = OperatorName::new(namespace, op, overload);
        Self {
            namespace: name.namespace,
            op: name.name,
            overload: name.overload,
            dispatch_key,
            cache_dir: env::cache_dir(),
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn operator_name(&self) -> OperatorName {
        OperatorName::new(self.namespace.as_str(), &self.op, &self.overload)
    }

    /// JSON store rooted at `cache_dir`.
    pub fn cache_store(&self) -> JsonCacheStore {
        JsonCacheStore::new(self.cache_dir.clone())
    }
}

/// Routes calls of one operator overload to cached specialized kernels, compiling
/// new ones on demand.
pub struct DispatchGate {
    config: GateConfig,
    // Device of the gate's dispatch key; `None` for context-only keys.
    device: Option<Device>,
    compiler: Arc<dyn Compiler>,
    loaders: KernelLoaders,
    fallback: Option<Arc<dyn FallbackHandler>>,
    cache: SpecializationCache,
}

impl DispatchGate {
    /// Builds a gate and populates its cache from `store`.
    ///
    /// Fails only on an unknown dtype in a persisted record; every other bad
    /// record is skipped.
    pub fn new(
        config: GateConfig,
        compiler: Arc<dyn Compiler>,
        loaders: KernelLoaders,
        fallback: Option<Arc<dyn FallbackHandler>>,
        store: &dyn CacheStore,
    ) -> GateResult<Self> {
        let device = config
            .dispatch_key
            .device_kind()
            .map(|kind| Device::new(kind, 0).normalized());
        let gate = Self {
            config,
            device,
            compiler,
            loaders,
            fallback,
            cache: SpecializationCache::new(),
        };
        let loaded = gate.load_persistent(store)?;
        tracing::debug!(
            op = %gate.config.operator_name(),
            dispatch_key = ?gate.config.dispatch_key,
            loaded,
            "dispatch gate ready"
        );
        Ok(gate)
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn device(&self) -> Option<Device> {
        self.device
    }

    pub fn cache(&self) -> &SpecializationCache {
        &self.cache
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    fn load_persistent(&self, store: &dyn CacheStore) -> GateResult<usize> {
        let Some(device) = self.device else {
            return Ok(0);
        };
        let records = store.load(
            &self.config.namespace,
            &self.config.op,
            &self.config.overload,
            device.kind,
        )?;
        let recorded_keys = DispatchKeySet::from(self.config.dispatch_key);

        let mut loaded = 0;
        for record in records {
            let key = match record.key()? {
                Some(key) if !key.is_empty() => key,
                _ => {
                    profiling::cache_event(profiling::LOAD_SKIP);
                    tracing::debug!(
                        kernel = %record.kernel_path.display(),
                        "skipping cache record with unusable metadata"
                    );
                    continue;
                }
            };
            let Some(kernel) = self.loaders.load(&record.kernel_path, device.kind) else {
                profiling::cache_event(profiling::LOAD_SKIP);
                continue;
            };
            let guards = guards_for(&key, recorded_keys);
            self.cache.insert(key, Specialization::new(kernel, guards))?;
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Executes one call. The call's arguments are the last `schema.arguments.len()`
    /// entries of `stack`; on return they have been replaced by the outputs.
    pub fn invoke(
        &self,
        schema: &OperatorSchema,
        keyset: DispatchKeySet,
        stack: &mut Vec<Value>,
    ) -> GateResult<()> {
        match self.lookup(schema, keyset, stack)? {
            Some(specialization) => {
                profiling::cache_event(profiling::HIT);
                self.run_hit(&specialization, schema, stack)
            }
            None => {
                profiling::cache_event(profiling::MISS);
                self.run_miss(schema, keyset, stack)
            }
        }
    }

    fn lookup(
        &self,
        schema: &OperatorSchema,
        keyset: DispatchKeySet,
        stack: &[Value],
    ) -> GateResult<Option<Arc<Specialization>>> {
        if !schema.returns_single_tensor() {
            return Ok(None);
        }
        let Some(device) = self.device else {
            return Ok(None);
        };
        let Some(call) = extract_call(&schema.arguments, stack, device) else {
            return Ok(None);
        };
        if call.meta.is_empty() {
            return Ok(None);
        }
        let Some(specialization) = self.cache.find(&call.meta)? else {
            return Ok(None);
        };

        let state = LocalState::new(keyset);
        if !check_all(&specialization.guards, &state, &call.tensors) {
            profiling::cache_event(profiling::GUARD_REJECT);
            tracing::debug!(op = %schema.name, "cached specialization rejected by guards");
            return Ok(None);
        }
        Ok(Some(specialization))
    }

    fn run_hit(
        &self,
        specialization: &Specialization,
        schema: &OperatorSchema,
        stack: &mut Vec<Value>,
    ) -> GateResult<()> {
        let device = self.device.ok_or(GateError::UnsupportedDevice(None))?;
        let inputs = unpack_tensors(&schema.arguments, stack, device, false).ok_or_else(|| {
            GateError::Unpack {
                op: schema.name.to_string(),
            }
        })?;
        drop_arguments(stack, schema);
        let outputs = specialization.kernel.run(&inputs)?;
        stack.extend(outputs.into_iter().map(Value::Tensor));
        Ok(())
    }

    fn run_miss(
        &self,
        schema: &OperatorSchema,
        keyset: DispatchKeySet,
        stack: &mut Vec<Value>,
    ) -> GateResult<()> {
        let device_kind = self.config.dispatch_key.device_kind();
        let device = match (self.device, device_kind) {
            (Some(device), Some(DeviceKind::Cpu | DeviceKind::Cuda)) => device,
            _ => return Err(GateError::UnsupportedDevice(device_kind)),
        };

        let request = CompileRequest::from_call(schema, device.kind, env::trace_enabled(), stack);
        profiling::cache_event(profiling::COMPILE);
        let artifact = match self.compiler.compile(&request) {
            Ok(Some(path)) if !path.as_os_str().is_empty() => Some(path),
            Ok(_) => {
                tracing::warn!(op = %schema.name, "compiler produced no kernel library");
                None
            }
            Err(err) => {
                tracing::warn!(op = %schema.name, error = %err, "kernel compilation failed");
                None
            }
        };
        let Some(artifact) = artifact else {
            return match &self.fallback {
                Some(fallback) => {
                    profiling::cache_event(profiling::FALLBACK);
                    fallback.call(schema, keyset, stack)
                }
                None => Err(GateError::CompileFailed {
                    op: schema.name.to_string(),
                }),
            };
        };

        let kernel = self
            .loaders
            .load(&artifact, device.kind)
            .ok_or_else(|| GateError::KernelLoad {
                path: artifact.clone(),
            })?;

        let key = if schema.returns_single_tensor() {
            extract_meta_info(&schema.arguments, stack, device).filter(|key| !key.is_empty())
        } else {
            None
        };
        let inputs = unpack_tensors(&schema.arguments, stack, device, false).ok_or_else(|| {
            GateError::Unpack {
                op: schema.name.to_string(),
            }
        })?;
        let outputs = kernel.run(&inputs)?;
        if !outputs.is_empty() {
            drop_arguments(stack, schema);
            stack.extend(outputs.into_iter().map(Value::Tensor));
        }

        if let Some(key) = key {
            let guards = guards_for(&key, keyset);
            self.cache.insert(key, Specialization::new(kernel, guards))?;
        }
        Ok(())
    }
}

fn guards_for(key: &[ArgumentMetaInfo], dispatch_keys: DispatchKeySet) -> Vec<TensorGuard> {
    key.iter()
        .map(|meta| TensorGuard::from_meta(meta, dispatch_keys))
        .collect()
}

fn drop_arguments(stack: &mut Vec<Value>, schema: &OperatorSchema) {
    let keep = stack.len().saturating_sub(schema.arguments.len());
    stack.truncate(keep);
}
