//! On-disk specialization records produced by ahead-of-time compilation.
//!
//! Records live at `<root>/<namespace>/<device>/<op>.<overload>.json` as a JSON
//! array. Each element names a compiled artifact and the per-argument metadata it
//! was built for. Loading is read-only; nothing here writes records back.

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::device::{Device, DeviceKind};
use crate::dtype::ScalarKind;
use crate::env;
use crate::error::GateResult;
use crate::meta::{widen_kind, ArgumentMetaInfo, ScalarValue, SymDim};

/// Number stored in a record for scalar argument positions.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RecordScalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetaRecord {
    pub is_dynamic: bool,
    pub device_type: String,
    pub device_index: i8,
    pub dtype: String,
    pub sizes: Vec<i64>,
    pub strides: Vec<i64>,
    #[serde(default)]
    pub scalar_value: Option<RecordScalar>,
    /// Size dims that may vary when `is_dynamic` is set. Absent means all of them.
    #[serde(default)]
    pub dynamic_dims: Option<Vec<usize>>,
}

impl MetaRecord {
    /// Converts the record into a key entry.
    ///
    /// An unknown dtype string is an error. Anything else that cannot be represented
    /// (unknown device, mismatched scalar, bad dynamic dim) yields `Ok(None)` and the
    /// enclosing record is skipped.
    pub fn to_meta(&self) -> GateResult<Option<ArgumentMetaInfo>> {
        let dtype = ScalarKind::parse(&self.dtype)?;
        let Some(kind) = DeviceKind::parse(&self.device_type) else {
            tracing::debug!(device = %self.device_type, "unknown device type in cache record");
            return Ok(None);
        };
        if self.sizes.len() != self.strides.len() {
            return Ok(None);
        }

        let (dtype, scalar_value) = match self.scalar_value {
            None => (dtype, None),
            Some(value) => match record_scalar(dtype, value) {
                Some((dtype, value)) => (dtype, Some(value)),
                None => {
                    tracing::debug!(dtype = %dtype, "scalar value does not fit its dtype");
                    return Ok(None);
                }
            },
        };

        let mut sizes: Vec<SymDim> = self.sizes.iter().copied().map(SymDim::Concrete).collect();
        let mut strides: Vec<SymDim> =
            self.strides.iter().copied().map(SymDim::Concrete).collect();
        if self.is_dynamic {
            match &self.dynamic_dims {
                Some(dims) => {
                    for &dim in dims {
                        let Some(slot) = sizes.get_mut(dim) else {
                            tracing::debug!(dim, rank = self.sizes.len(), "dynamic dim out of range");
                            return Ok(None);
                        };
                        *slot = SymDim::Symbolic;
                    }
                }
                None => sizes.fill(SymDim::Symbolic),
            }
            strides.fill(SymDim::Symbolic);
        }

        // A dynamic position with nothing to relax (rank 0) keys like a live one.
        let mut meta = ArgumentMetaInfo {
            is_dynamic: false,
            dtype,
            scalar_value,
            device: Device::new(kind, self.device_index).normalized(),
            sizes,
            strides,
        };
        meta.is_dynamic = meta.has_symbolic_dims();
        Ok(Some(meta))
    }
}

fn record_scalar(dtype: ScalarKind, value: RecordScalar) -> Option<(ScalarKind, ScalarValue)> {
    let widened = widen_kind(dtype)?;
    let value = match (widened, value) {
        (ScalarKind::Bool, RecordScalar::Bool(value)) => ScalarValue::Bool(value),
        (ScalarKind::UInt64, RecordScalar::Int(value)) => ScalarValue::int(value),
        (ScalarKind::UInt64, RecordScalar::UInt(value)) => ScalarValue::UInt(value),
        (ScalarKind::Float64, RecordScalar::Float(value)) => ScalarValue::float(value),
        (ScalarKind::Float64, RecordScalar::Int(value)) => ScalarValue::float(value as f64),
        (ScalarKind::Float64, RecordScalar::UInt(value)) => ScalarValue::float(value as f64),
        _ => return None,
    };
    Some((widened, value))
}

/// One persisted specialization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CacheRecord {
    #[serde(alias = "artifact_path")]
    pub kernel_path: PathBuf,
    pub meta_info: Vec<MetaRecord>,
}

impl CacheRecord {
    /// The record's cache key; `Ok(None)` when any position is unusable.
    ///
    /// Every position's dtype is validated before any position can skip the record,
    /// so an unknown dtype fails regardless of where it appears.
    pub fn key(&self) -> GateResult<Option<Vec<ArgumentMetaInfo>>> {
        for meta in &self.meta_info {
            ScalarKind::parse(&meta.dtype)?;
        }
        let mut key = Vec::with_capacity(self.meta_info.len());
        for meta in &self.meta_info {
            match meta.to_meta()? {
                Some(meta) => key.push(meta),
                None => return Ok(None),
            }
        }
        Ok(Some(key))
    }
}

/// Source of persisted specializations for a gate.
pub trait CacheStore: Send + Sync {
    fn load(
        &self,
        namespace: &str,
        op: &str,
        overload: &str,
        device: DeviceKind,
    ) -> GateResult<Vec<CacheRecord>>;
}

/// Store with no records; gates built with it start empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyCacheStore;

impl CacheStore for EmptyCacheStore {
    fn load(&self, _: &str, _: &str, _: &str, _: DeviceKind) -> GateResult<Vec<CacheRecord>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct JsonCacheStore {
    root: PathBuf,
}

impl JsonCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_env() -> Self {
        Self::new(env::cache_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, namespace: &str, op: &str, overload: &str, device: DeviceKind) -> PathBuf {
        self.root
            .join(namespace)
            .join(device.as_str())
            .join(format!("{op}.{overload}.json"))
    }
}

impl CacheStore for JsonCacheStore {
    fn load(
        &self,
        namespace: &str,
        op: &str,
        overload: &str,
        device: DeviceKind,
    ) -> GateResult<Vec<CacheRecord>> {
        let path = self.path_for(namespace, op, overload, device);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read kernel cache");
                return Ok(Vec::new());
            }
        };
        let entries: Vec<serde_json::Value> = match serde_json::from_str(&text) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "kernel cache is not a JSON array");
                return Ok(Vec::new());
            }
        };

        let mut records = Vec::with_capacity(entries.len());
        for (idx, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<CacheRecord>(entry) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::debug!(path = %path.display(), idx, error = %err, "skipping malformed cache record");
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GateError;

    fn record(json: &str) -> MetaRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn static_record_becomes_concrete_key() {
        let meta = record(
            r#"{"is_dynamic": false, "device_type": "cpu", "device_index": 0,
                "dtype": "torch.float32", "sizes": [2, 3], "strides": [3, 1]}"#,
        )
        .to_meta()
        .unwrap()
        .unwrap();
        assert_eq!(meta.dtype, ScalarKind::Float32);
        assert_eq!(meta.device, Device::cpu());
        assert_eq!(meta.sizes, vec![SymDim::Concrete(2), SymDim::Concrete(3)]);
        assert!(!meta.has_symbolic_dims());
    }

    #[test]
    fn dynamic_record_relaxes_listed_dims_and_all_strides() {
        let meta = record(
            r#"{"is_dynamic": true, "device_type": "cuda", "device_index": 1,
                "dtype": "float16", "sizes": [8, 64], "strides": [64, 1],
                "dynamic_dims": [0]}"#,
        )
        .to_meta()
        .unwrap()
        .unwrap();
        assert_eq!(meta.sizes, vec![SymDim::Symbolic, SymDim::Concrete(64)]);
        assert_eq!(meta.strides, vec![SymDim::Symbolic; 2]);
        assert_eq!(meta.device, Device::cuda(1));

        let all = record(
            r#"{"is_dynamic": true, "device_type": "cpu", "device_index": -1,
                "dtype": "float32", "sizes": [8, 64], "strides": [64, 1]}"#,
        )
        .to_meta()
        .unwrap()
        .unwrap();
        assert_eq!(all.sizes, vec![SymDim::Symbolic; 2]);
    }

    #[test]
    fn scalar_records_are_widened() {
        let meta = record(
            r#"{"is_dynamic": false, "device_type": "cpu", "device_index": -1,
                "dtype": "torch.int64", "sizes": [], "strides": [], "scalar_value": 2}"#,
        )
        .to_meta()
        .unwrap()
        .unwrap();
        assert_eq!(meta.dtype, ScalarKind::UInt64);
        assert_eq!(meta.scalar_value, Some(ScalarValue::UInt(2)));

        let mismatched = record(
            r#"{"is_dynamic": false, "device_type": "cpu", "device_index": -1,
                "dtype": "float32", "sizes": [], "strides": [], "scalar_value": true}"#,
        );
        assert!(mismatched.to_meta().unwrap().is_none());
    }

    #[test]
    fn dynamic_rank_zero_record_keys_as_static() {
        let meta = record(
            r#"{"is_dynamic": true, "device_type": "cpu", "device_index": -1,
                "dtype": "int64", "sizes": [], "strides": [], "scalar_value": 1}"#,
        )
        .to_meta()
        .unwrap()
        .unwrap();
        assert!(!meta.is_dynamic);
        assert!(!meta.has_symbolic_dims());

        let empty_dims = record(
            r#"{"is_dynamic": true, "device_type": "cpu", "device_index": -1,
                "dtype": "float32", "sizes": [4], "strides": [1], "dynamic_dims": []}"#,
        )
        .to_meta()
        .unwrap()
        .unwrap();
        assert_eq!(empty_dims.strides, vec![SymDim::Symbolic]);
        assert!(empty_dims.is_dynamic);
    }

    #[test]
    fn unknown_device_skips_but_unknown_dtype_fails() {
        let device = record(
            r#"{"is_dynamic": false, "device_type": "tpu", "device_index": 0,
                "dtype": "float32", "sizes": [1], "strides": [1]}"#,
        );
        assert!(device.to_meta().unwrap().is_none());

        let dtype = record(
            r#"{"is_dynamic": false, "device_type": "cpu", "device_index": 0,
                "dtype": "torch.float8_e4m3fn", "sizes": [1], "strides": [1]}"#,
        );
        assert!(matches!(dtype.to_meta(), Err(GateError::UnknownDType(_))));
    }

    #[test]
    fn json_store_skips_malformed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCacheStore::new(dir.path());
        let path = store.path_for("aten", "add", "Tensor", DeviceKind::Cpu);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"[
                {"artifact_path": "/k/a.so", "meta_info": []},
                {"kernel_path": 7},
                {"kernel_path": "/k/b.so", "meta_info": []}
            ]"#,
        )
        .unwrap();

        let records = store.load("aten", "add", "Tensor", DeviceKind::Cpu).unwrap();
        let paths: Vec<_> = records.iter().map(|r| r.kernel_path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/k/a.so"), PathBuf::from("/k/b.so")]);

        assert!(store
            .load("aten", "mul", "Tensor", DeviceKind::Cpu)
            .unwrap()
            .is_empty());
        std::fs::write(&path, "{\"not\": \"an array\"}").unwrap();
        assert!(store
            .load("aten", "add", "Tensor", DeviceKind::Cpu)
            .unwrap()
            .is_empty());
    }
}
