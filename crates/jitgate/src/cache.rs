use std::fmt;
use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

use crate::error::{GateError, GateResult};
use crate::guard::TensorGuard;
use crate::kernel::Kernel;
use crate::meta::ArgumentMetaInfo;

/// A compiled kernel together with the guards describing the inputs it serves.
pub struct Specialization {
    pub kernel: Arc<dyn Kernel>,
    pub guards: Vec<TensorGuard>,
}

impl Specialization {
    pub fn new(kernel: Arc<dyn Kernel>, guards: Vec<TensorGuard>) -> Self {
        Self { kernel, guards }
    }
}

impl fmt::Debug for Specialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Specialization")
            .field("guards", &self.guards)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct CacheEntries {
    exact: FxHashMap<Vec<ArgumentMetaInfo>, Arc<Specialization>>,
    // Keys with symbolic dims, in insertion order.
    relaxed: Vec<(Vec<ArgumentMetaInfo>, Arc<Specialization>)>,
}

/// Specializations of one operator overload under one dispatch key.
///
/// Entries are never evicted. Specializations are fully built before they are
/// published, so readers only ever observe complete guard lists.
#[derive(Default)]
pub struct SpecializationCache {
    entries: RwLock<CacheEntries>,
}

impl SpecializationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact structural lookup over the whole ordered key.
    pub fn lookup(&self, key: &[ArgumentMetaInfo]) -> GateResult<Option<Arc<Specialization>>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| GateError::Poisoned("specialization cache"))?;
        Ok(entries.exact.get(key).cloned())
    }

    /// First dynamic specialization whose key accepts `key` with its symbolic dims
    /// relaxed.
    pub fn lookup_relaxed(
        &self,
        key: &[ArgumentMetaInfo],
    ) -> GateResult<Option<Arc<Specialization>>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| GateError::Poisoned("specialization cache"))?;
        Ok(entries
            .relaxed
            .iter()
            .find(|(declared, _)| {
                declared.len() == key.len()
                    && declared
                        .iter()
                        .zip(key)
                        .all(|(declared, live)| declared.matches_relaxed(live))
            })
            .map(|(_, specialization)| Arc::clone(specialization)))
    }

    /// Exact entries win; dynamic entries are only consulted when no exact key exists.
    pub fn find(&self, key: &[ArgumentMetaInfo]) -> GateResult<Option<Arc<Specialization>>> {
        match self.lookup(key)? {
            Some(found) => Ok(Some(found)),
            None => self.lookup_relaxed(key),
        }
    }

    /// Inserts or silently replaces the entry for `key`.
    pub fn insert(
        &self,
        key: Vec<ArgumentMetaInfo>,
        specialization: Specialization,
    ) -> GateResult<()> {
        let specialization = Arc::new(specialization);
        let mut entries = self
            .entries
            .write()
            .map_err(|_| GateError::Poisoned("specialization cache"))?;
        if key.iter().any(ArgumentMetaInfo::has_symbolic_dims) {
            match entries.relaxed.iter_mut().find(|(existing, _)| *existing == key) {
                Some(slot) => slot.1 = specialization,
                None => entries.relaxed.push((key, specialization)),
            }
        } else {
            entries.exact.insert(key, specialization);
        }
        Ok(())
    }

    pub fn len(&self) -> GateResult<usize> {
        let entries = self
            .entries
            .read()
            .map_err(|_| GateError::Poisoned("specialization cache"))?;
        Ok(entries.exact.len() + entries.relaxed.len())
    }

    pub fn is_empty(&self) -> GateResult<bool> {
        Ok(self.len()? == 0)
    }
}
