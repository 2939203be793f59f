use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::SdfInfo;
use crate::value::{FunctionValue, Value};

/// Cache key: the base function plus its argument sequence (bound values and `#N/A`).
#[derive(Clone)]
pub(crate) struct SpecializationKey(FunctionValue);

impl SpecializationKey {
    pub(crate) fn new(value: &FunctionValue) -> Self {
        Self(value.clone())
    }

    fn base(&self) -> &Arc<SdfInfo> {
        self.0.sdf()
    }

    fn args(&self) -> &Arc<[Value]> {
        self.0.args()
    }
}

impl PartialEq for SpecializationKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.same_as(&other.0)
    }
}

impl Eq for SpecializationKey {}

impl Hash for SpecializationKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_into(state);
    }
}

pub(crate) enum Claim {
    /// Another request already produced (or is producing) this residual.
    Existing(Arc<SdfInfo>),
    /// The caller owns the compilation of this freshly registered residual.
    Claimed(Arc<SdfInfo>),
}

/// Function value -> residual function.
///
/// An entry is inserted as soon as the residual is registered, before partial evaluation
/// runs, so a reentrant or concurrent request for the same value gets the in-flight
/// record instead of starting a second compilation.
#[derive(Default)]
pub(crate) struct SpecializationCache {
    residuals: DashMap<SpecializationKey, Arc<SdfInfo>>,
}

impl SpecializationCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.residuals.len()
    }

    pub(crate) fn get(&self, key: &SpecializationKey) -> Option<Arc<SdfInfo>> {
        self.residuals.get(key).map(|entry| entry.value().clone())
    }

    /// Returns the cached residual for `key`, or registers one via `register` and
    /// publishes it atomically with respect to other claims on the same key.
    pub(crate) fn claim<E>(
        &self,
        key: SpecializationKey,
        register: impl FnOnce() -> Result<Arc<SdfInfo>, E>,
    ) -> Result<Claim, E> {
        match self.residuals.entry(key) {
            Entry::Occupied(entry) => Ok(Claim::Existing(entry.get().clone())),
            Entry::Vacant(entry) => {
                let sdf = register()?;
                entry.insert(sdf.clone());
                Ok(Claim::Claimed(sdf))
            }
        }
    }

    pub(crate) fn remove(&self, key: &SpecializationKey) {
        self.residuals.remove(key);
    }

    /// Drops every entry that resolves to the record at `index`.
    pub(crate) fn forget(&self, index: usize) -> usize {
        let before = self.residuals.len();
        self.residuals.retain(|_, residual| residual.index() != index);
        before - self.residuals.len()
    }

    /// Argument sequences of every specialization whose base is named `name`.
    pub(crate) fn pending(&self, name: &str) -> Vec<Arc<[Value]>> {
        self.residuals
            .iter()
            .filter(|entry| entry.key().base().name() == name)
            .map(|entry| entry.key().args().clone())
            .collect()
    }
}
