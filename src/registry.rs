// gateway/src/registry.rs

use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tracing::info;

use crate::profile::{builtin_profiles, Profile, ProfilePatch};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("profile not found: {0}")]
    NotFound(String),
    #[error("duplicate profile id: {0}")]
    Duplicate(String),
    #[error("invalid profile: {0}")]
    Invalid(String),
}

/// Immutable view of the registry. Replaced wholesale on every update.
#[derive(Default)]
struct Snapshot {
    order: Vec<Arc<Profile>>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    fn get(&self, id: &str) -> Option<&Arc<Profile>> { self.index.get(id).map(|&i| &self.order[i]) }
}

/// Profile id -> endpoint + capabilities. Readers clone the current snapshot
/// pointer and never see a half-applied update; writers are serialized and
/// build the next snapshot off the read path.
#[derive(Clone, Default)]
pub struct ProfileRegistry {
    current: Arc<RwLock<Arc<Snapshot>>>,
    writer: Arc<Mutex<()>>,
}

impl ProfileRegistry {
    pub fn from_profiles(profiles: impl IntoIterator<Item = Profile>) -> Result<Self, RegistryError> {
        let mut snap = Snapshot::default();
        for p in profiles {
            p.validate()?;
            if snap.index.contains_key(&p.id) {
                return Err(RegistryError::Duplicate(p.id));
            }
            snap.index.insert(p.id.clone(), snap.order.len());
            snap.order.push(Arc::new(p));
        }
        Ok(Self { current: Arc::new(RwLock::new(Arc::new(snap))), writer: Arc::new(Mutex::new(())) })
    }

    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_profiles(builtin_profiles())
    }

    fn snapshot(&self) -> Arc<Snapshot> { self.current.read().clone() }

    pub fn len(&self) -> usize { self.snapshot().order.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Exact-match lookup. Does not filter on `is_active`.
    pub fn resolve(&self, id: &str) -> Result<Arc<Profile>, RegistryError> {
        self.snapshot().get(id).cloned().ok_or_else(|| RegistryError::NotFound(id.into()))
    }

    /// Active profiles in insertion order.
    pub fn list_active(&self) -> Vec<Arc<Profile>> {
        self.snapshot().order.iter().filter(|p| p.is_active).cloned().collect()
    }

    pub fn capabilities_of(&self, id: &str) -> Result<Vec<String>, RegistryError> {
        Ok(self.resolve(id)?.capabilities.clone())
    }

    pub fn update(&self, id: &str, patch: &ProfilePatch) -> Result<Arc<Profile>, RegistryError> {
        let _w = self.writer.lock();
        let base = self.snapshot();
        let slot = *base.index.get(id).ok_or_else(|| RegistryError::NotFound(id.into()))?;
        let merged = Arc::new(patch.apply(&base.order[slot])?);

        let mut order = base.order.clone();
        order[slot] = merged.clone();
        let next = Snapshot { order, index: base.index.clone() };
        *self.current.write() = Arc::new(next);
        info!(profile = %id, "profile updated");
        Ok(merged)
    }
}
