//! Enrolled-member registry.
//!
//! The registry owns the authoritative record set and publishes it as an
//! immutable [`RegistrySnapshot`]. Writers build a new record vector and swap
//! it in under a write lock, so a reader holding a snapshot never observes a
//! partially applied enrollment or removal.

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::similarity::DimensionMismatch;
use crate::types::{Embedding, MemberRecord};

/// Failure reported by a [`MemberStore`] backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Backend(err.into())
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(#[from] StoreError),
    #[error("enrollment rejected: {0}")]
    DimensionMismatch(#[from] DimensionMismatch),
    #[error("identity must not be blank")]
    InvalidIdentity,
    #[error("enrollment rejected: embedding has non-finite components")]
    NonFiniteEmbedding,
}

/// Durable backing store for member records.
pub trait MemberStore: Send {
    /// All records in insertion order.
    fn load(&mut self) -> Result<Vec<MemberRecord>, StoreError>;
    fn save(&mut self, record: &MemberRecord) -> Result<(), StoreError>;
    /// Delete every record with this identity. Returns the number deleted.
    fn delete_by_identity(&mut self, identity: &str) -> Result<usize, StoreError>;
    /// Delete every record with `record.identity` and save `record`, as one
    /// unit: on error the store is left as it was. Returns the number deleted.
    fn replace(&mut self, record: &MemberRecord) -> Result<usize, StoreError>;
}

/// Volatile store, used when no persistence is wanted and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<MemberRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<MemberRecord>) -> Self {
        Self { records }
    }
}

impl MemberStore for MemoryStore {
    fn load(&mut self) -> Result<Vec<MemberRecord>, StoreError> {
        Ok(self.records.clone())
    }

    fn save(&mut self, record: &MemberRecord) -> Result<(), StoreError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn delete_by_identity(&mut self, identity: &str) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records.retain(|r| r.identity != identity);
        Ok(before - self.records.len())
    }

    fn replace(&mut self, record: &MemberRecord) -> Result<usize, StoreError> {
        let removed = self.delete_by_identity(&record.identity)?;
        self.records.push(record.clone());
        Ok(removed)
    }
}

/// What enrolling an identity that already has records does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Keep prior records; every enrollment adds a reference embedding.
    #[default]
    Accumulate,
    /// Drop prior records for the identity before saving the new one.
    Replace,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accumulate" => Ok(Self::Accumulate),
            "replace" => Ok(Self::Replace),
            other => Err(format!("unknown duplicate policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryOptions {
    /// Required embedding length for enrollment. `None` accepts any length.
    pub expected_dim: Option<usize>,
    pub duplicate_policy: DuplicatePolicy,
}

/// Immutable point-in-time view of the registry, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    records: Arc<Vec<MemberRecord>>,
}

impl RegistrySnapshot {
    pub fn from_records(records: Vec<MemberRecord>) -> Self {
        Self {
            records: Arc::new(records),
        }
    }

    pub fn records(&self) -> &[MemberRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MemberRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Authoritative set of enrolled identities.
pub struct MemberRegistry {
    // Lock order: `store` before `published`.
    store: Mutex<Box<dyn MemberStore>>,
    published: RwLock<RegistrySnapshot>,
    options: RegistryOptions,
}

impl MemberRegistry {
    /// Open a registry over `store`, reading every existing record.
    pub fn load(
        store: impl MemberStore + 'static,
        options: RegistryOptions,
    ) -> Result<Self, RegistryError> {
        let registry = Self {
            store: Mutex::new(Box::new(store)),
            published: RwLock::new(RegistrySnapshot::default()),
            options,
        };
        registry.reload()?;
        Ok(registry)
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Persist a new record for `identity` and publish it.
    ///
    /// The record is visible to the next [`snapshot`](Self::snapshot) once
    /// this returns `Ok`.
    pub fn enroll(&self, identity: &str, embedding: Embedding) -> Result<MemberRecord, RegistryError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(RegistryError::InvalidIdentity);
        }
        if let Some(expected) = self.options.expected_dim {
            if embedding.dim() != expected {
                return Err(DimensionMismatch {
                    expected,
                    actual: embedding.dim(),
                }
                .into());
            }
        }
        if !embedding.is_finite() {
            return Err(RegistryError::NonFiniteEmbedding);
        }

        let record = MemberRecord::new(identity, embedding);
        let replace = self.options.duplicate_policy == DuplicatePolicy::Replace;
        let mut store = lock(&self.store);

        if replace {
            let replaced = store.replace(&record)?;
            tracing::debug!(identity, replaced, "replaced prior enrollments");
        } else {
            store.save(&record)?;
        }

        self.update(|records| {
            if replace {
                records.retain(|r| r.identity != identity);
            }
            records.push(record.clone());
        });

        tracing::info!(
            identity,
            id = %record.id,
            dim = record.embedding.dim(),
            "member enrolled"
        );
        Ok(record)
    }

    /// Delete all records for `identity`. Absent identities remove nothing.
    pub fn remove(&self, identity: &str) -> Result<usize, RegistryError> {
        let identity = identity.trim();
        let mut store = lock(&self.store);
        let removed = store.delete_by_identity(identity)?;
        self.update(|records| records.retain(|r| r.identity != identity));
        tracing::info!(identity, removed, "member removed");
        Ok(removed)
    }

    /// Re-read the backing store, replacing the published set.
    pub fn reload(&self) -> Result<usize, RegistryError> {
        let mut store = lock(&self.store);
        let records = store.load()?;
        let count = records.len();
        *self.published.write().unwrap_or_else(|e| e.into_inner()) =
            RegistrySnapshot::from_records(records);
        tracing::info!(count, "registry loaded");
        Ok(count)
    }

    pub fn list(&self) -> Vec<MemberRecord> {
        self.snapshot().records().to_vec()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Copy-on-write update of the published set. Callers hold `store`.
    fn update(&self, f: impl FnOnce(&mut Vec<MemberRecord>)) {
        let mut published = self.published.write().unwrap_or_else(|e| e.into_inner());
        let mut records = published.records().to_vec();
        f(&mut records);
        *published = RegistrySnapshot::from_records(records);
    }
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
