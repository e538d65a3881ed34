//! Collaborator seams: template lookup, blob storage, job persistence.
//!
//! The pipeline depends only on these traits, never on a concrete client.
//! Hosts inject their database- and object-store-backed implementations;
//! tests (and small embedders) use the [`memory`] implementations. Held as
//! `Arc<dyn …>` so one set of collaborators serves all concurrent requests.

use crate::model::{MergeJob, Template};
use async_trait::async_trait;
use thiserror::Error;

/// Failure inside a collaborator. The pipeline wraps these into the
/// appropriate [`crate::error::MergeError`] variant at each call site.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

/// Template metadata lookup by identity.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Returns `Ok(None)` when no template exists under `id`.
    async fn find(&self, id: &str) -> Result<Option<Template>, StoreError>;
}

/// Raw byte storage for template files and merged outputs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the raw bytes stored under `name`.
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, StoreError>;

    /// Store `bytes` under `name`, returning the resolved location
    /// (a key, path, or URL — opaque to the pipeline).
    async fn store(&self, name: &str, bytes: &[u8]) -> Result<String, StoreError>;
}

/// Persistence for merge job records.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist one job record, returning an opaque job identifier.
    async fn create(&self, job: &MergeJob) -> Result<String, StoreError>;
}

/// In-memory collaborator implementations.
///
/// Used by the e2e tests and handy for embedders that don't need durable
/// storage. All three are cheap to clone via `Arc` and safe under
/// concurrent merges.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::RwLock;

    /// [`TemplateStore`] backed by a `HashMap`.
    #[derive(Default)]
    pub struct InMemoryTemplateStore {
        templates: RwLock<HashMap<String, Template>>,
    }

    impl InMemoryTemplateStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, template: Template) {
            self.templates
                .write()
                .expect("template lock poisoned")
                .insert(template.id.clone(), template);
        }
    }

    #[async_trait]
    impl TemplateStore for InMemoryTemplateStore {
        async fn find(&self, id: &str) -> Result<Option<Template>, StoreError> {
            Ok(self
                .templates
                .read()
                .expect("template lock poisoned")
                .get(id)
                .cloned())
        }
    }

    /// [`BlobStore`] backed by a `HashMap<String, Vec<u8>>`.
    #[derive(Default)]
    pub struct InMemoryBlobStore {
        objects: RwLock<HashMap<String, Vec<u8>>>,
    }

    impl InMemoryBlobStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, name: impl Into<String>, bytes: Vec<u8>) {
            self.objects
                .write()
                .expect("blob lock poisoned")
                .insert(name.into(), bytes);
        }

        /// Read back a stored object (test inspection).
        pub fn get(&self, name: &str) -> Option<Vec<u8>> {
            self.objects
                .read()
                .expect("blob lock poisoned")
                .get(name)
                .cloned()
        }

        pub fn len(&self) -> usize {
            self.objects.read().expect("blob lock poisoned").len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    #[async_trait]
    impl BlobStore for InMemoryBlobStore {
        async fn fetch(&self, name: &str) -> Result<Vec<u8>, StoreError> {
            self.objects
                .read()
                .expect("blob lock poisoned")
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError(format!("no blob stored under '{name}'")))
        }

        async fn store(&self, name: &str, bytes: &[u8]) -> Result<String, StoreError> {
            self.objects
                .write()
                .expect("blob lock poisoned")
                .insert(name.to_string(), bytes.to_vec());
            Ok(name.to_string())
        }
    }

    /// [`JobRepository`] that appends to a vector and hands out sequential ids.
    #[derive(Default)]
    pub struct InMemoryJobRepository {
        jobs: RwLock<Vec<(String, MergeJob)>>,
        next_id: AtomicU64,
    }

    impl InMemoryJobRepository {
        pub fn new() -> Self {
            Self::default()
        }

        /// All persisted jobs, in creation order (test inspection).
        pub fn jobs(&self) -> Vec<(String, MergeJob)> {
            self.jobs.read().expect("job lock poisoned").clone()
        }

        pub fn len(&self) -> usize {
            self.jobs.read().expect("job lock poisoned").len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    #[async_trait]
    impl JobRepository for InMemoryJobRepository {
        async fn create(&self, job: &MergeJob) -> Result<String, StoreError> {
            let id = format!("job-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            self.jobs
                .write()
                .expect("job lock poisoned")
                .push((id.clone(), job.clone()));
            Ok(id)
        }
    }
}
