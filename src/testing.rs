//! Helpers for tests: fault injection and an in-memory backed storage.
//!
//! Only built for unit tests and with the `testing` feature; the integration
//! suite needs `cargo test --features testing`.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use bytes::Bytes;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{
    api::{ListPage, ListRequest, NewObject, ObjectApi, ObjectResource},
    ApiError,
    ApiResult,
    GcsStorage,
    MemoryObjectApi,
    StorageConfig,
    StorageResult,
};

/// Wraps an [`ObjectApi`] and fails the first `failures` calls with
/// `status`.
pub struct FaultyObjectApi<A> {
    inner: A,
    failures: AtomicU32,
    status: u16,
    calls: AtomicU32,
}

impl<A: ObjectApi> FaultyObjectApi<A> {
    pub fn new(inner: A, failures: u32, status: u16) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
            status,
            calls: AtomicU32::new(0),
        }
    }

    /// Total calls received, failed ones included.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail the next `failures` calls.
    pub fn fail_next(&self, failures: u32) {
        self.failures.store(failures, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    fn inject(&self) -> ApiResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(ApiError::status(self.status, "injected failure"))
        } else {
            Ok(())
        }
    }
}

impl<A: ObjectApi> ObjectApi for FaultyObjectApi<A> {
    fn get_object(&self, bucket: &str, name: &str) -> ApiResult<ObjectResource> {
        self.inject()?;
        self.inner.get_object(bucket, name)
    }

    fn get_media(&self, bucket: &str, name: &str) -> ApiResult<Bytes> {
        self.inject()?;
        self.inner.get_media(bucket, name)
    }

    fn insert_object(
        &self,
        bucket: &str,
        object: &NewObject,
        data: Bytes,
    ) -> ApiResult<ObjectResource> {
        self.inject()?;
        self.inner.insert_object(bucket, object, data)
    }

    fn delete_object(&self, bucket: &str, name: &str) -> ApiResult<()> {
        self.inject()?;
        self.inner.delete_object(bucket, name)
    }

    fn list_objects(&self, bucket: &str, request: ListRequest<'_>) -> ApiResult<ListPage> {
        self.inject()?;
        self.inner.list_objects(bucket, request)
    }
}

/// A [`GcsStorage`] over a [`MemoryObjectApi`], with logging set up.
pub struct TestStorage {
    pub storage: GcsStorage,
    pub api: Arc<MemoryObjectApi>,
}

impl TestStorage {
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        init_tracing();
        let api = Arc::new(MemoryObjectApi::new());
        let storage = GcsStorage::with_client(config, api.clone())?;
        Ok(Self { storage, api })
    }

    /// Raw content of an object, bypassing the storage layer.
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.api.get_media(self.storage.config().bucket.as_str(), key).ok()
    }
}

/// Installs a global subscriber honoring `RUST_LOG`; later calls are no-ops.
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = subscriber::set_global_default(
        tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .with_test_writer()
                .with_filter(env_filter),
        ),
    );
}
