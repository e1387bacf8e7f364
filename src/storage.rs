//! File-storage backend over an object store.

use std::{
    io::{Read, Write},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use opentelemetry::metrics::Meter;
use tracing::{debug, info, warn};

use crate::{
    api::{ObjectApi, TokenProvider},
    client::{ClientHandle, ClientProvider},
    error::Operation,
    file::{OpenMode, RemoteFile},
    json_api::JsonApiClient,
    metrics::StorageMetrics,
    name::NameResolver,
    operations::{DirectoryListing, ObjectOperations},
    StorageConfig,
    StorageResult,
};

/// The operations a file-storage backend offers to its host application.
///
/// Names are logical: they never include the configured path prefix.
pub trait Storage: Send + Sync {
    type File: Read + Write;

    fn open(&self, name: &str, mode: OpenMode) -> StorageResult<Self::File>;

    /// Stores `content` under `name` or, when overwriting is disabled and
    /// the name is taken, under an alternative name. Returns the name used.
    fn save(&self, name: &str, content: &mut dyn Read) -> StorageResult<String>;

    /// Deleting a missing file succeeds.
    fn delete(&self, name: &str) -> StorageResult<()>;

    fn exists(&self, name: &str) -> StorageResult<bool>;

    /// Immediate subdirectories and files of `path`.
    fn listdir(&self, path: &str) -> StorageResult<DirectoryListing>;

    fn size(&self, name: &str) -> StorageResult<u64>;

    fn get_modified_time(&self, name: &str) -> StorageResult<DateTime<Utc>>;

    fn get_created_time(&self, name: &str) -> StorageResult<DateTime<Utc>>;

    /// Public URL; no network access.
    fn url(&self, name: &str) -> StorageResult<String>;
}

/// State shared by a storage and the files it opened.
pub(crate) struct Backend {
    pub(crate) config: StorageConfig,
    pub(crate) resolver: NameResolver,
    pub(crate) operations: ObjectOperations,
    clients: ClientProvider,
    metrics: OnceCell<StorageMetrics>,
}

impl Backend {
    /// Runs `f` with the shared client, recording latency and failures.
    pub(crate) fn instrument<T>(
        &self,
        operation: Operation,
        key: &str,
        f: impl FnOnce(&dyn ObjectApi) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let _timer = self.metrics.get().map(|m| m.start(operation));
        let result = self
            .clients
            .get_client()
            .and_then(|client| f(client.as_ref()));
        if let Err(err) = &result {
            if let Some(metrics) = self.metrics.get() {
                metrics.record_error(operation);
            }
            debug!(op = %operation, key = %key, "storage operation failed: {}", err);
        }
        result
    }
}

/// Google Cloud Storage backed implementation of [`Storage`].
///
/// Cheap to clone; clones share the client and configuration. The client is
/// built on first use.
#[derive(Clone)]
pub struct GcsStorage {
    backend: Arc<Backend>,
}

impl GcsStorage {
    /// Storage talking to the JSON API at `config.api_endpoint`, with bearer
    /// tokens from `token_provider` (none for unauthenticated access).
    pub fn new(
        config: StorageConfig,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> StorageResult<Self> {
        let endpoint = config.api_endpoint.clone();
        Self::with_client_factory(config, move || {
            let client = JsonApiClient::new(&endpoint, token_provider.clone())?;
            Ok(Arc::new(client) as ClientHandle)
        })
    }

    /// Storage whose client is built by `factory` on first use.
    pub fn with_client_factory<F>(config: StorageConfig, factory: F) -> StorageResult<Self>
    where
        F: Fn() -> anyhow::Result<ClientHandle> + Send + Sync + 'static,
    {
        Self::from_provider(config, ClientProvider::new(factory))
    }

    /// Storage using an existing client.
    pub fn with_client(config: StorageConfig, client: ClientHandle) -> StorageResult<Self> {
        Self::from_provider(config, ClientProvider::from_client(client))
    }

    fn from_provider(config: StorageConfig, clients: ClientProvider) -> StorageResult<Self> {
        config.validate()?;
        info!(
            bucket = %config.bucket,
            prefix = %config.path_prefix,
            allow_overwrite = config.allow_overwrite,
            num_retries = config.num_retries,
            "configured object storage"
        );
        Ok(Self {
            backend: Arc::new(Backend {
                resolver: NameResolver::new(&config.path_prefix),
                operations: ObjectOperations::new(&config),
                clients,
                metrics: OnceCell::new(),
                config,
            }),
        })
    }

    /// Record operation metrics on `meter`. Only the first call has an
    /// effect; clones share the metrics.
    pub fn with_metrics(self, meter: &Meter) -> Self {
        if self.backend.metrics.set(StorageMetrics::new(meter)).is_err() {
            warn!(
                bucket = %self.backend.config.bucket,
                "metrics already attached, ignoring additional meter"
            );
        }
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.backend.config
    }

    pub fn resolver(&self) -> &NameResolver {
        &self.backend.resolver
    }

    /// The shared client, constructing it if needed.
    pub fn client(&self) -> StorageResult<ClientHandle> {
        self.backend.clients.get_client()
    }

    /// Like [`Storage::save`] with an explicit content type.
    pub fn save_with_content_type(
        &self,
        name: &str,
        content: &mut dyn Read,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let backend = &self.backend;
        let key = backend.resolver.resolve(name)?;
        let key = backend.instrument(Operation::Save, &key, |client| {
            backend.operations.save(client, &key, content, content_type)
        })?;
        Ok(backend.resolver.logical_name(&key))
    }

    fn run<T>(
        &self,
        operation: Operation,
        name: &str,
        f: impl FnOnce(&ObjectOperations, &dyn ObjectApi, &str) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let backend = &self.backend;
        let key = backend.resolver.resolve(name)?;
        backend.instrument(operation, &key, |client| {
            f(&backend.operations, client, &key)
        })
    }
}

impl Storage for GcsStorage {
    type File = RemoteFile;

    fn open(&self, name: &str, mode: OpenMode) -> StorageResult<RemoteFile> {
        let key = self.backend.resolver.resolve(name)?;
        let name = self.backend.resolver.logical_name(&key);
        RemoteFile::open(Arc::clone(&self.backend), name, key, mode)
    }

    fn save(&self, name: &str, content: &mut dyn Read) -> StorageResult<String> {
        self.save_with_content_type(name, content, None)
    }

    fn delete(&self, name: &str) -> StorageResult<()> {
        self.run(Operation::Delete, name, |ops, client, key| {
            ops.delete(client, key)
        })
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        self.run(Operation::Exists, name, |ops, client, key| {
            ops.exists(client, key)
        })
    }

    fn listdir(&self, path: &str) -> StorageResult<DirectoryListing> {
        let backend = &self.backend;
        let dir_key = backend.resolver.resolve_dir(path)?;
        backend.instrument(Operation::List, &dir_key, |client| {
            backend.operations.list(client, &dir_key)
        })
    }

    fn size(&self, name: &str) -> StorageResult<u64> {
        self.run(Operation::Size, name, |ops, client, key| ops.size(client, key))
    }

    fn get_modified_time(&self, name: &str) -> StorageResult<DateTime<Utc>> {
        self.run(Operation::ModifiedTime, name, |ops, client, key| {
            ops.modified_time(client, key)
        })
    }

    fn get_created_time(&self, name: &str) -> StorageResult<DateTime<Utc>> {
        self.run(Operation::CreatedTime, name, |ops, client, key| {
            ops.created_time(client, key)
        })
    }

    fn url(&self, name: &str) -> StorageResult<String> {
        let key = self.backend.resolver.resolve(name)?;
        Ok(self.backend.operations.url(&key))
    }
}

impl std::fmt::Debug for GcsStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsStorage")
            .field("bucket", &self.backend.config.bucket)
            .field("prefix", &self.backend.resolver.prefix())
            .field("client", &self.backend.clients)
            .finish()
    }
}
