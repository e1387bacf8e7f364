//! File-storage backend over the Google Cloud Storage JSON API.
//!
//! This crate maps filesystem-like operations onto object store calls:
//!
//! - open, save, delete, exists, listdir, size, modified/created time, url
//! - path prefixing with normalized separators
//! - overwrite policy: replace, or pick an alternative free name
//! - `Cache-Control` and `Content-Type` metadata on every upload
//! - retries with exponential backoff for transient failures
//! - file handles that transparently reopen after being closed
//!
//! # Architecture
//!
//! [`GcsStorage`] implements the [`Storage`] trait. It resolves logical names
//! to object keys with a [`NameResolver`], obtains the shared client from a
//! [`ClientProvider`] (built once, on first use) and runs
//! [`ObjectOperations`] against the [`ObjectApi`] seam. [`JsonApiClient`]
//! talks to GCS over HTTP; [`MemoryObjectApi`] keeps objects in memory.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::{io::{Read, Write}, sync::Arc};
//!
//! use gcs_storage::{GcsStorage, OpenMode, StaticTokenProvider, Storage, StorageConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StorageConfig::from_env()?;
//! let storage = GcsStorage::new(config, Some(Arc::new(StaticTokenProvider::new("ya29..."))))?;
//!
//! let name = storage.save("avatars/me.png", &mut std::fs::File::open("me.png")?)?;
//! println!("stored at {}", storage.url(&name)?);
//!
//! let mut file = storage.open("notes/today.txt", OpenMode::Write)?;
//! file.write_all(b"first line\n")?;
//! file.close()?;
//!
//! let mut content = String::new();
//! storage.open("notes/today.txt", OpenMode::Read)?.read_to_string(&mut content)?;
//! # Ok(())
//! # }
//! ```

pub mod api;
mod client;
mod config;
mod error;
mod file;
mod json_api;
mod memory;
mod metrics;
mod name;
mod operations;
mod retry;
mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::{
    ListPage,
    ListRequest,
    NewObject,
    ObjectApi,
    ObjectResource,
    StaticTokenProvider,
    TokenProvider,
};
pub use client::{ClientFactory, ClientHandle, ClientProvider};
pub use config::{StorageConfig, StorageOverrides, BUCKET_ENV_VAR, ENV_PREFIX};
pub use error::{ApiError, ApiErrorKind, ApiResult, Operation, StorageError, StorageResult};
pub use file::{OpenMode, RemoteFile};
pub use json_api::JsonApiClient;
pub use memory::MemoryObjectApi;
pub use metrics::{StorageMetrics, Timer};
pub use name::{alternative_name, NameResolver};
pub use operations::{guess_content_type, DirectoryListing, ObjectOperations, MAX_NAME_ATTEMPTS};
pub use retry::RetryPolicy;
pub use storage::{GcsStorage, Storage};
