//! Storage operations on object keys.
//!
//! Every call takes the shared client explicitly and goes through the
//! engine's [`RetryPolicy`]. Operations keep no mutable state of their own,
//! so they can run concurrently from any number of threads.

use std::{collections::BTreeSet, io::Read};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    api::{ListRequest, NewObject, ObjectApi, ObjectResource},
    error::Operation,
    name::{alternative_name, SEPARATOR},
    retry::RetryPolicy,
    ApiResult,
    StorageConfig,
    StorageError,
    StorageResult,
};

/// Alternative names tried before giving up on a collision.
pub const MAX_NAME_ATTEMPTS: usize = 100;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const DELIMITER: &str = "/";

/// One level of a hierarchical listing, names relative to the listed
/// directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    pub directories: BTreeSet<String>,
    pub files: BTreeSet<String>,
}

/// Implements storage semantics on top of raw object API calls.
#[derive(Debug, Clone)]
pub struct ObjectOperations {
    bucket: String,
    cache_control: String,
    allow_overwrite: bool,
    url_template: String,
    retry: RetryPolicy,
}

impl ObjectOperations {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            bucket: config.bucket.clone(),
            cache_control: config.cache_control.clone(),
            allow_overwrite: config.allow_overwrite,
            url_template: config.url_template.clone(),
            retry: config.retry_policy(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn allow_overwrite(&self) -> bool {
        self.allow_overwrite
    }

    fn call<T, F>(&self, operation: Operation, key: &str, call: F) -> StorageResult<T>
    where
        F: FnMut() -> ApiResult<T>,
    {
        self.retry
            .run(operation, key, call)
            .map_err(|(err, attempts)| StorageError::from_api(operation, key, attempts, err))
    }

    fn metadata(
        &self,
        client: &dyn ObjectApi,
        operation: Operation,
        key: &str,
    ) -> StorageResult<ObjectResource> {
        self.call(operation, key, || client.get_object(&self.bucket, key))
    }

    pub fn exists(&self, client: &dyn ObjectApi, key: &str) -> StorageResult<bool> {
        match self.metadata(client, Operation::Exists, key) {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// `key` if it is free, otherwise the first free alternative name.
    ///
    /// The check is best effort: another process may claim the name between
    /// the check and the upload.
    pub fn available_key(&self, client: &dyn ObjectApi, key: &str) -> StorageResult<String> {
        if !self.exists(client, key)? {
            return Ok(key.to_string());
        }
        for _ in 0..MAX_NAME_ATTEMPTS {
            let candidate = alternative_name(key);
            if !self.exists(client, &candidate)? {
                debug!(bucket = %self.bucket, key = %key, alternative = %candidate, "name taken, using alternative");
                return Ok(candidate);
            }
        }
        Err(StorageError::Collision {
            key: key.to_string(),
            attempts: MAX_NAME_ATTEMPTS,
        })
    }

    /// Reads `content` to the end and stores it, honoring the overwrite
    /// policy. Returns the key actually written.
    pub fn save(
        &self,
        client: &dyn ObjectApi,
        key: &str,
        content: &mut dyn Read,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let mut data = Vec::new();
        content
            .read_to_end(&mut data)
            .map_err(|source| StorageError::Io {
                key: key.to_string(),
                source,
            })?;
        self.save_bytes(client, key, Bytes::from(data), content_type)
    }

    pub fn save_bytes(
        &self,
        client: &dyn ObjectApi,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let key = if self.allow_overwrite {
            key.to_string()
        } else {
            self.available_key(client, key)?
        };
        self.put(client, Operation::Save, &key, data, content_type)?;
        Ok(key)
    }

    /// Stores `data` at exactly `key`, replacing any existing object.
    pub fn upload(
        &self,
        client: &dyn ObjectApi,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<ObjectResource> {
        self.put(client, Operation::Upload, key, data, content_type)
    }

    fn put(
        &self,
        client: &dyn ObjectApi,
        operation: Operation,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<ObjectResource> {
        let object = NewObject {
            name: key.to_string(),
            content_type: content_type
                .map(str::to_string)
                .unwrap_or_else(|| guess_content_type(key)),
            cache_control: self.cache_control.clone(),
        };
        debug!(
            bucket = %self.bucket,
            key = %key,
            size = data.len(),
            content_type = %object.content_type,
            "uploading object"
        );
        self.call(operation, key, || {
            client.insert_object(&self.bucket, &object, data.clone())
        })
    }

    /// Deletes `key`. A missing object is not an error.
    pub fn delete(&self, client: &dyn ObjectApi, key: &str) -> StorageResult<()> {
        match self.call(Operation::Delete, key, || {
            client.delete_object(&self.bucket, key)
        }) {
            Ok(()) => {
                debug!(bucket = %self.bucket, key = %key, "deleted object");
                Ok(())
            }
            Err(StorageError::NotFound { .. }) => {
                debug!(bucket = %self.bucket, key = %key, "object already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Full content of `key`.
    pub fn open_read(&self, client: &dyn ObjectApi, key: &str) -> StorageResult<Bytes> {
        self.call(Operation::Open, key, || client.get_media(&self.bucket, key))
    }

    pub fn size(&self, client: &dyn ObjectApi, key: &str) -> StorageResult<u64> {
        Ok(self.metadata(client, Operation::Size, key)?.size)
    }

    pub fn modified_time(&self, client: &dyn ObjectApi, key: &str) -> StorageResult<DateTime<Utc>> {
        Ok(self.metadata(client, Operation::ModifiedTime, key)?.updated)
    }

    pub fn created_time(&self, client: &dyn ObjectApi, key: &str) -> StorageResult<DateTime<Utc>> {
        Ok(self.metadata(client, Operation::CreatedTime, key)?.time_created)
    }

    /// Public URL of `key`. Everything after the host is percent-encoded,
    /// except `/`.
    pub fn url(&self, key: &str) -> String {
        let url = self
            .url_template
            .replace("{bucket}", &self.bucket)
            .replace("{name}", key);
        let Some((scheme, rest)) = url.split_once("://") else {
            return url;
        };
        let (authority, path) = match rest.find(SEPARATOR) {
            Some(pos) => rest.split_at(pos),
            None => (rest, ""),
        };
        let path = path
            .split(SEPARATOR)
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}://{}{}", scheme, authority, path)
    }

    /// Lists the immediate children of `dir_key`, which must be empty (the
    /// bucket root) or end with a separator.
    pub fn list(&self, client: &dyn ObjectApi, dir_key: &str) -> StorageResult<DirectoryListing> {
        let mut listing = DirectoryListing::default();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.call(Operation::List, dir_key, || {
                client.list_objects(
                    &self.bucket,
                    ListRequest {
                        prefix: dir_key,
                        delimiter: Some(DELIMITER),
                        page_token: page_token.as_deref(),
                    },
                )
            })?;

            for item in &page.items {
                let Some(rest) = item.name.strip_prefix(dir_key) else {
                    continue;
                };
                match rest.split_once(SEPARATOR) {
                    Some((dir, _)) if !dir.is_empty() => {
                        listing.directories.insert(dir.to_string());
                    }
                    Some(_) => {}
                    // The directory placeholder itself has an empty rest.
                    None if !rest.is_empty() => {
                        listing.files.insert(rest.to_string());
                    }
                    None => {}
                }
            }
            for prefix in &page.prefixes {
                if let Some(dir) = prefix
                    .strip_prefix(dir_key)
                    .map(|rest| rest.trim_end_matches(SEPARATOR))
                    .filter(|dir| !dir.is_empty())
                {
                    listing.directories.insert(dir.to_string());
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!(
            bucket = %self.bucket,
            prefix = %dir_key,
            directories = listing.directories.len(),
            files = listing.files.len(),
            "listed directory"
        );
        Ok(listing)
    }
}

/// MIME type from the extension of `key`.
pub fn guess_content_type(key: &str) -> String {
    mime_guess::from_path(key)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}
