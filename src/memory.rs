//! In-memory object API for testing and local development.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        PoisonError,
        RwLock,
    },
};

use bytes::Bytes;
use chrono::Utc;

use crate::{
    api::{ListPage, ListRequest, NewObject, ObjectApi, ObjectResource},
    ApiError,
    ApiResult,
};

const DEFAULT_PAGE_SIZE: usize = 1000;

struct StoredObject {
    resource: ObjectResource,
    data: Bytes,
}

/// Object API backed by a map, with the listing semantics of the JSON API
/// (prefix, delimiter, pagination).
///
/// Nothing is persisted between runs.
pub struct MemoryObjectApi {
    objects: RwLock<BTreeMap<(String, String), StoredObject>>,
    generation: AtomicU64,
    page_size: usize,
}

enum Entry<'a> {
    Item(&'a ObjectResource),
    Prefix(String),
}

impl MemoryObjectApi {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            generation: AtomicU64::new(1),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Limit the number of entries per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Names of all objects stored in `bucket`, sorted.
    pub fn object_names(&self, bucket: &str) -> Vec<String> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn not_found(bucket: &str, name: &str) -> ApiError {
        ApiError::not_found(format!("No such object: {}/{}", bucket, name))
    }
}

impl Default for MemoryObjectApi {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectApi for MemoryObjectApi {
    fn get_object(&self, bucket: &str, name: &str) -> ApiResult<ObjectResource> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects
            .get(&(bucket.to_string(), name.to_string()))
            .map(|stored| stored.resource.clone())
            .ok_or_else(|| Self::not_found(bucket, name))
    }

    fn get_media(&self, bucket: &str, name: &str) -> ApiResult<Bytes> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects
            .get(&(bucket.to_string(), name.to_string()))
            .map(|stored| stored.data.clone())
            .ok_or_else(|| Self::not_found(bucket, name))
    }

    fn insert_object(
        &self,
        bucket: &str,
        object: &NewObject,
        data: Bytes,
    ) -> ApiResult<ObjectResource> {
        if object.name.is_empty() {
            return Err(ApiError::status(400, "object name is required"));
        }
        let now = Utc::now();
        let resource = ObjectResource {
            name: object.name.clone(),
            bucket: bucket.to_string(),
            size: data.len() as u64,
            updated: now,
            time_created: now,
            content_type: Some(object.content_type.clone()),
            cache_control: Some(object.cache_control.clone()),
            md5_hash: None,
            generation: Some(self.generation.fetch_add(1, Ordering::SeqCst).to_string()),
        };
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        objects.insert(
            (bucket.to_string(), object.name.clone()),
            StoredObject {
                resource: resource.clone(),
                data,
            },
        );
        Ok(resource)
    }

    fn delete_object(&self, bucket: &str, name: &str) -> ApiResult<()> {
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        objects
            .remove(&(bucket.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(bucket, name))
    }

    fn list_objects(&self, bucket: &str, request: ListRequest<'_>) -> ApiResult<ListPage> {
        let offset = match request.page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ApiError::status(400, format!("invalid page token '{}'", token)))?,
            None => 0,
        };

        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let mut items = Vec::new();
        let mut prefixes = BTreeSet::new();
        for ((b, name), stored) in objects.iter() {
            if b != bucket || !name.starts_with(request.prefix) {
                continue;
            }
            let rest = &name[request.prefix.len()..];
            match request.delimiter.and_then(|d| rest.find(d).map(|i| i + d.len())) {
                Some(end) => {
                    prefixes.insert(format!("{}{}", request.prefix, &rest[..end]));
                }
                None => items.push(Entry::Item(&stored.resource)),
            }
        }
        let mut entries: Vec<Entry<'_>> = items;
        entries.extend(prefixes.into_iter().map(Entry::Prefix));

        let mut page = ListPage::default();
        let end = (offset + self.page_size).min(entries.len());
        for entry in entries.iter().take(end).skip(offset) {
            match entry {
                Entry::Item(resource) => page.items.push((*resource).clone()),
                Entry::Prefix(prefix) => page.prefixes.push(prefix.clone()),
            }
        }
        if end < entries.len() {
            page.next_page_token = Some(end.to_string());
        }
        Ok(page)
    }
}
