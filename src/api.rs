//! Object API abstraction.
//!
//! [`ObjectApi`] is the client handle shared by every storage operation. The
//! methods map one-to-one onto GCS JSON API calls and perform no retries:
//! retrying is the caller's job (see [`RetryPolicy`](crate::RetryPolicy)).

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ApiResult;

/// Metadata of a stored object, as returned by the JSON API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectResource {
    pub name: String,

    #[serde(default)]
    pub bucket: String,

    /// Size in bytes. The API encodes it as a decimal string.
    #[serde(with = "string_u64")]
    pub size: u64,

    pub updated: DateTime<Utc>,

    pub time_created: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
}

/// Metadata sent along with an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewObject {
    pub name: String,
    pub content_type: String,
    pub cache_control: String,
}

/// One page of an object listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    #[serde(default)]
    pub items: Vec<ObjectResource>,

    /// Common prefixes when a delimiter was requested, each ending with the
    /// delimiter.
    #[serde(default)]
    pub prefixes: Vec<String>,

    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Parameters of a listing request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListRequest<'a> {
    pub prefix: &'a str,
    pub delimiter: Option<&'a str>,
    pub page_token: Option<&'a str>,
}

/// Raw object store calls.
///
/// Implementations must be safe for concurrent use: one instance is shared
/// by every thread using a storage backend.
pub trait ObjectApi: Send + Sync {
    /// Fetch object metadata.
    fn get_object(&self, bucket: &str, name: &str) -> ApiResult<ObjectResource>;

    /// Download the full object content.
    fn get_media(&self, bucket: &str, name: &str) -> ApiResult<Bytes>;

    /// Create or replace an object in a single request. The object becomes
    /// visible only once the whole payload is stored.
    fn insert_object(&self, bucket: &str, object: &NewObject, data: Bytes)
        -> ApiResult<ObjectResource>;

    fn delete_object(&self, bucket: &str, name: &str) -> ApiResult<()>;

    fn list_objects(&self, bucket: &str, request: ListRequest<'_>) -> ApiResult<ListPage>;
}

/// Source of OAuth bearer tokens.
///
/// Acquiring and refreshing credentials is up to the implementation; it is
/// called before each request.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> anyhow::Result<String>;
}

/// Token provider returning a fixed token.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider").finish_non_exhaustive()
    }
}

impl TokenProvider for StaticTokenProvider {
    fn token(&self) -> anyhow::Result<String> {
        Ok(self.token.clone())
    }
}

mod string_u64 {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum StringOrNumber {
            String(String),
            Number(u64),
        }

        match StringOrNumber::deserialize(deserializer)? {
            StringOrNumber::String(s) => s.parse().map_err(serde::de::Error::custom),
            StringOrNumber::Number(n) => Ok(n),
        }
    }
}
