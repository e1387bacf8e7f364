//! Google Cloud Storage JSON API client.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use rand::{distr::Alphanumeric, Rng};
use reqwest::{
    blocking::{Client, RequestBuilder, Response},
    header::CONTENT_TYPE,
};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::{
    api::{ListPage, ListRequest, NewObject, ObjectApi, ObjectResource, TokenProvider},
    ApiError,
    ApiResult,
};

/// Timeout for a single HTTP request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Blocking client for the GCS JSON API.
///
/// The underlying `reqwest` client pools connections and is safe to share
/// between threads.
pub struct JsonApiClient {
    http: Client,
    endpoint: Url,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

impl JsonApiClient {
    /// Create a client for `endpoint` (e.g. `https://storage.googleapis.com`).
    ///
    /// Without a token provider, requests are sent unauthenticated, which is
    /// what local emulators expect.
    pub fn new(
        endpoint: &str,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> anyhow::Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        if endpoint.cannot_be_a_base() {
            anyhow::bail!("api endpoint '{}' cannot be a base URL", endpoint);
        }
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("gcs_storage/", env!("CARGO_PKG_VERSION")))
            .build()?;

        debug!(endpoint = %endpoint, "created JSON API client");

        Ok(Self {
            http,
            endpoint,
            token_provider,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        // Checked in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// `/storage/v1/b/{bucket}/o/{name}` with the name encoded as a single
    /// segment.
    pub(crate) fn object_url(&self, bucket: &str, name: &str) -> Url {
        self.url(&["storage", "v1", "b", bucket, "o", name])
    }

    pub(crate) fn list_url(&self, bucket: &str, request: ListRequest<'_>) -> Url {
        let mut url = self.url(&["storage", "v1", "b", bucket, "o"]);
        let pairs = [
            ("prefix", Some(request.prefix).filter(|p| !p.is_empty())),
            ("delimiter", request.delimiter),
            ("pageToken", request.page_token),
        ];
        if pairs.iter().any(|(_, value)| value.is_some()) {
            let mut query = url.query_pairs_mut();
            for (name, value) in pairs {
                if let Some(value) = value {
                    query.append_pair(name, value);
                }
            }
        }
        url
    }

    pub(crate) fn upload_url(&self, bucket: &str) -> Url {
        let mut url = self.url(&["upload", "storage", "v1", "b", bucket, "o"]);
        url.query_pairs_mut().append_pair("uploadType", "multipart");
        url
    }

    fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        let request = match &self.token_provider {
            Some(provider) => {
                let token = provider.token().map_err(ApiError::auth)?;
                request.bearer_auth(token)
            }
            None => request,
        };

        let response = request.send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(ApiError::status(status.as_u16(), error_message(&body)))
    }
}

/// Extracts the message from a JSON API error body, falling back to the raw
/// body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => body.trim().to_string(),
    }
}

/// Builds a `multipart/related` upload body: JSON metadata, then media.
pub(crate) fn multipart_body(
    boundary: &str,
    object: &NewObject,
    data: &[u8],
) -> ApiResult<Vec<u8>> {
    let metadata = serde_json::to_vec(object).map_err(|e| ApiError::decode(e.into()))?;
    let mut body = Vec::with_capacity(data.len() + metadata.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(&metadata);
    body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", object.content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    Ok(body)
}

fn new_boundary() -> String {
    let token: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    format!("gcs_storage_{}", token)
}

impl ObjectApi for JsonApiClient {
    fn get_object(&self, bucket: &str, name: &str) -> ApiResult<ObjectResource> {
        let response = self.send(self.http.get(self.object_url(bucket, name)))?;
        Ok(response.json()?)
    }

    fn get_media(&self, bucket: &str, name: &str) -> ApiResult<Bytes> {
        let mut url = self.object_url(bucket, name);
        url.query_pairs_mut().append_pair("alt", "media");
        let response = self.send(self.http.get(url))?;
        Ok(response.bytes()?)
    }

    fn insert_object(
        &self,
        bucket: &str,
        object: &NewObject,
        data: Bytes,
    ) -> ApiResult<ObjectResource> {
        let boundary = new_boundary();
        let body = multipart_body(&boundary, object, &data)?;
        let request = self
            .http
            .post(self.upload_url(bucket))
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body);
        let response = self.send(request)?;
        Ok(response.json()?)
    }

    fn delete_object(&self, bucket: &str, name: &str) -> ApiResult<()> {
        self.send(self.http.delete(self.object_url(bucket, name)))?;
        Ok(())
    }

    fn list_objects(&self, bucket: &str, request: ListRequest<'_>) -> ApiResult<ListPage> {
        let response = self.send(self.http.get(self.list_url(bucket, request)))?;
        Ok(response.json()?)
    }
}
