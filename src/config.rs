//! Storage configuration.
//!
//! Values are layered, lowest priority first:
//!
//! 1. built-in defaults
//! 2. `GCS_BUCKET` for the bucket name
//! 3. `GAPC_STORAGE_<FIELD>` environment variables
//! 4. a YAML file or caller supplied overrides

use std::{env, path::Path, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{retry::RetryPolicy, StorageError, StorageResult};

pub const BUCKET_ENV_VAR: &str = "GCS_BUCKET";
pub const ENV_PREFIX: &str = "GAPC_STORAGE_";

/// Fields that must not go through figment's type-guessing env parser.
const STRING_FIELDS: &[&str] = &[
    "bucket",
    "path_prefix",
    "cache_control",
    "url_template",
    "api_endpoint",
];

/// Fully resolved configuration for one storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,

    /// Prepended to every object key.
    #[serde(default)]
    pub path_prefix: String,

    /// `Cache-Control` metadata stored with every uploaded object.
    #[serde(default = "default_cache_control")]
    pub cache_control: String,

    /// When false, saving to an existing name picks an alternative name.
    #[serde(default)]
    pub allow_overwrite: bool,

    /// Retries for transient failures, on top of the first attempt.
    #[serde(default)]
    pub num_retries: u32,

    /// Base delay of the exponential backoff between retries.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Template for public URLs, with `{bucket}` and `{name}` placeholders.
    #[serde(default = "default_url_template")]
    pub url_template: String,

    /// Base URL of the JSON API. Override to target an emulator.
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
}

/// Caller supplied values; unset fields fall through to lower layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_overwrite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,
}

pub fn default_cache_control() -> String {
    "public, max-age=3600".to_string()
}

pub fn default_retry_backoff_ms() -> u64 {
    100
}

pub fn default_url_template() -> String {
    "https://storage.googleapis.com/{bucket}/{name}".to_string()
}

pub fn default_api_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            path_prefix: String::new(),
            cache_control: default_cache_control(),
            allow_overwrite: false,
            num_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            url_template: default_url_template(),
            api_endpoint: default_api_endpoint(),
        }
    }
}

impl StorageConfig {
    /// Configuration for `bucket` with every other field at its default.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Defaults and environment layers, without caller overrides.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(StorageConfig::default()));
        // String fields are read directly so values like `2024` stay strings.
        if let Ok(bucket) = env::var(BUCKET_ENV_VAR) {
            figment = figment.merge(Serialized::default("bucket", bucket));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(STRING_FIELDS));
        for field in STRING_FIELDS {
            let var = format!("{}{}", ENV_PREFIX, field.to_uppercase());
            if let Ok(value) = env::var(var) {
                figment = figment.merge(Serialized::default(field, value));
            }
        }
        figment
    }

    /// Resolves configuration from defaults and the environment only.
    pub fn from_env() -> StorageResult<StorageConfig> {
        Self::from_figment(Self::figment())
    }

    /// Resolves configuration with `overrides` taking precedence.
    pub fn resolve(overrides: StorageOverrides) -> StorageResult<StorageConfig> {
        Self::from_figment(Self::figment().merge(Serialized::defaults(overrides)))
    }

    /// Resolves configuration with a YAML file taking precedence.
    pub fn from_path(path: impl AsRef<Path>) -> StorageResult<StorageConfig> {
        Self::from_figment(Self::figment().merge(Yaml::file(path.as_ref())))
    }

    pub fn from_figment(figment: Figment) -> StorageResult<StorageConfig> {
        let config: StorageConfig =
            figment
                .extract()
                .map_err(|e| StorageError::InvalidConfig {
                    reason: e.to_string(),
                })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.bucket.trim().is_empty() {
            return Err(invalid(format!(
                "bucket must be set, either in the configuration or with the {} environment \
                 variable",
                BUCKET_ENV_VAR
            )));
        }
        if self.bucket.contains('/') {
            return Err(invalid(format!(
                "bucket '{}' must not contain '/'",
                self.bucket
            )));
        }
        if !self.url_template.contains("{name}") {
            return Err(invalid(format!(
                "url_template '{}' has no {{name}} placeholder",
                self.url_template
            )));
        }
        if !self.url_template.contains("://") {
            return Err(invalid(format!(
                "url_template '{}' has no scheme",
                self.url_template
            )));
        }
        match Url::parse(&self.api_endpoint) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => {
                return Err(invalid(format!(
                    "api_endpoint scheme '{}' is not http(s)",
                    url.scheme()
                )))
            }
            Err(e) => {
                return Err(invalid(format!(
                    "invalid api_endpoint '{}': {}",
                    self.api_endpoint, e
                )))
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.num_retries,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }
}

fn invalid(reason: String) -> StorageError {
    StorageError::InvalidConfig { reason }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::new("media");
        assert_eq!(config.cache_control, "public, max-age=3600");
        assert!(!config.allow_overwrite);
        assert_eq!(config.num_retries, 0);
        assert_eq!(config.path_prefix, "");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_bucket_is_rejected() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let err = StorageConfig::from_env().unwrap_err();
            assert!(matches!(err, StorageError::InvalidConfig { .. }));
            assert!(err.to_string().contains(BUCKET_ENV_VAR));
            Ok(())
        });
    }

    #[test]
    fn test_bucket_from_env() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env(BUCKET_ENV_VAR, "12345");
            let config = StorageConfig::from_env().unwrap();
            assert_eq!(config.bucket, "12345");
            Ok(())
        });
    }

    #[test]
    fn test_layering_order() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env(BUCKET_ENV_VAR, "from-env");
            jail.set_env("GAPC_STORAGE_NUM_RETRIES", "3");
            jail.set_env("GAPC_STORAGE_PATH_PREFIX", "media");

            let config = StorageConfig::resolve(StorageOverrides {
                path_prefix: Some("uploads".to_string()),
                allow_overwrite: Some(true),
                ..Default::default()
            })
            .unwrap();

            assert_eq!(config.bucket, "from-env");
            assert_eq!(config.num_retries, 3);
            assert_eq!(config.path_prefix, "uploads");
            assert!(config.allow_overwrite);
            assert_eq!(config.cache_control, default_cache_control());
            Ok(())
        });
    }

    #[test]
    fn test_prefixed_env_overrides_bucket_env() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env(BUCKET_ENV_VAR, "fallback");
            jail.set_env("GAPC_STORAGE_BUCKET", "preferred");
            let config = StorageConfig::from_env().unwrap();
            assert_eq!(config.bucket, "preferred");
            Ok(())
        });
    }

    #[test]
    fn test_numeric_env_values_stay_strings() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("GAPC_STORAGE_BUCKET", "12345");
            jail.set_env("GAPC_STORAGE_PATH_PREFIX", "2024");
            jail.set_env("GAPC_STORAGE_CACHE_CONTROL", "no-cache");
            jail.set_env("GAPC_STORAGE_NUM_RETRIES", "2");
            jail.set_env("GAPC_STORAGE_ALLOW_OVERWRITE", "true");

            let config = StorageConfig::from_env().unwrap();
            assert_eq!(config.bucket, "12345");
            assert_eq!(config.path_prefix, "2024");
            assert_eq!(config.cache_control, "no-cache");
            assert_eq!(config.num_retries, 2);
            assert!(config.allow_overwrite);
            Ok(())
        });
    }

    #[test]
    fn test_from_yaml_file() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "storage.yaml",
                r#"
bucket: assets
cache_control: "private, max-age=0"
num_retries: 5
"#,
            )?;
            let config = StorageConfig::from_path("storage.yaml").unwrap();
            assert_eq!(config.bucket, "assets");
            assert_eq!(config.cache_control, "private, max-age=0");
            assert_eq!(config.num_retries, 5);
            Ok(())
        });
    }

    #[test]
    fn test_validate_url_template_and_endpoint() {
        let mut config = StorageConfig::new("media");
        config.url_template = "https://cdn.example.com/{bucket}".to_string();
        assert!(config.validate().is_err());

        let mut config = StorageConfig::new("media");
        config.api_endpoint = "ftp://localhost".to_string();
        assert!(config.validate().is_err());

        let mut config = StorageConfig::new("media");
        config.api_endpoint = "http://localhost:4443".to_string();
        assert!(config.validate().is_ok());
    }
}
