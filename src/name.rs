//! Mapping between logical storage names and object keys.

use rand::{distr::Alphanumeric, Rng};

use crate::{StorageError, StorageResult};

pub const SEPARATOR: char = '/';

/// Length of the random suffix used by [`alternative_name`].
const SUFFIX_LEN: usize = 7;

/// Resolves logical paths against the configured path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameResolver {
    /// Normalized prefix, without leading or trailing separators.
    prefix: String,
}

impl NameResolver {
    pub fn new(path_prefix: &str) -> Self {
        Self {
            prefix: normalize(path_prefix),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Object key for `logical_path`.
    pub fn resolve(&self, logical_path: &str) -> StorageResult<String> {
        let path = normalize_checked(logical_path)?;
        if path.is_empty() {
            return Err(StorageError::NameResolution {
                name: logical_path.to_string(),
                reason: "name is empty".to_string(),
            });
        }
        Ok(self.join(&path))
    }

    /// Key prefix for listing the directory `logical_path`. It ends with a
    /// separator unless it addresses the bucket root.
    pub fn resolve_dir(&self, logical_path: &str) -> StorageResult<String> {
        let path = normalize_checked(logical_path)?;
        let key = self.join(&path);
        if key.is_empty() {
            Ok(key)
        } else {
            Ok(format!("{}{}", key, SEPARATOR))
        }
    }

    /// Logical name for an object key produced by [`NameResolver::resolve`].
    pub fn logical_name(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            return key.to_string();
        }
        key.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(SEPARATOR))
            .unwrap_or(key)
            .to_string()
    }

    fn join(&self, path: &str) -> String {
        match (self.prefix.is_empty(), path.is_empty()) {
            (true, _) => path.to_string(),
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}{}{}", self.prefix, SEPARATOR, path),
        }
    }
}

/// Collapses separators and drops `.` segments and surrounding separators.
fn normalize(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn normalize_checked(path: &str) -> StorageResult<String> {
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(StorageError::NameResolution {
            name: path.to_string(),
            reason: "parent directory references are not allowed".to_string(),
        });
    }
    Ok(normalize(path))
}

/// Splits a file name into root and extension, keeping the dot with the
/// extension. Leading dots belong to the root (`.env` has no extension).
fn split_extension(file_name: &str) -> (&str, &str) {
    let stem_start = file_name.len() - file_name.trim_start_matches('.').len();
    match file_name[stem_start..].rfind('.') {
        Some(pos) => file_name.split_at(stem_start + pos),
        None => (file_name, ""),
    }
}

/// Candidate name for `key` when it is already taken: a random suffix is
/// appended to the file root, keeping directory and extension.
pub fn alternative_name(key: &str) -> String {
    let (dir, file_name) = match key.rfind(SEPARATOR) {
        Some(pos) => key.split_at(pos + 1),
        None => ("", key),
    };
    let (root, ext) = split_extension(file_name);
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}{}_{}{}", dir, root, suffix, ext)
}
