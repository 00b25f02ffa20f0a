//! Locating deployable packages in a build directory and describing where
//! they were published.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::{PublishError, Result};

/// Extension of packaged function artifacts.
pub const PACKAGE_EXTENSION: &str = "zip";

/// Filename -> destination key, before upload.
pub type AssetPlan = BTreeMap<String, String>;

/// Filename -> published location, after upload.
pub type AssetKeyMap = BTreeMap<String, StorageRef>;

/// Where an object ended up in storage.
///
/// `Key` is produced by a bucket without versioning; `Versioned` by one with
/// versioning enabled. The two are kept distinct instead of pairing a key
/// with an optional version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StorageRef {
    Key(String),
    Versioned { key: String, version: String },
}

impl StorageRef {
    pub fn new(key: impl Into<String>, version: Option<String>) -> Self {
        match version {
            Some(version) => StorageRef::Versioned {
                key: key.into(),
                version,
            },
            None => StorageRef::Key(key.into()),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            StorageRef::Key(key) | StorageRef::Versioned { key, .. } => key,
        }
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            StorageRef::Key(_) => None,
            StorageRef::Versioned { version, .. } => Some(version),
        }
    }
}

/// Map every package directly inside `dir` to `prefix + filename`.
///
/// Subdirectories are not searched. A directory without packages yields an
/// empty plan.
pub fn locate_assets(dir: &Path, prefix: &str) -> Result<AssetPlan> {
    if !dir.is_dir() {
        return Err(PublishError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut plan = AssetPlan::new();
    for entry in std::fs::read_dir(dir).map_err(|e| PublishError::io(dir, e))? {
        let entry = entry.map_err(|e| PublishError::io(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_package = path
            .extension()
            .is_some_and(|ext| ext == OsStr::new(PACKAGE_EXTENSION));
        if !is_package {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            plan.insert(name.to_string(), format!("{prefix}{name}"));
        }
    }

    debug!(dir = %dir.display(), prefix, assets = ?plan, "Located build assets");
    Ok(plan)
}
