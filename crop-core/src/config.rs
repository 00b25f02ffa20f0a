use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::autoupdate::{AutoUpdate, AutoUpdateMode};
use crate::error::{PublishError, Result};

/// Pipeline configuration as written in `crop.yml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Bucket packages and templates are published to. Should have
    /// versioning enabled, otherwise each upload replaces the last one.
    pub bucket: String,
    /// Serverless project root. Defaults to the config file's directory.
    #[serde(default)]
    pub project_path: Option<PathBuf>,
    pub product: ProductSection,
    #[serde(default)]
    pub upload: UploadSection,
    #[serde(default)]
    pub autoupdate: Option<AutoUpdateSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductSection {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadSection {
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoUpdateSection {
    #[serde(rename = "type")]
    pub kind: AutoUpdateKind,
    pub interval: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoUpdateKind {
    Forced,
    Enabled,
}

/// How the catalog product is identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductRef {
    Id(String),
    Name(String),
}

impl PublishConfig {
    /// Check the constraints the YAML schema cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(PublishError::Configuration("bucket must not be empty".into()));
        }
        self.product_ref()?;
        self.autoupdate()?;
        Ok(())
    }

    pub fn product_ref(&self) -> Result<ProductRef> {
        match (&self.product.id, &self.product.name) {
            (Some(id), None) => {
                let pattern = Regex::new(r"^prod-[A-Za-z0-9]+$")
                    .map_err(|e| PublishError::Configuration(e.to_string()))?;
                if !pattern.is_match(id) {
                    return Err(PublishError::Configuration(format!(
                        "product.id `{id}` does not look like a product id (prod-...)"
                    )));
                }
                Ok(ProductRef::Id(id.clone()))
            }
            (None, Some(name)) if !name.trim().is_empty() => Ok(ProductRef::Name(name.clone())),
            (None, Some(_)) => Err(PublishError::Configuration(
                "product.name must not be empty".into(),
            )),
            (Some(_), Some(_)) => Err(PublishError::Configuration(
                "provide only one of product.id or product.name".into(),
            )),
            (None, None) => Err(PublishError::Configuration(
                "must provide one of product.id or product.name".into(),
            )),
        }
    }

    pub fn autoupdate(&self) -> Result<AutoUpdate> {
        let Some(section) = &self.autoupdate else {
            return Ok(AutoUpdate::disabled());
        };
        if section.interval < 1 {
            return Err(PublishError::Configuration(format!(
                "autoupdate.interval must be at least 1 minute, got {}",
                section.interval
            )));
        }
        let mode = match section.kind {
            AutoUpdateKind::Forced => AutoUpdateMode::Forced,
            AutoUpdateKind::Enabled => AutoUpdateMode::Enabled,
        };
        Ok(AutoUpdate {
            mode,
            interval: section.interval,
        })
    }

    pub fn trace_loaded(&self) {
        info!(
            bucket = %self.bucket,
            prefix = %self.upload.prefix,
            product_id = ?self.product.id,
            product_name = ?self.product.name,
            autoupdate = self.autoupdate.is_some(),
            "Loaded PublishConfig"
        );
        debug!(?self, "PublishConfig loaded (full debug)");
    }
}
