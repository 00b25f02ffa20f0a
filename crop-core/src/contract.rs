#![allow(unused)]

//! # contract: interfaces to the storage and catalog services
//!
//! The pipeline is a client of two external services. This module defines a
//! trait for each ([`ObjectStore`] and [`Catalog`]) plus the plain data types
//! exchanged with them. Concrete implementations (the AWS S3 and Service
//! Catalog adapters) live in the CLI crate; tests use the generated mocks.
//!
//! ## Interface & Extensibility
//! - All methods are async and return [`PublishError`]. Implementors must map
//!   transport-level failures (timeouts, dropped connections, throttling) to
//!   [`PublishError::TransientIo`] so the retry layer can act on them, and
//!   everything else to [`PublishError::Service`].
//! - No method is expected to retry internally.
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall` (`MockObjectStore`, `MockCatalog`),
//!   exported under the `test-export-mocks` feature for integration tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use mockall::{automock, predicate::*};
use serde::Serialize;

use crate::error::PublishError;

/// A single object write.
#[derive(Debug, Clone, PartialEq)]
pub struct PutObject {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    /// Grant anonymous read access to the object.
    pub public_read: bool,
    pub body: Vec<u8>,
}

/// Result of an object write. `version_id` is only present when the bucket
/// has versioning enabled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutObjectOutput {
    pub version_id: Option<String>,
}

/// Durable object storage (e.g. an S3 bucket).
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, req: PutObject) -> Result<PutObjectOutput, PublishError>;
}

/// Product as listed or described by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSummary {
    pub id: String,
    pub name: String,
}

/// Request to register a new provisioning artifact (template version).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProvisioningArtifact {
    pub product_id: String,
    /// Human-assigned version label.
    pub name: String,
    pub description: String,
    pub template_url: String,
    pub idempotency_token: String,
}

/// Lifecycle status of a provisioning artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArtifactStatus {
    Creating,
    Available,
    Failed,
}

impl ArtifactStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "CREATING" => Some(ArtifactStatus::Creating),
            "AVAILABLE" => Some(ArtifactStatus::Available),
            "FAILED" => Some(ArtifactStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ArtifactStatus::Creating)
    }
}

/// Observed state of a provisioning artifact. `info` holds whatever
/// diagnostic key/value pairs the catalog attaches (template URL, failure
/// reason, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactDescription {
    pub status: ArtifactStatus,
    pub info: BTreeMap<String, String>,
}

impl ArtifactDescription {
    pub fn with_status(status: ArtifactStatus) -> Self {
        Self {
            status,
            info: BTreeMap::new(),
        }
    }
}

/// Product catalog (e.g. AWS Service Catalog).
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Catalog: Send + Sync {
    /// List all products visible to the caller.
    async fn search_products(&self) -> Result<Vec<ProductSummary>, PublishError>;

    async fn describe_product(&self, product_id: &str) -> Result<ProductSummary, PublishError>;

    /// Submit a new provisioning artifact; returns the generated artifact id.
    async fn create_provisioning_artifact(
        &self,
        req: NewProvisioningArtifact,
    ) -> Result<String, PublishError>;

    async fn describe_provisioning_artifact(
        &self,
        artifact_id: &str,
        product_id: &str,
    ) -> Result<ArtifactDescription, PublishError>;
}
