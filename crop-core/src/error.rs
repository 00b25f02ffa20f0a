//! Closed error taxonomy for the publication pipeline.
//!
//! Every fallible operation in this crate returns [`PublishError`]. Only
//! [`PublishError::TransientIo`] is eligible for automatic retry (see
//! [`crate::retry`]); every other kind propagates to the caller unchanged,
//! carrying the logical id, filename, product id or artifact id needed to
//! diagnose the failure without re-running.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PublishError>;

#[derive(Debug, Error)]
pub enum PublishError {
    /// Malformed or incomplete pipeline configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("build directory not found: {}", path.display())]
    DirectoryNotFound { path: PathBuf },

    /// A resource or output the rewriter must remove is absent.
    #[error("template is missing expected {section} entry `{logical_id}`")]
    MissingExpectedResource {
        section: &'static str,
        logical_id: String,
    },

    /// A function resource references a package that was not uploaded.
    #[error("function resource `{logical_id}` references asset `{asset_name}` which was not uploaded")]
    MissingAsset {
        logical_id: String,
        asset_name: String,
    },

    /// Auto-update injection would overwrite existing template content.
    #[error("template {section} already defines `{logical_id}`, which is reserved for auto-update")]
    Conflict {
        section: &'static str,
        logical_id: String,
    },

    /// The catalog reported a terminal FAILED status.
    #[error("provisioning artifact {artifact_id} of product {product_id} failed: {payload}")]
    ProvisioningFailure {
        product_id: String,
        artifact_id: String,
        payload: String,
    },

    /// Polling exceeded its budget. The artifact may still converge later.
    #[error("gave up on provisioning artifact {artifact_id} after {elapsed:?}; it may still become available")]
    Timeout {
        artifact_id: String,
        elapsed: Duration,
    },

    /// The caller asked the run to stop. `artifact_id` is set only once the
    /// catalog has accepted a submission.
    #[error(
        "cancelled during {stage}{}",
        artifact_id.as_deref().map(|id| format!(" (provisioning artifact {id})")).unwrap_or_default()
    )]
    Cancelled {
        stage: &'static str,
        artifact_id: Option<String>,
    },

    #[error("transient failure during {operation}: {message}")]
    TransientIo { operation: String, message: String },

    /// Non-retryable rejection from the storage or catalog service.
    #[error("{operation} rejected by service: {message}")]
    Service { operation: String, message: String },

    #[error("no catalog product named `{0}`")]
    ProductNotFound(String),

    #[error("malformed template: {0}")]
    MalformedTemplate(String),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding or decoding failed (template parse, code descriptor,
    /// artifact status payload).
    #[error("JSON processing failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl PublishError {
    /// Whether a retry of the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::TransientIo { .. })
    }

    pub fn transient(operation: impl Into<String>, message: impl ToString) -> Self {
        PublishError::TransientIo {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn service(operation: impl Into<String>, message: impl ToString) -> Self {
        PublishError::Service {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PublishError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_io_is_retryable() {
        assert!(PublishError::transient("put_object", "connection reset").is_transient());
        assert!(!PublishError::service("put_object", "AccessDenied").is_transient());
        assert!(!PublishError::Timeout {
            artifact_id: "pa-1".into(),
            elapsed: Duration::from_secs(900),
        }
        .is_transient());
        assert!(!PublishError::Configuration("bad".into()).is_transient());
    }

    #[test]
    fn missing_asset_message_names_resource_and_file() {
        let err = PublishError::MissingAsset {
            logical_id: "HelloLambdaFunction".into(),
            asset_name: "hello.zip".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("HelloLambdaFunction"));
        assert!(msg.contains("hello.zip"));
    }

    #[test]
    fn cancelled_names_artifact_only_once_submitted() {
        let before = PublishError::Cancelled {
            stage: "catalog submission",
            artifact_id: None,
        };
        assert_eq!(before.to_string(), "cancelled during catalog submission");

        let polling = PublishError::Cancelled {
            stage: "status polling",
            artifact_id: Some("pa-123".into()),
        };
        assert_eq!(
            polling.to_string(),
            "cancelled during status polling (provisioning artifact pa-123)"
        );
    }

    #[test]
    fn json_errors_do_not_blame_the_template() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let msg = PublishError::from(source).to_string();
        assert!(msg.starts_with("JSON processing failed"), "got {msg}");
        assert!(!msg.contains("template"), "got {msg}");
    }

    #[test]
    fn provisioning_failure_carries_catalog_payload() {
        let err = PublishError::ProvisioningFailure {
            product_id: "prod-abc".into(),
            artifact_id: "pa-123".into(),
            payload: r#"{"status":"FAILED"}"#.into(),
        };
        assert_eq!(
            err.to_string(),
            r#"provisioning artifact pa-123 of product prod-abc failed: {"status":"FAILED"}"#
        );
    }
}
