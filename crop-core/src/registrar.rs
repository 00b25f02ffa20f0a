//! Registering a published template as a new provisioning artifact.
//!
//! The registration is a small state machine:
//!
//! ```text
//! Submitting --create accepted--> Creating --AVAILABLE--> Available
//!                                    |  ^
//!                                    |  +-- CREATING (wait, poll again)
//!                                    +----- FAILED -----> Failed
//! ```
//!
//! Submission carries an idempotency token derived from the submission's
//! identity (product, version label, template URL), so a create call retried
//! after a transient failure is deduplicated by the catalog instead of
//! producing a second artifact. Polling is bounded by [`PollPolicy`] and can
//! be cancelled through a `watch` channel.

use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ProductRef;
use crate::contract::{ArtifactStatus, Catalog, NewProvisioningArtifact, ProductSummary};
use crate::error::{PublishError, Result};
use crate::retry::{with_retry, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait between status checks.
    pub interval: Duration,
    /// Total time allowed for the artifact to leave CREATING.
    pub max_elapsed: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_elapsed: Duration::from_secs(15 * 60),
        }
    }
}

/// State of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    Submitting,
    Creating { artifact_id: String },
    Available { artifact_id: String },
    Failed { artifact_id: String, payload: String },
}

/// What to register.
#[derive(Debug, Clone)]
pub struct ArtifactSubmission {
    pub product_id: String,
    pub version: String,
    pub description: String,
    pub template_url: String,
}

impl ArtifactSubmission {
    pub fn idempotency_token(&self) -> String {
        idempotency_token(&self.product_id, &self.version, &self.template_url)
    }
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredArtifact {
    pub product_id: String,
    pub artifact_id: String,
    pub version: String,
    /// Number of waits spent in CREATING before the artifact became available.
    pub polls: u32,
}

/// Deterministic token for a submission: hex SHA-256 over its identity.
pub fn idempotency_token(product_id: &str, version: &str, template_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(product_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(version.as_bytes());
    hasher.update(b"\n");
    hasher.update(template_url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Look up a product by id, or by the first exact name match.
pub async fn resolve_product<C>(
    catalog: &C,
    product: &ProductRef,
    retry: &RetryPolicy,
) -> Result<ProductSummary>
where
    C: Catalog + ?Sized,
{
    let product_id = match product {
        ProductRef::Id(id) => id.clone(),
        ProductRef::Name(name) => {
            let products = with_retry(retry, "search_products", || catalog.search_products()).await?;
            let mut matches = products.iter().filter(|p| &p.name == name);
            let first = matches.next().ok_or_else(|| {
                error!(product_name = %name, "No catalog product with this name");
                PublishError::ProductNotFound(name.clone())
            })?;
            let duplicates = matches.count();
            if duplicates > 0 {
                warn!(product_name = %name, chosen = %first.id, duplicates, "Product name is ambiguous, using the first match");
            }
            first.id.clone()
        }
    };

    let summary = with_retry(retry, "describe_product", || {
        catalog.describe_product(&product_id)
    })
    .await?;
    info!(product_id = %summary.id, product_name = %summary.name, "Resolved catalog product");
    Ok(summary)
}

/// Drives one registration from submission to a terminal state.
pub struct Registrar<'a, C: Catalog + ?Sized> {
    catalog: &'a C,
    poll: PollPolicy,
    retry: RetryPolicy,
    cancel: Option<watch::Receiver<bool>>,
    state: RegistrationState,
}

impl<'a, C: Catalog + ?Sized> Registrar<'a, C> {
    pub fn new(catalog: &'a C, poll: PollPolicy, retry: RetryPolicy) -> Self {
        Self {
            catalog,
            poll,
            retry,
            cancel: None,
            state: RegistrationState::Submitting,
        }
    }

    /// Stop polling once `true` is sent on the channel.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn state(&self) -> &RegistrationState {
        &self.state
    }

    /// Submit the artifact and wait until the catalog reports a terminal
    /// status, the polling budget runs out, or the caller cancels.
    ///
    /// A cancellation already signalled on entry returns
    /// [`PublishError::Cancelled`] without calling the catalog.
    pub async fn register(&mut self, submission: &ArtifactSubmission) -> Result<RegisteredArtifact> {
        if self.is_cancelled() {
            warn!(product_id = %submission.product_id, "Cancelled before catalog submission");
            return Err(PublishError::Cancelled {
                stage: "catalog submission",
                artifact_id: None,
            });
        }
        let artifact_id = self.submit(submission).await?;
        self.state = RegistrationState::Creating {
            artifact_id: artifact_id.clone(),
        };

        let started = Instant::now();
        let mut polls = 0u32;
        loop {
            let description = with_retry(&self.retry, "describe_provisioning_artifact", || {
                self.catalog
                    .describe_provisioning_artifact(&artifact_id, &submission.product_id)
            })
            .await?;

            match description.status {
                ArtifactStatus::Available => {
                    self.state = RegistrationState::Available {
                        artifact_id: artifact_id.clone(),
                    };
                    info!(artifact_id = %artifact_id, polls, "Provisioning artifact available");
                    return Ok(RegisteredArtifact {
                        product_id: submission.product_id.clone(),
                        artifact_id,
                        version: submission.version.clone(),
                        polls,
                    });
                }
                ArtifactStatus::Failed => {
                    let payload = serde_json::to_string(&description)?;
                    error!(artifact_id = %artifact_id, payload = %payload, "Provisioning artifact failed");
                    self.state = RegistrationState::Failed {
                        artifact_id: artifact_id.clone(),
                        payload: payload.clone(),
                    };
                    return Err(PublishError::ProvisioningFailure {
                        product_id: submission.product_id.clone(),
                        artifact_id,
                        payload,
                    });
                }
                ArtifactStatus::Creating => {
                    let elapsed = started.elapsed();
                    if elapsed + self.poll.interval > self.poll.max_elapsed {
                        error!(artifact_id = %artifact_id, elapsed = ?elapsed, "Timed out waiting for provisioning artifact");
                        return Err(PublishError::Timeout {
                            artifact_id,
                            elapsed,
                        });
                    }
                    polls += 1;
                    debug!(artifact_id = %artifact_id, polls, "Provisioning artifact still creating");
                    self.wait(&artifact_id).await?;
                }
            }
        }
    }

    async fn submit(&self, submission: &ArtifactSubmission) -> Result<String> {
        let request = NewProvisioningArtifact {
            product_id: submission.product_id.clone(),
            name: submission.version.clone(),
            description: submission.description.clone(),
            template_url: submission.template_url.clone(),
            idempotency_token: submission.idempotency_token(),
        };
        info!(
            product_id = %request.product_id,
            version = %request.name,
            template_url = %request.template_url,
            idempotency_token = %request.idempotency_token,
            "Submitting provisioning artifact"
        );
        let artifact_id = with_retry(&self.retry, "create_provisioning_artifact", || {
            self.catalog.create_provisioning_artifact(request.clone())
        })
        .await?;
        info!(artifact_id = %artifact_id, "Provisioning artifact accepted");
        Ok(artifact_id)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| *cancel.borrow())
    }

    async fn wait(&mut self, artifact_id: &str) -> Result<()> {
        let interval = self.poll.interval;
        let Some(cancel) = self.cancel.as_mut() else {
            tokio::time::sleep(interval).await;
            return Ok(());
        };

        let cancelled = || PublishError::Cancelled {
            stage: "status polling",
            artifact_id: Some(artifact_id.to_string()),
        };
        if *cancel.borrow() {
            return Err(cancelled());
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => Ok(()),
            changed = cancel.changed() => {
                // A dropped sender can no longer cancel; finish the wait.
                if changed.is_err() {
                    tokio::time::sleep(interval).await;
                    return Ok(());
                }
                if *cancel.borrow() {
                    warn!(artifact_id, "Registration polling cancelled");
                    Err(cancelled())
                } else {
                    Ok(())
                }
            }
        }
    }
}
