//! High-level pipeline: orchestrates locate → upload → rewrite → inject → publish → register.
//!
//! This module wires the individual stages together for one publish run:
//!   - Locates the packages of a Serverless build directory
//!   - Uploads them to the asset bucket through an [`ObjectStore`]
//!   - Rewrites the build's template to point at the uploaded packages
//!   - Optionally injects the auto-update resources
//!   - Uploads the template under a version-qualified key
//!   - Registers it as a new provisioning artifact through a [`Catalog`]
//!
//! # Responsibilities
//! - Strictly sequential, fail-fast orchestration: each stage finishes before
//!   the next starts and the first error aborts the run
//! - The template is moved from stage to stage; no stage keeps a handle on a
//!   document it has passed on
//! - Every run is wrapped in a `publish` tracing span carrying a run id
//!
//! # Not handled
//! - Nothing is rolled back when a later stage fails; uploaded objects stay.
//! - Two concurrent runs for the same version overwrite each other's template
//!   (the key depends only on the version label).
//!
//! # Navigation
//! - Entrypoints: [`publish_template`] (no catalog registration) and [`publish`]
//! - Supporting types: [`PublishRequest`], [`PipelineOptions`], [`PublishReport`]

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::assets::{locate_assets, AssetKeyMap};
use crate::autoupdate::{inject_autoupdate, AutoUpdate};
use crate::config::ProductRef;
use crate::contract::{Catalog, ObjectStore, ProductSummary};
use crate::error::{PublishError, Result};
use crate::registrar::{resolve_product, ArtifactSubmission, PollPolicy, RegisteredArtifact, Registrar};
use crate::retry::RetryPolicy;
use crate::rewrite::{function_code_keys, rewrite_template};
use crate::template::{Template, TEMPLATE_FILE};
use crate::upload::{upload_assets, upload_template, PublishedTemplate, UploadOptions};

/// Name of the Serverless build directory inside a project.
pub const BUILD_DIR: &str = ".serverless";

pub fn build_dir(project_path: &Path) -> PathBuf {
    project_path.join(BUILD_DIR)
}

/// Everything one run publishes.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub build_dir: PathBuf,
    pub bucket: String,
    /// Prepended to every package and template key.
    pub prefix: String,
    /// Version label of this release.
    pub version: String,
    pub description: String,
    pub product: ProductRef,
    pub autoupdate: AutoUpdate,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub upload: UploadOptions,
    pub retry: RetryPolicy,
    pub poll: PollPolicy,
}

/// Result of uploading packages and template.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateReport {
    pub assets: AssetKeyMap,
    /// Function logical id -> published code key.
    pub functions: Vec<(String, String)>,
    pub template: PublishedTemplate,
    pub product: Option<ProductSummary>,
}

/// Result of a full run including catalog registration.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub run_id: String,
    pub product: ProductSummary,
    pub template: PublishedTemplate,
    pub assets: AssetKeyMap,
    pub artifact: RegisteredArtifact,
}

/// Upload packages and the rewritten template without registering it.
///
/// The product is only resolved when auto-update injection needs its id.
pub async fn publish_template<S, C>(
    request: &PublishRequest,
    store: &S,
    catalog: &C,
    options: &PipelineOptions,
) -> Result<TemplateReport>
where
    S: ObjectStore + ?Sized,
    C: Catalog + ?Sized,
{
    let run_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("publish", run_id = %run_id, version = %request.version);
    run_publish_template(request, store, catalog, options)
        .instrument(span)
        .await
}

async fn run_publish_template<S, C>(
    request: &PublishRequest,
    store: &S,
    catalog: &C,
    options: &PipelineOptions,
) -> Result<TemplateReport>
where
    S: ObjectStore + ?Sized,
    C: Catalog + ?Sized,
{
    let product = if request.autoupdate.is_enabled() {
        Some(resolve_product(catalog, &request.product, &options.retry).await?)
    } else {
        None
    };
    upload_and_rewrite(request, store, product, options, None).await
}

/// Run the whole pipeline and register the template with the catalog.
///
/// Sending `true` on `cancel` stops the run at the next stage boundary or
/// during status polling. A run cancelled before catalog submission creates
/// no provisioning artifact.
pub async fn publish<S, C>(
    request: &PublishRequest,
    store: &S,
    catalog: &C,
    options: &PipelineOptions,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<PublishReport>
where
    S: ObjectStore + ?Sized,
    C: Catalog + ?Sized,
{
    let run_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("publish", run_id = %run_id, version = %request.version);
    run_publish(run_id.clone(), request, store, catalog, options, cancel)
        .instrument(span)
        .await
}

async fn run_publish<S, C>(
    run_id: String,
    request: &PublishRequest,
    store: &S,
    catalog: &C,
    options: &PipelineOptions,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<PublishReport>
where
    S: ObjectStore + ?Sized,
    C: Catalog + ?Sized,
{
    info!("[PUBLISH] Starting publication pipeline");

    check_cancelled(cancel.as_ref(), "product resolution")?;
    let product = resolve_product(catalog, &request.product, &options.retry).await?;
    let report =
        upload_and_rewrite(request, store, Some(product.clone()), options, cancel.as_ref()).await?;

    let submission = ArtifactSubmission {
        product_id: product.id.clone(),
        version: request.version.clone(),
        description: request.description.clone(),
        template_url: report.template.url.clone(),
    };
    let mut registrar = Registrar::new(catalog, options.poll, options.retry);
    if let Some(cancel) = cancel {
        registrar = registrar.with_cancellation(cancel);
    }
    let artifact = registrar.register(&submission).await?;

    info!(artifact_id = %artifact.artifact_id, product_id = %product.id, "[PUBLISH] Publication complete");
    Ok(PublishReport {
        run_id,
        product,
        template: report.template,
        assets: report.assets,
        artifact,
    })
}

async fn upload_and_rewrite<S>(
    request: &PublishRequest,
    store: &S,
    product: Option<ProductSummary>,
    options: &PipelineOptions,
    cancel: Option<&watch::Receiver<bool>>,
) -> Result<TemplateReport>
where
    S: ObjectStore + ?Sized,
{
    // Stage 1: locate packages.
    let plan = locate_assets(&request.build_dir, &request.prefix)?;
    info!(build_dir = %request.build_dir.display(), assets = plan.len(), "[PUBLISH] Located build assets");

    // Read the template before uploading anything so a broken build fails early.
    let template = Template::from_path(&request.build_dir.join(TEMPLATE_FILE))?;

    // Stage 2: upload packages.
    check_cancelled(cancel, "package upload")?;
    let assets = upload_assets(store, &request.build_dir, &request.bucket, &plan, &options.upload)
        .await
        .into_result()?;

    // Stage 3: rewrite.
    let template = rewrite_template(template, &request.bucket, &assets)?;
    let functions = function_code_keys(&template)
        .into_iter()
        .map(|(id, key)| (id.to_string(), key.to_string()))
        .collect();

    // Stage 4: optional auto-update injection.
    let template = match &product {
        Some(product) => inject_autoupdate(template, &product.id, &request.autoupdate)?,
        None => template,
    };

    // Stage 5: publish template.
    check_cancelled(cancel, "template upload")?;
    let published = upload_template(
        store,
        &template,
        &request.bucket,
        &request.prefix,
        &request.version,
        &options.retry,
    )
    .await?;

    Ok(TemplateReport {
        assets,
        functions,
        template: published,
        product,
    })
}

fn check_cancelled(cancel: Option<&watch::Receiver<bool>>, stage: &'static str) -> Result<()> {
    if cancel.is_some_and(|cancel| *cancel.borrow()) {
        warn!(stage, "[PUBLISH] Run cancelled");
        return Err(PublishError::Cancelled {
            stage,
            artifact_id: None,
        });
    }
    Ok(())
}
