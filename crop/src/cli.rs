/// # crop CLI interface
///
/// Command parsing and orchestration for the `crop` binary. All pipeline
/// logic lives in `crop-core`; this module loads the config, builds the AWS
/// clients, runs the requested pipeline, and prints its report as JSON on
/// stdout. Logs go to stderr.
///
/// ## How To Use
/// - From the shell: `crop upload-project --config crop.yml --version 1.2.0`
///   or `crop update-product --config crop.yml --version 1.2.0 --description "..."`.
/// - Programmatically: call [`run`] with a constructed [`Cli`].
use crate::aws::{load_sdk_config, S3ObjectStore, ServiceCatalogClient};
use crate::load_config::load_config;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use crop_core::publish::{publish, publish_template, PipelineOptions};
use crop_core::registrar::PollPolicy;
use crop_core::upload::UploadOptions;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

/// Publish Serverless builds as versioned Service Catalog products.
#[derive(Parser)]
#[clap(
    name = "crop",
    version,
    about = "Publish Serverless build output to S3 and register it as a Service Catalog product version"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload packages and the rewritten template without registering it
    UploadProject {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Version label of this release
        #[clap(long)]
        version: String,
        #[clap(flatten)]
        tuning: Tuning,
    },
    /// Upload everything and register a new product version in the catalog
    UpdateProduct {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Version label of this release
        #[clap(long)]
        version: String,
        /// Description attached to the new product version
        #[clap(long, default_value = "")]
        description: String,
        #[clap(flatten)]
        tuning: Tuning,
    },
}

#[derive(Args, Debug, Clone)]
pub struct Tuning {
    /// Maximum number of concurrent package uploads
    #[clap(long, default_value_t = 4)]
    pub concurrency: usize,
    /// Give up waiting for the catalog after this many seconds
    #[clap(long, default_value_t = 900)]
    pub timeout_secs: u64,
}

impl Tuning {
    pub fn pipeline_options(&self) -> PipelineOptions {
        let defaults = PipelineOptions::default();
        PipelineOptions {
            upload: UploadOptions {
                concurrency: self.concurrency.max(1),
                retry: defaults.retry,
            },
            retry: defaults.retry,
            poll: PollPolicy {
                interval: defaults.poll.interval,
                max_elapsed: Duration::from_secs(self.timeout_secs),
            },
        }
    }
}

/// Async CLI entrypoint for main() and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::UploadProject {
            config,
            version,
            tuning,
        } => {
            let loaded = load_config(config)?;
            let request = loaded.request(&version, "")?;
            tracing::info!(command = "upload-project", version = %version, "Starting upload");

            let sdk_config = load_sdk_config().await;
            let store = S3ObjectStore::new(&sdk_config);
            let catalog = ServiceCatalogClient::new(&sdk_config);

            match publish_template(&request, &store, &catalog, &tuning.pipeline_options()).await {
                Ok(report) => {
                    tracing::info!(command = "upload-project", url = %report.template.url, "Upload complete");
                    print_report(&report)
                }
                Err(e) => {
                    tracing::error!(command = "upload-project", error = %e, "Upload failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
        Commands::UpdateProduct {
            config,
            version,
            description,
            tuning,
        } => {
            let loaded = load_config(config)?;
            let request = loaded.request(&version, &description)?;
            tracing::info!(command = "update-product", version = %version, "Starting product update");

            let sdk_config = load_sdk_config().await;
            let store = S3ObjectStore::new(&sdk_config);
            let catalog = ServiceCatalogClient::new(&sdk_config);

            let (cancel_tx, cancel_rx) = watch::channel(false);
            // First Ctrl-C stops at the next stage boundary; a second one exits.
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                tracing::warn!("Interrupt received, cancelling (press Ctrl-C again to abort)");
                let _ = cancel_tx.send(true);
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::error!("Second interrupt received, aborting");
                    std::process::exit(130);
                }
            });

            match publish(
                &request,
                &store,
                &catalog,
                &tuning.pipeline_options(),
                Some(cancel_rx),
            )
            .await
            {
                Ok(report) => {
                    tracing::info!(
                        command = "update-product",
                        artifact_id = %report.artifact.artifact_id,
                        "Product update complete"
                    );
                    print_report(&report)
                }
                Err(e) => {
                    tracing::error!(command = "update-product", error = %e, "Product update failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
    }
}

fn print_report<T: Serialize>(report: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
