/// `load_config` module: reads `crop.yml` and turns it into a core `PublishRequest`.
///
/// This is the only place untrusted YAML is parsed. The schema itself lives in
/// `crop_core::config::PublishConfig`; this module adds file handling, path
/// resolution relative to the config file, and CLI-friendly diagnostics.
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{Context, Result};
use crop_core::config::PublishConfig;
use crop_core::publish::{build_dir, PublishRequest};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub config: PublishConfig,
    /// Serverless project root, resolved against the config file's directory.
    pub project_path: PathBuf,
}

impl CliConfig {
    /// Build the request for publishing `version` of this project.
    pub fn request(&self, version: &str, description: &str) -> Result<PublishRequest> {
        if version.trim().is_empty() {
            anyhow::bail!("version label must not be empty");
        }
        Ok(PublishRequest {
            build_dir: build_dir(&self.project_path),
            bucket: self.config.bucket.clone(),
            prefix: self.config.upload.prefix.clone(),
            version: version.to_string(),
            description: description.to_string(),
            product: self.config.product_ref()?,
            autoupdate: self.config.autoupdate()?,
        })
    }
}

/// Load and validate a YAML config file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let config: PublishConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => conf,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path_ref.display()))?;
    config.trace_loaded();

    let config_dir = path_ref
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let project_path = match &config.project_path {
        Some(p) if p.is_absolute() => p.clone(),
        Some(p) => config_dir.join(p),
        None => config_dir.to_path_buf(),
    };
    info!(project_path = %project_path.display(), "Resolved project path");

    Ok(CliConfig {
        config,
        project_path,
    })
}
