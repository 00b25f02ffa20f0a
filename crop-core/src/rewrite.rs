//! Rewriting a Serverless template so it can be launched from the catalog.
//!
//! Two steps, both pure functions over an owned [`Template`]:
//! 1. [`remove_deployment_bucket`] drops the bucket Serverless creates for
//!    its own uploads, together with the output that exports its name. The
//!    consumer's stack must not own that bucket.
//! 2. [`replace_function_artifacts`] points every function's `Code` at the
//!    package published to the shared asset bucket.
//!
//! Each function resource is rewritten independently of the others, so the
//! result does not depend on the order resources are visited in.

use std::collections::BTreeMap;

use tracing::debug;

use crate::assets::AssetKeyMap;
use crate::error::{PublishError, Result};
use crate::template::{CodeLocation, Resource, Template};

pub const DEPLOYMENT_BUCKET_RESOURCE: &str = "ServerlessDeploymentBucket";
pub const DEPLOYMENT_BUCKET_OUTPUT: &str = "ServerlessDeploymentBucketName";

/// Full rewrite: remove the deployment bucket, then relocate function code.
pub fn rewrite_template(
    template: Template,
    asset_bucket: &str,
    uploaded: &AssetKeyMap,
) -> Result<Template> {
    let template = remove_deployment_bucket(template)?;
    replace_function_artifacts(template, asset_bucket, uploaded)
}

/// Remove the deployment bucket resource and its output.
///
/// Both must be present; if either is missing nothing is removed and
/// [`PublishError::MissingExpectedResource`] names the absent entry.
pub fn remove_deployment_bucket(mut template: Template) -> Result<Template> {
    if !template.resources.contains_key(DEPLOYMENT_BUCKET_RESOURCE) {
        return Err(PublishError::MissingExpectedResource {
            section: "Resources",
            logical_id: DEPLOYMENT_BUCKET_RESOURCE.to_string(),
        });
    }
    if !template.outputs.contains_key(DEPLOYMENT_BUCKET_OUTPUT) {
        return Err(PublishError::MissingExpectedResource {
            section: "Outputs",
            logical_id: DEPLOYMENT_BUCKET_OUTPUT.to_string(),
        });
    }

    template.resources.remove(DEPLOYMENT_BUCKET_RESOURCE);
    template.outputs.remove(DEPLOYMENT_BUCKET_OUTPUT);
    debug!(
        resource = DEPLOYMENT_BUCKET_RESOURCE,
        output = DEPLOYMENT_BUCKET_OUTPUT,
        "Removed deployment bucket"
    );
    Ok(template)
}

/// Replace the code descriptor of every function resource with the
/// published location of its package.
pub fn replace_function_artifacts(
    template: Template,
    asset_bucket: &str,
    uploaded: &AssetKeyMap,
) -> Result<Template> {
    let Template {
        resources,
        outputs,
        parameters,
        conditions,
        other,
    } = template;

    let resources = resources
        .into_iter()
        .map(|(logical_id, resource)| {
            let resource = relocate_code(&logical_id, resource, asset_bucket, uploaded)?;
            Ok((logical_id, resource))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(Template {
        resources,
        outputs,
        parameters,
        conditions,
        other,
    })
}

fn relocate_code(
    logical_id: &str,
    mut resource: Resource,
    asset_bucket: &str,
    uploaded: &AssetKeyMap,
) -> Result<Resource> {
    if !resource.is_function() {
        return Ok(resource);
    }

    let code_key = resource.code_key().ok_or_else(|| {
        PublishError::MalformedTemplate(format!(
            "function resource `{logical_id}` has no string Code.S3Key"
        ))
    })?;
    let asset_name = asset_basename(code_key).to_string();

    let published = uploaded
        .get(&asset_name)
        .ok_or_else(|| PublishError::MissingAsset {
            logical_id: logical_id.to_string(),
            asset_name: asset_name.clone(),
        })?;

    let code = CodeLocation {
        bucket: asset_bucket.to_string(),
        key: published.key().to_string(),
        version: published.version().map(str::to_string),
    };
    resource
        .properties
        .insert("Code".to_string(), serde_json::to_value(&code)?);

    debug!(logical_id, asset = %asset_name, key = %code.key, version = ?code.version, "Relocated function code");
    Ok(resource)
}

/// Last segment of an object key. Keys always use `/`.
fn asset_basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Keys referenced by the function resources of a rewritten template.
pub fn function_code_keys(template: &Template) -> Vec<(&str, &str)> {
    template
        .resources
        .iter()
        .filter(|(_, r)| r.is_function())
        .filter_map(|(id, r)| r.code_key().map(|key| (id.as_str(), key)))
        .collect()
}
