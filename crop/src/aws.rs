//! AWS-backed implementations of the storage and catalog contracts.
//!
//! [`S3ObjectStore`] implements [`ObjectStore`] on top of `aws-sdk-s3`;
//! [`ServiceCatalogClient`] implements [`Catalog`] on top of
//! `aws-sdk-servicecatalog`. Neither retries on its own: SDK failures are
//! classified into transient and permanent [`PublishError`]s and the retry
//! policy in `crop-core` decides what to do with them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_servicecatalog::types::{ProvisioningArtifactProperties, ProvisioningArtifactType};
use tracing::debug;

use crop_core::contract::{
    ArtifactDescription, ArtifactStatus, Catalog, NewProvisioningArtifact, ObjectStore,
    ProductSummary, PutObject, PutObjectOutput,
};
use crop_core::PublishError;

/// Info key telling the catalog where to fetch the template from.
const TEMPLATE_URL_INFO_KEY: &str = "LoadTemplateFromURL";

/// Service error codes worth another attempt.
const TRANSIENT_CODES: [&str; 7] = [
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "SlowDown",
    "InternalError",
    "ServiceUnavailable",
];

/// Shared AWS configuration from the default provider chain
/// (environment, profile, instance metadata).
pub async fn load_sdk_config() -> SdkConfig {
    aws_config::load_defaults(BehaviorVersion::latest()).await
}

/// Map an SDK failure onto the pipeline's error taxonomy.
fn classify<E>(operation: &str, err: SdkError<E, HttpResponse>) -> PublishError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(service) => {
            service.raw().status().is_server_error()
                || service
                    .err()
                    .code()
                    .is_some_and(|code| TRANSIENT_CODES.contains(&code))
        }
        _ => false,
    };
    let message = DisplayErrorContext(&err).to_string();
    if transient {
        PublishError::transient(operation, message)
    } else {
        PublishError::service(operation, message)
    }
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(&self, req: PutObject) -> Result<PutObjectOutput, PublishError> {
        debug!(bucket = %req.bucket, key = %req.key, bytes = req.body.len(), "S3 PutObject");
        let mut call = self
            .client
            .put_object()
            .bucket(&req.bucket)
            .key(&req.key)
            .content_type(&req.content_type);
        if req.public_read {
            call = call.acl(ObjectCannedAcl::PublicRead);
        }
        let output = call
            .body(ByteStream::from(req.body))
            .send()
            .await
            .map_err(|e| classify("put_object", e))?;

        Ok(PutObjectOutput {
            version_id: output.version_id().map(str::to_string),
        })
    }
}

#[derive(Clone)]
pub struct ServiceCatalogClient {
    client: aws_sdk_servicecatalog::Client,
}

impl ServiceCatalogClient {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_servicecatalog::Client::new(config),
        }
    }
}

#[async_trait]
impl Catalog for ServiceCatalogClient {
    async fn search_products(&self) -> Result<Vec<ProductSummary>, PublishError> {
        let mut products = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let output = self
                .client
                .search_products()
                .set_page_token(page_token.take())
                .send()
                .await
                .map_err(|e| classify("search_products", e))?;

            products.extend(output.product_view_summaries().iter().filter_map(|view| {
                Some(ProductSummary {
                    id: view.product_id()?.to_string(),
                    name: view.name()?.to_string(),
                })
            }));

            match output.next_page_token().filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token.to_string()),
                None => break,
            }
        }
        debug!(count = products.len(), "Listed catalog products");
        Ok(products)
    }

    async fn describe_product(&self, product_id: &str) -> Result<ProductSummary, PublishError> {
        let output = self
            .client
            .describe_product()
            .id(product_id)
            .send()
            .await
            .map_err(|e| {
                let not_found = e
                    .as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception());
                if not_found {
                    PublishError::ProductNotFound(product_id.to_string())
                } else {
                    classify("describe_product", e)
                }
            })?;

        let view = output
            .product_view_summary()
            .ok_or_else(|| PublishError::ProductNotFound(product_id.to_string()))?;
        Ok(ProductSummary {
            id: view.product_id().unwrap_or(product_id).to_string(),
            name: view.name().unwrap_or_default().to_string(),
        })
    }

    async fn create_provisioning_artifact(
        &self,
        req: NewProvisioningArtifact,
    ) -> Result<String, PublishError> {
        let parameters = ProvisioningArtifactProperties::builder()
            .name(req.name)
            .description(req.description)
            .info(TEMPLATE_URL_INFO_KEY, req.template_url)
            .r#type(ProvisioningArtifactType::CloudFormationTemplate)
            .build();

        let output = self
            .client
            .create_provisioning_artifact()
            .product_id(&req.product_id)
            .parameters(parameters)
            .idempotency_token(req.idempotency_token)
            .send()
            .await
            .map_err(|e| classify("create_provisioning_artifact", e))?;

        output
            .provisioning_artifact_detail()
            .and_then(|detail| detail.id())
            .map(str::to_string)
            .ok_or_else(|| {
                PublishError::service(
                    "create_provisioning_artifact",
                    "response carried no provisioning artifact id",
                )
            })
    }

    async fn describe_provisioning_artifact(
        &self,
        artifact_id: &str,
        product_id: &str,
    ) -> Result<ArtifactDescription, PublishError> {
        let output = self
            .client
            .describe_provisioning_artifact()
            .provisioning_artifact_id(artifact_id)
            .product_id(product_id)
            .send()
            .await
            .map_err(|e| classify("describe_provisioning_artifact", e))?;

        let raw_status = output.status().map(|s| s.as_str()).unwrap_or_default();
        let status = ArtifactStatus::parse(raw_status).ok_or_else(|| {
            PublishError::service(
                "describe_provisioning_artifact",
                format!("unexpected artifact status `{raw_status}`"),
            )
        })?;

        let mut info: BTreeMap<String, String> = output
            .info()
            .map(|info| info.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        if let Some(detail) = output.provisioning_artifact_detail() {
            if let Some(description) = detail.description() {
                info.insert("Description".to_string(), description.to_string());
            }
        }
        Ok(ArtifactDescription { status, info })
    }
}
