mod common;

use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crop_core::autoupdate::{AutoUpdate, AutoUpdateMode, FUNCTION_ID};
use crop_core::config::ProductRef;
use crop_core::contract::{
    ArtifactDescription, ArtifactStatus, MockCatalog, MockObjectStore, NewProvisioningArtifact,
    ProductSummary, PutObject, PutObjectOutput,
};
use crop_core::publish::{publish, publish_template, PipelineOptions, PublishRequest};
use crop_core::registrar::PollPolicy;
use crop_core::retry::RetryPolicy;
use crop_core::rewrite::{function_code_keys, DEPLOYMENT_BUCKET_RESOURCE};
use crop_core::template::Template;
use crop_core::upload::{UploadOptions, JSON_CONTENT_TYPE, ZIP_CONTENT_TYPE};
use crop_core::PublishError;
use tempfile::tempdir;
use tokio::sync::watch;

use common::write_build_dir;

const PRODUCT: &str = "prod-x7k2mq4lzp3ra";

fn request(build_dir: &std::path::Path, autoupdate: AutoUpdate) -> PublishRequest {
    PublishRequest {
        build_dir: build_dir.to_path_buf(),
        bucket: "crop-assets".into(),
        prefix: "assets/v1/".into(),
        version: "1.4.0".into(),
        description: "Adds the billing export".into(),
        product: ProductRef::Id(PRODUCT.into()),
        autoupdate,
    }
}

fn options() -> PipelineOptions {
    let retry = RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(1),
    };
    PipelineOptions {
        upload: UploadOptions {
            concurrency: 2,
            retry,
        },
        retry,
        poll: PollPolicy {
            interval: Duration::from_millis(1),
            max_elapsed: Duration::from_secs(5),
        },
    }
}

/// Store that records every write and answers with `version` as version id.
fn recording_store(version: Option<&'static str>) -> (MockObjectStore, Arc<Mutex<Vec<PutObject>>>) {
    let puts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&puts);
    let mut store = MockObjectStore::new();
    store.expect_put_object().returning(move |req: PutObject| {
        seen.lock().unwrap().push(req);
        Ok(PutObjectOutput {
            version_id: version.map(str::to_string),
        })
    });
    (store, puts)
}

fn uploaded_template(puts: &[PutObject]) -> Template {
    let put = puts
        .iter()
        .find(|p| p.content_type == JSON_CONTENT_TYPE)
        .expect("template should have been uploaded");
    Template::parse(std::str::from_utf8(&put.body).unwrap()).expect("uploaded template parses")
}

#[tokio::test]
async fn publish_template_uploads_packages_and_rewritten_template() {
    let dir = tempdir().unwrap();
    write_build_dir(dir.path(), &["a.zip", "b.zip"]);
    fs::write(dir.path().join("serverless-state.json"), "{}").unwrap();

    let (store, puts) = recording_store(None);
    let mut catalog = MockCatalog::new();
    catalog.expect_search_products().times(0);
    catalog.expect_describe_product().times(0);

    let report = publish_template(
        &request(dir.path(), AutoUpdate::disabled()),
        &store,
        &catalog,
        &options(),
    )
    .await
    .expect("publish_template should succeed");

    let puts = puts.lock().unwrap();
    let mut keys: Vec<&str> = puts.iter().map(|p| p.key.as_str()).collect();
    keys.sort();
    assert_eq!(
        keys,
        vec!["assets/v1/a.zip", "assets/v1/b.zip", "assets/v1/template-1.4.0.json"],
        "only packages and the template may be uploaded"
    );
    for put in puts.iter() {
        assert_eq!(put.bucket, "crop-assets");
        assert!(put.public_read, "{} must be publicly readable", put.key);
        if put.key.ends_with(".zip") {
            assert_eq!(put.content_type, ZIP_CONTENT_TYPE);
        }
    }
    let a = puts.iter().find(|p| p.key == "assets/v1/a.zip").unwrap();
    assert_eq!(a.body, b"zip bytes of a.zip");

    let template = uploaded_template(&puts);
    assert!(!template.resources.contains_key(DEPLOYMENT_BUCKET_RESOURCE));
    assert!(!template.resources.contains_key(FUNCTION_ID));
    assert_eq!(
        function_code_keys(&template),
        vec![
            ("ALambdaFunction", "assets/v1/a.zip"),
            ("BLambdaFunction", "assets/v1/b.zip"),
        ]
    );

    assert_eq!(
        report.template.url,
        "https://crop-assets.s3.amazonaws.com/assets/v1/template-1.4.0.json"
    );
    assert_eq!(report.assets.len(), 2);
    assert_eq!(report.functions.len(), 2);
    assert!(report.product.is_none());
}

#[tokio::test]
async fn versioned_bucket_pins_code_and_template_url() {
    let dir = tempdir().unwrap();
    write_build_dir(dir.path(), &["a.zip", "b.zip"]);

    let (store, puts) = recording_store(Some("v-42"));
    let catalog = MockCatalog::new();

    let report = publish_template(
        &request(dir.path(), AutoUpdate::disabled()),
        &store,
        &catalog,
        &options(),
    )
    .await
    .unwrap();

    let template = uploaded_template(&puts.lock().unwrap());
    let code = &template.resources["ALambdaFunction"].properties["Code"];
    assert_eq!(code["S3ObjectVersion"], "v-42");
    assert_eq!(
        report.template.url,
        "https://crop-assets.s3.amazonaws.com/assets/v1/template-1.4.0.json?versionId=v-42"
    );
}

#[tokio::test]
async fn full_publish_registers_template_with_autoupdate() {
    let dir = tempdir().unwrap();
    write_build_dir(dir.path(), &["a.zip", "b.zip"]);

    let (store, puts) = recording_store(Some("v-7"));
    let mut catalog = MockCatalog::new();
    catalog
        .expect_describe_product()
        .withf(|id| id == PRODUCT)
        .returning(|id| {
            Ok(ProductSummary {
                id: id.to_string(),
                name: "billing-api".into(),
            })
        });
    catalog
        .expect_create_provisioning_artifact()
        .withf(|req: &NewProvisioningArtifact| {
            req.product_id == PRODUCT
                && req.name == "1.4.0"
                && req.template_url
                    == "https://crop-assets.s3.amazonaws.com/assets/v1/template-1.4.0.json?versionId=v-7"
        })
        .times(1)
        .returning(|_| Ok("pa-new".to_string()));
    let polls = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&polls);
    catalog
        .expect_describe_provisioning_artifact()
        .returning(move |_, _| {
            let mut n = counter.lock().unwrap();
            *n += 1;
            let status = if *n < 2 {
                ArtifactStatus::Creating
            } else {
                ArtifactStatus::Available
            };
            Ok(ArtifactDescription::with_status(status))
        });

    let autoupdate = AutoUpdate {
        mode: AutoUpdateMode::Enabled,
        interval: 30,
    };
    let report = publish(&request(dir.path(), autoupdate), &store, &catalog, &options(), None)
        .await
        .expect("publish should succeed");

    assert_eq!(report.product.id, PRODUCT);
    assert_eq!(report.artifact.artifact_id, "pa-new");
    assert_eq!(report.artifact.polls, 1);
    assert!(!report.run_id.is_empty());

    let template = uploaded_template(&puts.lock().unwrap());
    let updater = template
        .resources
        .get(FUNCTION_ID)
        .expect("auto-update function should be injected");
    assert_eq!(
        updater.properties["Environment"]["Variables"]["ProductId"],
        PRODUCT
    );
    assert!(template.parameters.contains_key("AutoUpdates"));
}

#[tokio::test]
async fn failed_package_upload_aborts_before_template_is_published() {
    let dir = tempdir().unwrap();
    write_build_dir(dir.path(), &["a.zip", "b.zip"]);

    let puts = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen = Arc::clone(&puts);
    let mut store = MockObjectStore::new();
    store.expect_put_object().returning(move |req: PutObject| {
        seen.lock().unwrap().push(req.key.clone());
        if req.key.ends_with("b.zip") {
            Err(PublishError::service("put_object", "AccessDenied"))
        } else {
            Ok(PutObjectOutput::default())
        }
    });
    let catalog = MockCatalog::new();

    let err = publish_template(
        &request(dir.path(), AutoUpdate::disabled()),
        &store,
        &catalog,
        &options(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PublishError::Service { .. }), "got {err:?}");
    assert!(
        !puts.lock().unwrap().iter().any(|k| k.ends_with(".json")),
        "template must not be published after a failed package upload"
    );
}

#[tokio::test]
async fn transient_upload_failure_is_retried() {
    let dir = tempdir().unwrap();
    write_build_dir(dir.path(), &["a.zip"]);

    let failed_once = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&failed_once);
    let mut store = MockObjectStore::new();
    store.expect_put_object().returning(move |req: PutObject| {
        let mut failed = flag.lock().unwrap();
        if req.key.ends_with("a.zip") && !*failed {
            *failed = true;
            return Err(PublishError::transient("put_object", "connection reset"));
        }
        Ok(PutObjectOutput::default())
    });

    let mut template = Template::parse(common::SERVERLESS_TEMPLATE).unwrap();
    template.resources.remove("BLambdaFunction");
    fs::write(
        dir.path().join(crop_core::template::TEMPLATE_FILE),
        template.to_canonical_json().unwrap(),
    )
    .unwrap();

    let report = publish_template(
        &request(dir.path(), AutoUpdate::disabled()),
        &store,
        &MockCatalog::new(),
        &options(),
    )
    .await
    .expect("a single transient failure should be absorbed by retry");
    assert!(*failed_once.lock().unwrap());
    assert_eq!(report.assets["a.zip"].key(), "assets/v1/a.zip");
}

#[tokio::test]
async fn missing_build_directory_is_reported() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");

    let err = publish_template(
        &request(&missing, AutoUpdate::disabled()),
        &MockObjectStore::new(),
        &MockCatalog::new(),
        &options(),
    )
    .await
    .unwrap_err();
    assert!(
        matches!(err, PublishError::DirectoryNotFound { .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn function_without_package_fails_after_upload() {
    let dir = tempdir().unwrap();
    write_build_dir(dir.path(), &["a.zip"]);

    let (store, puts) = recording_store(None);
    let err = publish_template(
        &request(dir.path(), AutoUpdate::disabled()),
        &store,
        &MockCatalog::new(),
        &options(),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, PublishError::MissingAsset { ref asset_name, .. } if asset_name == "b.zip"),
        "got {err:?}"
    );
    assert_eq!(puts.lock().unwrap().len(), 1, "only a.zip was uploaded");
}

#[tokio::test]
async fn cancelled_run_uploads_nothing_and_creates_no_artifact() {
    let dir = tempdir().unwrap();
    write_build_dir(dir.path(), &["a.zip", "b.zip"]);

    let mut store = MockObjectStore::new();
    store.expect_put_object().times(0);
    let mut catalog = MockCatalog::new();
    catalog.expect_describe_product().times(0);
    catalog.expect_create_provisioning_artifact().times(0);

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let err = publish(
        &request(dir.path(), AutoUpdate::disabled()),
        &store,
        &catalog,
        &options(),
        Some(rx),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, PublishError::Cancelled { artifact_id: None, .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn cancel_during_upload_stops_before_the_catalog_write() {
    let dir = tempdir().unwrap();
    write_build_dir(dir.path(), &["a.zip", "b.zip"]);

    let (tx, rx) = watch::channel(false);
    let tx = Arc::new(tx);

    // The operator interrupts while the packages are uploading.
    let signal = Arc::clone(&tx);
    let mut store = MockObjectStore::new();
    store
        .expect_put_object()
        .withf(|req: &PutObject| req.key.ends_with(".zip"))
        .times(2)
        .returning(move |_| {
            let _ = signal.send(true);
            Ok(PutObjectOutput::default())
        });

    let mut catalog = MockCatalog::new();
    catalog.expect_describe_product().returning(|id| {
        Ok(ProductSummary {
            id: id.to_string(),
            name: "billing-api".into(),
        })
    });
    catalog.expect_create_provisioning_artifact().times(0);

    let err = publish(
        &request(dir.path(), AutoUpdate::disabled()),
        &store,
        &catalog,
        &options(),
        Some(rx),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, PublishError::Cancelled { stage: "template upload", artifact_id: None }),
        "got {err:?}"
    );
}
