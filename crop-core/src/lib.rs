#![doc = "crop-core: core publication pipeline for crop."]

//! This crate holds all logic for publishing a Serverless build to a shared,
//! versioned bucket and registering it in a product catalog. Cloud services
//! are reached only through the traits in [`contract`]; the AWS-backed
//! implementations live in the `crop` CLI crate.
//!
//! # Usage
//! Build a [`publish::PublishRequest`] and call [`publish::publish`] (or
//! [`publish::publish_template`] to skip catalog registration) with an
//! [`contract::ObjectStore`] and a [`contract::Catalog`].

pub mod assets;
pub mod autoupdate;
pub mod config;
pub mod contract;
pub mod error;
pub mod publish;
pub mod registrar;
pub mod retry;
pub mod rewrite;
pub mod template;
pub mod upload;

pub use error::{PublishError, Result};
