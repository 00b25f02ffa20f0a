//! Typed model of a CloudFormation template.
//!
//! The four sections the pipeline touches (`Resources`, `Outputs`,
//! `Parameters`, `Conditions`) are explicit fields; any other top-level key
//! (`AWSTemplateFormatVersion`, `Description`, ...) is carried through
//! untouched in [`Template::other`]. Resource bodies keep their `Properties`
//! as JSON since the pipeline only interprets the function code descriptor.
//!
//! Transformations elsewhere in the crate take a `Template` by value and
//! return a new one, so a document handed to a stage is never observed by
//! the previous stage again.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PublishError, Result};

/// File name of the template produced by a Serverless build.
pub const TEMPLATE_FILE: &str = "cloudformation-template-update-stack.json";

/// Resource type of deployable functions.
pub const FUNCTION_TYPE: &str = "AWS::Lambda::Function";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, Resource>,

    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Value>,

    #[serde(rename = "Parameters", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,

    #[serde(rename = "Conditions", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: BTreeMap<String, Value>,

    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub kind: String,

    #[serde(rename = "Properties", default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,

    #[serde(rename = "Condition", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// `DependsOn`, `DeletionPolicy`, `Metadata`, ...
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl Resource {
    pub fn new(kind: impl Into<String>, properties: Value) -> Self {
        let properties = match properties {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            kind: kind.into(),
            properties,
            condition: None,
            other: BTreeMap::new(),
        }
    }

    pub fn is_function(&self) -> bool {
        self.kind == FUNCTION_TYPE
    }

    /// The `Code.S3Key` of a function resource, if it is a plain string.
    pub fn code_key(&self) -> Option<&str> {
        self.properties
            .get("Code")
            .and_then(|code| code.get("S3Key"))
            .and_then(Value::as_str)
    }
}

/// The `Code` descriptor of a function whose package lives in a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLocation {
    #[serde(rename = "S3Bucket")]
    pub bucket: String,
    #[serde(rename = "S3Key")]
    pub key: String,
    #[serde(rename = "S3ObjectVersion", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Template {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PublishError::io(path, e))?;
        Self::parse(&text)
    }

    /// Canonical text form: compact JSON with every object's keys sorted, so
    /// equal documents always serialize to identical bytes.
    pub fn to_canonical_json(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        Ok(to_canonical_json(&value))
    }
}

/// Serialize a JSON value with object keys sorted at every depth and no
/// insignificant whitespace.
///
/// Keys are sorted here rather than relying on `serde_json::Map` being a
/// `BTreeMap`: any crate in the build that enables serde_json's
/// `preserve_order` feature turns it into an insertion-ordered map.
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", quote(k), to_canonical_json(v)))
                .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

fn quote(s: &str) -> String {
    // Serializing a str cannot fail; fall back to Debug quoting regardless.
    serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}"))
}
