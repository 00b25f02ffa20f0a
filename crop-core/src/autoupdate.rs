//! Injecting self-update machinery into a template.
//!
//! When enabled, the published template gains a scheduled function that
//! polls the catalog for a newer version of its own product and updates the
//! provisioned product when one appears. Four resources are added: an
//! execution role, a schedule rule, the permission letting the rule invoke
//! the function, and the function itself.
//!
//! In [`AutoUpdateMode::Enabled`] the stack owner can switch updates off
//! through the `AutoUpdates` parameter; in [`AutoUpdateMode::Forced`] the
//! resources are unconditional.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::{PublishError, Result};
use crate::template::{Resource, Template, FUNCTION_TYPE};

pub const ROLE_ID: &str = "CROPAutoUpdaterRole";
pub const EVENT_ID: &str = "CROPAutoUpdaterEvent";
pub const PERMISSION_ID: &str = "CROPAutoUpdaterEventPermission";
pub const FUNCTION_ID: &str = "CROPAutoUpdaterFunction";
pub const PARAMETER_ID: &str = "AutoUpdates";
pub const CONDITION_ID: &str = "CROPAutoUpdating";

const RESERVED_RESOURCES: [&str; 4] = [ROLE_ID, EVENT_ID, PERMISSION_ID, FUNCTION_ID];

/// Parameter value that turns updates on.
const ENABLE: &str = "Enable";
const DISABLE: &str = "Disable";

const HANDLER_SOURCE: &str = include_str!("autoupdate_handler.py");

/// Catalog and stack calls the updater function needs, and nothing more.
const UPDATER_ACTIONS: [&str; 5] = [
    "servicecatalog:DescribeProduct",
    "servicecatalog:ListProvisioningArtifacts",
    "servicecatalog:DescribeProvisionedProduct",
    "servicecatalog:UpdateProvisionedProduct",
    "cloudformation:DescribeStacks",
];

const LOG_ACTIONS: [&str; 3] = [
    "logs:CreateLogGroup",
    "logs:CreateLogStream",
    "logs:PutLogEvents",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoUpdateMode {
    #[default]
    Disabled,
    /// Injected behind an `AutoUpdates` Enable/Disable parameter.
    Enabled,
    /// Injected unconditionally.
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoUpdate {
    pub mode: AutoUpdateMode,
    /// Polling interval in minutes.
    pub interval: i64,
}

impl AutoUpdate {
    pub fn disabled() -> Self {
        Self {
            mode: AutoUpdateMode::Disabled,
            interval: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != AutoUpdateMode::Disabled
    }
}

/// The `rate(...)` phrase for a polling interval in minutes.
pub fn schedule_phrase(interval: i64) -> Result<String> {
    match interval {
        i if i < 1 => Err(PublishError::Configuration(format!(
            "auto-update interval must be at least 1 minute, got {i}"
        ))),
        1 => Ok("1 minute".to_string()),
        i => Ok(format!("{i} minutes")),
    }
}

/// Add the auto-update resources for `product_id` to `template`.
///
/// Fails with [`PublishError::Conflict`] if any reserved id is already taken
/// and with [`PublishError::Configuration`] for an interval below one minute.
/// Nothing is added when either check fails. A disabled setting returns the
/// template unchanged.
pub fn inject_autoupdate(
    mut template: Template,
    product_id: &str,
    settings: &AutoUpdate,
) -> Result<Template> {
    if !settings.is_enabled() {
        return Ok(template);
    }

    check_reserved_ids(&template)?;
    let phrase = schedule_phrase(settings.interval)?;

    let mut resources = vec![
        (ROLE_ID, updater_role()),
        (EVENT_ID, schedule_rule(&phrase)),
        (PERMISSION_ID, invoke_permission()),
        (FUNCTION_ID, updater_function(product_id)),
    ];

    if settings.mode == AutoUpdateMode::Enabled {
        template.parameters.insert(
            PARAMETER_ID.to_string(),
            json!({
                "Type": "String",
                "Description": "Allow the service to automatically update itself when an update is available, otherwise you must manually approve updates.",
                "AllowedValues": [ENABLE, DISABLE],
                "Default": ENABLE,
            }),
        );
        template.conditions.insert(
            CONDITION_ID.to_string(),
            json!({ "Fn::Equals": [{ "Ref": PARAMETER_ID }, ENABLE] }),
        );
        for (_, resource) in resources.iter_mut() {
            resource.condition = Some(CONDITION_ID.to_string());
        }
    }

    for (logical_id, resource) in resources {
        template.resources.insert(logical_id.to_string(), resource);
    }

    info!(
        product_id,
        mode = ?settings.mode,
        schedule = %phrase,
        "Injected auto-update resources"
    );
    debug!(template = ?template, "Template after auto-update injection");
    Ok(template)
}

fn check_reserved_ids(template: &Template) -> Result<()> {
    if let Some(id) = RESERVED_RESOURCES
        .iter()
        .find(|id| template.resources.contains_key(**id))
    {
        return Err(PublishError::Conflict {
            section: "Resources",
            logical_id: id.to_string(),
        });
    }
    if template.parameters.contains_key(PARAMETER_ID) {
        return Err(PublishError::Conflict {
            section: "Parameters",
            logical_id: PARAMETER_ID.to_string(),
        });
    }
    if template.conditions.contains_key(CONDITION_ID) {
        return Err(PublishError::Conflict {
            section: "Conditions",
            logical_id: CONDITION_ID.to_string(),
        });
    }
    Ok(())
}

fn updater_role() -> Resource {
    Resource::new(
        "AWS::IAM::Role",
        json!({
            "AssumeRolePolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Action": ["sts:AssumeRole"],
                    "Effect": "Allow",
                    "Principal": { "Service": ["lambda.amazonaws.com"] }
                }]
            },
            "Policies": [{
                "PolicyName": "AutoUpdateServiceCatalog",
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [
                        {
                            "Action": UPDATER_ACTIONS,
                            "Effect": "Allow",
                            "Resource": ["*"]
                        },
                        {
                            "Action": LOG_ACTIONS,
                            "Effect": "Allow",
                            "Resource": ["arn:aws:logs:*:*:*"]
                        }
                    ]
                }
            }]
        }),
    )
}

fn schedule_rule(phrase: &str) -> Resource {
    Resource::new(
        "AWS::Events::Rule",
        json!({
            "ScheduleExpression": format!("rate({phrase})"),
            "State": "ENABLED",
            "Targets": [{
                "Arn": { "Fn::GetAtt": [FUNCTION_ID, "Arn"] },
                "Id": "autoUpdaterSchedule"
            }]
        }),
    )
}

fn invoke_permission() -> Resource {
    Resource::new(
        "AWS::Lambda::Permission",
        json!({
            "Action": "lambda:InvokeFunction",
            "FunctionName": { "Fn::GetAtt": [FUNCTION_ID, "Arn"] },
            "Principal": "events.amazonaws.com",
            "SourceArn": { "Fn::GetAtt": [EVENT_ID, "Arn"] }
        }),
    )
}

fn updater_function(product_id: &str) -> Resource {
    Resource::new(
        FUNCTION_TYPE,
        json!({
            "Code": { "ZipFile": HANDLER_SOURCE },
            "Description": "AutoUpdater for ServiceCatalog Function",
            "Handler": "index.handler",
            "MemorySize": 256,
            "Environment": {
                "Variables": {
                    "StackName": { "Ref": "AWS::StackName" },
                    "ProductId": product_id
                }
            },
            "Role": { "Fn::GetAtt": [ROLE_ID, "Arn"] },
            "Runtime": "python3.12",
            "Timeout": 30
        }),
    )
}
