#![allow(dead_code)]

use std::fs;
use std::path::Path;

use crop_core::template::{Template, TEMPLATE_FILE};

/// Template as emitted by `serverless package` for a service with two
/// functions, `a` and `b`.
pub const SERVERLESS_TEMPLATE: &str = r#"{
  "AWSTemplateFormatVersion": "2010-09-09",
  "Description": "The AWS CloudFormation template for this Serverless application",
  "Resources": {
    "ServerlessDeploymentBucket": {
      "Type": "AWS::S3::Bucket"
    },
    "ALogGroup": {
      "Type": "AWS::Logs::LogGroup",
      "Properties": { "LogGroupName": "/aws/lambda/svc-dev-a" }
    },
    "ALambdaFunction": {
      "Type": "AWS::Lambda::Function",
      "Properties": {
        "Code": {
          "S3Bucket": { "Ref": "ServerlessDeploymentBucket" },
          "S3Key": "serverless/svc/dev/1500000000000-2017-07-14T02:40:00.000Z/a.zip"
        },
        "FunctionName": "svc-dev-a",
        "Handler": "handler.a",
        "MemorySize": 1024,
        "Role": { "Fn::GetAtt": ["IamRoleLambdaExecution", "Arn"] },
        "Runtime": "python3.12",
        "Timeout": 6
      },
      "DependsOn": ["ALogGroup"]
    },
    "BLambdaFunction": {
      "Type": "AWS::Lambda::Function",
      "Properties": {
        "Code": {
          "S3Bucket": { "Ref": "ServerlessDeploymentBucket" },
          "S3Key": "serverless/svc/dev/1500000000000-2017-07-14T02:40:00.000Z/b.zip"
        },
        "FunctionName": "svc-dev-b",
        "Handler": "handler.b",
        "Runtime": "python3.12"
      }
    }
  },
  "Outputs": {
    "ServerlessDeploymentBucketName": {
      "Value": { "Ref": "ServerlessDeploymentBucket" }
    },
    "ALambdaFunctionQualifiedArn": {
      "Value": { "Ref": "ALambdaFunctionVersion" }
    }
  }
}"#;

pub fn serverless_template() -> Template {
    Template::parse(SERVERLESS_TEMPLATE).expect("fixture template parses")
}

/// Lay out a `.serverless`-style build directory with packages and template.
pub fn write_build_dir(dir: &Path, packages: &[&str]) {
    for name in packages {
        fs::write(dir.join(name), format!("zip bytes of {name}")).expect("write package");
    }
    fs::write(dir.join(TEMPLATE_FILE), SERVERLESS_TEMPLATE).expect("write template");
}
