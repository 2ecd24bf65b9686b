//! EC2 error classification.
//!
//! Uses the SDK's structured `.code()` via `ProvideErrorMetadata` rather than
//! substring matching on the Debug format.

use aws_sdk_ec2::error::ProvideErrorMetadata;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AwsError {
    /// Resource does not exist.
    #[error("resource not found: {resource_type} '{resource_id}'")]
    NotFound {
        resource_type: &'static str,
        resource_id: String,
    },

    /// Resource (or rule) already exists; safe to ignore on create.
    #[error("resource already exists")]
    AlreadyExists,

    /// Any other provider error, with its code when available.
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists)
    }
}

const NOT_FOUND_CODES: &[&str] = &[
    "InvalidGroup.NotFound",
    "InvalidPermission.NotFound",
    "InvalidInstanceID.NotFound",
    "InvalidAMIID.NotFound",
    "InvalidVpcID.NotFound",
];

const ALREADY_EXISTS_CODES: &[&str] = &["InvalidPermission.Duplicate", "InvalidGroup.Duplicate"];

/// Classify an SDK error by its metadata.
pub fn classify_error<E: ProvideErrorMetadata>(err: &E) -> AwsError {
    from_code(err.code(), err.message())
}

/// Classify from a raw code/message pair.
///
/// When the provider returns no code at all, a message containing
/// "already exists" is still treated as a duplicate; some API fronts only
/// surface the condition in the text.
pub fn from_code(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("unknown error").to_string();

    match code {
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists,
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound {
            resource_type: "resource",
            resource_id: message,
        },
        Some(c) => AwsError::Sdk {
            code: Some(c.to_string()),
            message,
        },
        None if message.to_lowercase().contains("already exists") => AwsError::AlreadyExists,
        None => AwsError::Sdk {
            code: None,
            message,
        },
    }
}
