use thiserror::Error;

/// Region queried when `AWS_REGION` is unset.
pub const DEFAULT_REGION: &str = "ap-south-1";

/// Name of the builder security group when `SECURITY_GROUP_NAME` is unset.
pub const DEFAULT_GROUP_NAME: &str = "yocto-builder-sg";

/// Source range meaning "from anywhere".
pub const ANYWHERE_CIDR: &str = "0.0.0.0/0";

pub const DEFAULT_INSTANCE_TYPE: &str = "m5.2xlarge";
pub const DEFAULT_INSTANCE_NAME: &str = "yocto-builder";
pub const DEFAULT_VOLUME_SIZE_GIB: i32 = 100;

/// Value of the `Application` tag stamped on every launched instance.
pub const APPLICATION_TAG: &str = "yocto-builder";

/// Running-state poll cadence: one check every 10s, 60 checks (~10 minutes).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_POLL_ATTEMPTS: u32 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
}

/// Presence check for a required parameter, done before any AWS client is
/// built. An empty value counts as missing, like an env var set to "".
pub fn require(value: Option<String>, var: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(var)),
    }
}

/// Strip surrounding whitespace and quote characters from an image id.
///
/// Orchestrators tend to hand the id over as it appeared in a previous
/// command's quoted output, e.g. `"ami-0abc"` or `'ami-0abc'`.
pub fn sanitize_image_id(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string()
}
