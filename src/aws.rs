use aws_config::{BehaviorVersion, Region, SdkConfig};

pub mod ec2;
pub mod error;

/// Load SDK configuration for the given region, taking credentials from the
/// usual environment/profile chain.
pub async fn sdk_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await
}
