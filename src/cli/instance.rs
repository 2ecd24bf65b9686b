use std::time::Duration;

use anyhow::Result;
use clap::Args;

use provision_rs::aws::ec2::{Ec2Client, InstanceSpec};
use provision_rs::aws::sdk_config;
use provision_rs::config::{self, require, sanitize_image_id};
use provision_rs::provision::launch_instance;
use provision_rs::wait::WaitPolicy;

/// Launch a builder instance and wait for it to reach the running state.
#[derive(Args)]
pub struct InstanceArgs {
    /// Region to operate in
    #[arg(long, env = "AWS_REGION", default_value = config::DEFAULT_REGION)]
    region: String,

    /// Key pair for SSH access
    #[arg(long, env = "KEY_NAME")]
    key_name: Option<String>,

    /// AMI to launch; surrounding quotes are tolerated
    #[arg(long, env = "IMAGE_ID")]
    image_id: Option<String>,

    /// Security group to attach
    #[arg(long, env = "SG_ID")]
    sg_id: Option<String>,

    /// Instance type
    #[arg(long, env = "INSTANCE_TYPE", default_value = config::DEFAULT_INSTANCE_TYPE)]
    instance_type: String,

    /// Value of the Name tag
    #[arg(long, env = "INSTANCE_NAME", default_value = config::DEFAULT_INSTANCE_NAME)]
    name: String,

    /// Root volume size in GiB
    #[arg(long, env = "VOLUME_SIZE", default_value_t = config::DEFAULT_VOLUME_SIZE_GIB)]
    volume_size: i32,

    /// Seconds between running-state checks
    #[arg(long, default_value_t = config::DEFAULT_POLL_INTERVAL_SECS)]
    poll_interval_secs: u64,

    /// Checks before giving up
    #[arg(long, default_value_t = config::DEFAULT_POLL_ATTEMPTS)]
    poll_attempts: u32,
}

impl InstanceArgs {
    pub async fn main(self) -> Result<()> {
        let key_name = require(self.key_name, "KEY_NAME")?;
        let image_id = require(
            self.image_id.as_deref().map(sanitize_image_id),
            "IMAGE_ID",
        )?;
        let sg_id = require(self.sg_id, "SG_ID")?;

        let sdk_config = sdk_config(&self.region).await;
        let client = Ec2Client::new(&sdk_config);

        let policy = WaitPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.poll_attempts,
        };
        let report = launch_instance(
            &client,
            &InstanceSpec {
                image_id,
                instance_type: self.instance_type,
                key_name,
                security_group_id: sg_id,
                name: self.name,
                volume_size_gib: self.volume_size,
            },
            &policy,
        )
        .await?;

        println!("{}", serde_json::to_string(&report)?);
        Ok(())
    }
}
