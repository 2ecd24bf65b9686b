use anyhow::Result;
use clap::Args;

use provision_rs::aws::ec2::{Ec2Client, RuleOutcome};
use provision_rs::aws::sdk_config;
use provision_rs::config::{self, require};
use provision_rs::provision::{
    ensure_security_group, find_default_group, open_web_ingress, GroupRequest,
};

/// Create the builder security group (or reuse it) with its baseline rules.
#[derive(Args)]
pub struct SgArgs {
    /// Region to operate in
    #[arg(long, env = "AWS_REGION", default_value = config::DEFAULT_REGION)]
    region: String,

    /// VPC to place the group in
    #[arg(long, env = "VPC_ID")]
    vpc_id: Option<String>,

    /// Name of the security group
    #[arg(long, env = "SECURITY_GROUP_NAME", default_value = config::DEFAULT_GROUP_NAME)]
    name: String,

    /// CIDR allowed to reach port 22
    #[arg(long, env = "SSH_CIDR", default_value = config::ANYWHERE_CIDR)]
    ssh_cidr: String,
}

impl SgArgs {
    pub async fn main(self) -> Result<()> {
        let vpc_id = require(self.vpc_id, "VPC_ID")?;

        let sdk_config = sdk_config(&self.region).await;
        let client = Ec2Client::new(&sdk_config);

        let outcome = ensure_security_group(
            &client,
            &GroupRequest {
                vpc_id,
                name: self.name,
                ssh_cidr: self.ssh_cidr,
            },
        )
        .await?;
        println!("{}", outcome.group_id());
        Ok(())
    }
}

/// Print the id of a VPC's default security group.
#[derive(Args)]
pub struct DefaultSgArgs {
    /// Region to operate in
    #[arg(long, env = "AWS_REGION", default_value = config::DEFAULT_REGION)]
    region: String,

    /// VPC whose default group to look up
    #[arg(long, env = "VPC_ID")]
    vpc_id: Option<String>,
}

impl DefaultSgArgs {
    pub async fn main(self) -> Result<()> {
        let vpc_id = require(self.vpc_id, "VPC_ID")?;

        let sdk_config = sdk_config(&self.region).await;
        let client = Ec2Client::new(&sdk_config);

        let group_id = find_default_group(&client, &vpc_id).await?;
        println!("{group_id}");
        Ok(())
    }
}

/// Open HTTP and HTTPS from anywhere on an existing group.
#[derive(Args)]
pub struct SgRulesArgs {
    /// Region to operate in
    #[arg(long, env = "AWS_REGION", default_value = config::DEFAULT_REGION)]
    region: String,

    /// Security group to add rules to
    #[arg(long, env = "SG_ID")]
    sg_id: Option<String>,
}

impl SgRulesArgs {
    pub async fn main(self) -> Result<()> {
        let sg_id = require(self.sg_id, "SG_ID")?;

        let sdk_config = sdk_config(&self.region).await;
        let client = Ec2Client::new(&sdk_config);

        let statuses = open_web_ingress(&client, &sg_id).await?;
        for status in statuses {
            match status.outcome {
                RuleOutcome::Added => println!("Added rule for port {}", status.port),
                RuleOutcome::AlreadyExists => {
                    println!("Port {} rule already exists", status.port)
                }
            }
        }
        println!("SUCCESS");
        Ok(())
    }
}
