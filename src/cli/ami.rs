use anyhow::Result;
use clap::Args;

use provision_rs::aws::ec2::{Ec2Client, ImageQuery};
use provision_rs::aws::sdk_config;
use provision_rs::config;
use provision_rs::provision::resolve_image;

#[derive(Args)]
pub struct AmiArgs {
    /// Region to query
    #[arg(long, env = "AWS_REGION", default_value = config::DEFAULT_REGION)]
    region: String,
}

impl AmiArgs {
    pub async fn main(self) -> Result<()> {
        let sdk_config = sdk_config(&self.region).await;
        let client = Ec2Client::new(&sdk_config);

        let image_id = resolve_image(&client, &ImageQuery::ubuntu_jammy()).await?;
        println!("{image_id}");
        Ok(())
    }
}
