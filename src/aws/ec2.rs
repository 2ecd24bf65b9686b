//! EC2 client wrapper and the operations trait the provisioning flows run
//! against.
//!
//! The trait keeps the flows testable without credentials; the wrapper is the
//! only place SDK request builders appear.

use anyhow::{Context, Result};
use aws_config::SdkConfig;
use aws_sdk_ec2::types::{
    BlockDeviceMapping, EbsBlockDevice, Filter, InstanceType, IpPermission, IpRange, ResourceType,
    Tag, TagSpecification, VolumeType,
};
use aws_sdk_ec2::Client;
use std::future::Future;
use tracing::debug;

use crate::aws::error::classify_error;
use crate::config::APPLICATION_TAG;

/// Image search parameters. All fields are exact-match filters except
/// `name_pattern`, which may carry a trailing `*` wildcard.
#[derive(Debug, Clone)]
pub struct ImageQuery {
    pub owner: &'static str,
    pub name_pattern: &'static str,
    pub architecture: &'static str,
    pub virtualization: &'static str,
}

impl ImageQuery {
    /// Canonical's Ubuntu 22.04 server images for x86_64.
    pub fn ubuntu_jammy() -> Self {
        Self {
            owner: "099720109477",
            name_pattern: "ubuntu/images/hvm-ssd/ubuntu-jammy-22.04-amd64-server-*",
            architecture: "x86_64",
            virtualization: "hvm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    pub image_id: String,
    pub creation_date: String,
}

/// A single TCP ingress rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub port: u16,
    pub cidr: String,
    pub description: String,
}

impl IngressRule {
    pub fn tcp(port: u16, cidr: &str, description: &str) -> Self {
        Self {
            port,
            cidr: cidr.to_string(),
            description: description.to_string(),
        }
    }
}

/// Whether an authorize call changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Added,
    AlreadyExists,
}

/// Everything needed to launch one builder instance.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_group_id: String,
    pub name: String,
    pub volume_size_gib: i32,
}

/// Point-in-time view of a launched instance.
#[derive(Debug, Clone)]
pub struct InstanceStatus {
    pub state: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
}

/// The EC2 surface the provisioning flows need.
pub trait Ec2Ops: Send + Sync {
    fn describe_images(
        &self,
        query: &ImageQuery,
    ) -> impl Future<Output = Result<Vec<ImageSummary>>> + Send;

    /// Find a security group by name within a VPC. `Ok(None)` when absent.
    fn find_security_group(
        &self,
        name: &str,
        vpc_id: &str,
    ) -> impl Future<Output = Result<Option<String>>> + Send;

    fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Authorize one or more rules in a single call. A duplicate of any rule
    /// in the batch reports `AlreadyExists` rather than an error.
    fn authorize_ingress(
        &self,
        group_id: &str,
        rules: &[IngressRule],
    ) -> impl Future<Output = Result<RuleOutcome>> + Send;

    fn run_instance(&self, spec: &InstanceSpec) -> impl Future<Output = Result<String>> + Send;

    fn instance_status(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = Result<InstanceStatus>> + Send;
}

/// Pick the most recently created image. Creation dates are RFC 3339, so the
/// lexicographic order is the chronological order.
pub fn newest_image(mut images: Vec<ImageSummary>) -> Option<ImageSummary> {
    images.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
    images.into_iter().next()
}

pub struct Ec2Client {
    client: Client,
}

impl Ec2Client {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    fn ip_permission(rule: &IngressRule) -> IpPermission {
        IpPermission::builder()
            .ip_protocol("tcp")
            .from_port(rule.port as i32)
            .to_port(rule.port as i32)
            .ip_ranges(
                IpRange::builder()
                    .cidr_ip(rule.cidr.clone())
                    .description(rule.description.clone())
                    .build(),
            )
            .build()
    }
}

impl Ec2Ops for Ec2Client {
    async fn describe_images(&self, query: &ImageQuery) -> Result<Vec<ImageSummary>> {
        let resp = self
            .client
            .describe_images()
            .owners(query.owner)
            .filters(
                Filter::builder()
                    .name("name")
                    .values(query.name_pattern)
                    .build(),
            )
            .filters(
                Filter::builder()
                    .name("architecture")
                    .values(query.architecture)
                    .build(),
            )
            .filters(
                Filter::builder()
                    .name("virtualization-type")
                    .values(query.virtualization)
                    .build(),
            )
            .filters(Filter::builder().name("state").values("available").build())
            .send()
            .await
            .map_err(|e| classify_error(&e))
            .context("describing images")?;

        let images = resp
            .images()
            .iter()
            .filter_map(|img| {
                Some(ImageSummary {
                    image_id: img.image_id()?.to_string(),
                    creation_date: img.creation_date()?.to_string(),
                })
            })
            .collect();
        Ok(images)
    }

    async fn find_security_group(&self, name: &str, vpc_id: &str) -> Result<Option<String>> {
        let resp = self
            .client
            .describe_security_groups()
            .filters(Filter::builder().name("group-name").values(name).build())
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .send()
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(err) => {
                let classified = classify_error(&err);
                if classified.is_not_found() {
                    return Ok(None);
                }
                return Err(classified).context("describing security groups");
            }
        };

        Ok(resp
            .security_groups()
            .first()
            .and_then(|sg| sg.group_id())
            .map(str::to_string))
    }

    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
    ) -> Result<String> {
        let resp = self
            .client
            .create_security_group()
            .group_name(name)
            .description(description)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| classify_error(&e))
            .with_context(|| format!("creating security group '{name}'"))?;

        resp.group_id()
            .map(str::to_string)
            .context("create_security_group returned no group id")
    }

    async fn authorize_ingress(&self, group_id: &str, rules: &[IngressRule]) -> Result<RuleOutcome> {
        let mut req = self.client.authorize_security_group_ingress().group_id(group_id);
        for rule in rules {
            req = req.ip_permissions(Self::ip_permission(rule));
        }

        match req.send().await {
            Ok(_) => Ok(RuleOutcome::Added),
            Err(err) => {
                let classified = classify_error(&err);
                if classified.is_already_exists() {
                    debug!(group_id, "ingress rule already present");
                    Ok(RuleOutcome::AlreadyExists)
                } else {
                    Err(classified).context("authorizing ingress")
                }
            }
        }
    }

    async fn run_instance(&self, spec: &InstanceSpec) -> Result<String> {
        let resp = self
            .client
            .run_instances()
            .image_id(spec.image_id.clone())
            .instance_type(InstanceType::from(spec.instance_type.as_str()))
            .key_name(spec.key_name.clone())
            .security_group_ids(spec.security_group_id.clone())
            .min_count(1)
            .max_count(1)
            .block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name("/dev/sda1")
                    .ebs(
                        EbsBlockDevice::builder()
                            .volume_size(spec.volume_size_gib)
                            .volume_type(VolumeType::Gp3)
                            .delete_on_termination(true)
                            .build(),
                    )
                    .build(),
            )
            .tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::Instance)
                    .tags(Tag::builder().key("Name").value(spec.name.clone()).build())
                    .tags(
                        Tag::builder()
                            .key("Application")
                            .value(APPLICATION_TAG)
                            .build(),
                    )
                    .build(),
            )
            .send()
            .await
            .map_err(|e| classify_error(&e))
            .context("launching instance")?;

        resp.instances()
            .first()
            .and_then(|i| i.instance_id())
            .map(str::to_string)
            .context("run_instances returned no instance")
    }

    async fn instance_status(&self, instance_id: &str) -> Result<InstanceStatus> {
        let resp = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| classify_error(&e))
            .with_context(|| format!("describing instance {instance_id}"))?;

        let instance = resp
            .reservations()
            .first()
            .and_then(|r| r.instances().first())
            .with_context(|| format!("no reservation found for {instance_id}"))?;

        Ok(InstanceStatus {
            state: instance
                .state()
                .and_then(|s| s.name())
                .map(|n| n.as_str().to_string())
                .unwrap_or_else(|| "pending".to_string()),
            public_ip: instance.public_ip_address().map(str::to_string),
            private_ip: instance.private_ip_address().map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_image_picks_latest_creation_date() {
        let images = vec![
            ImageSummary {
                image_id: "ami-old".into(),
                creation_date: "2023-01-15T00:00:00.000Z".into(),
            },
            ImageSummary {
                image_id: "ami-new".into(),
                creation_date: "2024-06-01T00:00:00.000Z".into(),
            },
            ImageSummary {
                image_id: "ami-mid".into(),
                creation_date: "2023-11-20T00:00:00.000Z".into(),
            },
        ];
        assert_eq!(newest_image(images).unwrap().image_id, "ami-new");
    }

    #[test]
    fn newest_image_empty_is_none() {
        assert!(newest_image(Vec::new()).is_none());
    }

    #[tokio::test]
    #[ignore = "requires AWS credentials"]
    async fn describe_ubuntu_images() {
        let config = crate::aws::sdk_config("ap-south-1").await;
        let client = Ec2Client::new(&config);
        let images = client
            .describe_images(&ImageQuery::ubuntu_jammy())
            .await
            .unwrap();
        assert!(!images.is_empty());
    }
}
