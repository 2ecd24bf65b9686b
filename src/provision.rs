//! The provisioning flows behind each subcommand.
//!
//! Every flow takes the EC2 operations trait so the logic here runs under
//! test without touching AWS.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;

use crate::aws::ec2::{
    newest_image, Ec2Ops, ImageQuery, IngressRule, InstanceSpec, RuleOutcome,
};
use crate::aws::error::AwsError;
use crate::config::ANYWHERE_CIDR;
use crate::wait::{wait_until, WaitPolicy};

pub const GROUP_DESCRIPTION: &str = "Security group for Yocto Builder platform";

/// Ports opened to the world by the rule-adder tool.
pub const WEB_PORTS: [u16; 2] = [80, 443];

/// Resolve the newest available image matching `query`.
pub async fn resolve_image<E: Ec2Ops>(ec2: &E, query: &ImageQuery) -> Result<String> {
    let images = ec2.describe_images(query).await?;
    info!(count = images.len(), "matched images");
    let image = newest_image(images)
        .with_context(|| format!("no images found matching '{}'", query.name_pattern))?;
    Ok(image.image_id)
}

#[derive(Debug, Clone)]
pub struct GroupRequest {
    pub vpc_id: String,
    pub name: String,
    pub ssh_cidr: String,
}

/// Whether `ensure_security_group` found the group or made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    Existing(String),
    Created(String),
}

impl GroupOutcome {
    pub fn group_id(&self) -> &str {
        match self {
            GroupOutcome::Existing(id) | GroupOutcome::Created(id) => id,
        }
    }
}

/// Find the named group in the VPC, or create it with its baseline rules:
/// SSH from `ssh_cidr`, HTTP and HTTPS from anywhere.
pub async fn ensure_security_group<E: Ec2Ops>(
    ec2: &E,
    request: &GroupRequest,
) -> Result<GroupOutcome> {
    if let Some(group_id) = ec2.find_security_group(&request.name, &request.vpc_id).await? {
        info!(group_id, name = %request.name, "security group already exists");
        return Ok(GroupOutcome::Existing(group_id));
    }

    let group_id = ec2
        .create_security_group(&request.name, GROUP_DESCRIPTION, &request.vpc_id)
        .await?;
    info!(group_id, name = %request.name, "created security group");

    let rules = [
        IngressRule::tcp(22, &request.ssh_cidr, "SSH access"),
        IngressRule::tcp(80, ANYWHERE_CIDR, "HTTP access"),
        IngressRule::tcp(443, ANYWHERE_CIDR, "HTTPS access"),
    ];
    ec2.authorize_ingress(&group_id, &rules).await?;

    Ok(GroupOutcome::Created(group_id))
}

/// Look up the default security group of a VPC. Every VPC has one, so an
/// empty result means the VPC itself is wrong.
pub async fn find_default_group<E: Ec2Ops>(ec2: &E, vpc_id: &str) -> Result<String> {
    match ec2.find_security_group("default", vpc_id).await? {
        Some(group_id) => Ok(group_id),
        None => Err(AwsError::NotFound {
            resource_type: "default security group",
            resource_id: vpc_id.to_string(),
        }
        .into()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    pub port: u16,
    pub outcome: RuleOutcome,
}

/// Open HTTP and HTTPS from anywhere on an existing group, one rule at a
/// time so a duplicate on one port does not mask the other.
pub async fn open_web_ingress<E: Ec2Ops>(ec2: &E, group_id: &str) -> Result<Vec<PortStatus>> {
    let mut statuses = Vec::with_capacity(WEB_PORTS.len());
    for port in WEB_PORTS {
        let rule = IngressRule::tcp(port, ANYWHERE_CIDR, &format!("Port {port} access"));
        let outcome = ec2.authorize_ingress(group_id, &[rule]).await?;
        statuses.push(PortStatus { port, outcome });
    }
    Ok(statuses)
}

/// What the orchestrator reads back after a launch.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchReport {
    pub instance_id: String,
    pub public_ip: String,
    pub private_ip: String,
    pub state: String,
}

/// Launch an instance and wait until it is running.
pub async fn launch_instance<E: Ec2Ops>(
    ec2: &E,
    spec: &InstanceSpec,
    policy: &WaitPolicy,
) -> Result<LaunchReport> {
    let instance_id = ec2.run_instance(spec).await?;
    info!(instance_id, "launched, waiting for running state");

    wait_until(policy, "instance running", || async {
        let status = ec2.instance_status(&instance_id).await?;
        match status.state.as_str() {
            "running" => Ok(Some(())),
            "pending" => Ok(None),
            other => bail!("instance {instance_id} entered unexpected state '{other}'"),
        }
    })
    .await?;

    let status = ec2.instance_status(&instance_id).await?;
    Ok(LaunchReport {
        instance_id,
        public_ip: status.public_ip.unwrap_or_default(),
        private_ip: status.private_ip.unwrap_or_default(),
        state: status.state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::ec2::{ImageSummary, InstanceStatus};
    use crate::wait::WaitPolicy;
    use anyhow::anyhow;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockEc2 {
        images: Vec<ImageSummary>,
        existing_group: Option<String>,
        created_groups: Mutex<Vec<String>>,
        authorized: Mutex<Vec<IngressRule>>,
        duplicate_rules: bool,
        fail_port: Option<u16>,
        statuses: Mutex<VecDeque<InstanceStatus>>,
    }

    impl MockEc2 {
        fn status(state: &str, public_ip: Option<&str>, private_ip: Option<&str>) -> InstanceStatus {
            InstanceStatus {
                state: state.to_string(),
                public_ip: public_ip.map(str::to_string),
                private_ip: private_ip.map(str::to_string),
            }
        }
    }

    impl Ec2Ops for MockEc2 {
        async fn describe_images(&self, _query: &ImageQuery) -> Result<Vec<ImageSummary>> {
            Ok(self.images.clone())
        }

        async fn find_security_group(&self, _name: &str, _vpc_id: &str) -> Result<Option<String>> {
            Ok(self.existing_group.clone())
        }

        async fn create_security_group(
            &self,
            name: &str,
            _description: &str,
            _vpc_id: &str,
        ) -> Result<String> {
            let id = format!("sg-created-{name}");
            self.created_groups.lock().unwrap().push(id.clone());
            Ok(id)
        }

        async fn authorize_ingress(
            &self,
            _group_id: &str,
            rules: &[IngressRule],
        ) -> Result<RuleOutcome> {
            if let Some(bad) = self.fail_port {
                if rules.iter().any(|r| r.port == bad) {
                    return Err(anyhow!("provider rejected rule for port {bad}"));
                }
            }
            self.authorized.lock().unwrap().extend_from_slice(rules);
            if self.duplicate_rules {
                Ok(RuleOutcome::AlreadyExists)
            } else {
                Ok(RuleOutcome::Added)
            }
        }

        async fn run_instance(&self, _spec: &InstanceSpec) -> Result<String> {
            Ok("i-0123456789abcdef0".to_string())
        }

        async fn instance_status(&self, _instance_id: &str) -> Result<InstanceStatus> {
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                Ok(statuses.pop_front().unwrap())
            } else {
                statuses
                    .front()
                    .cloned()
                    .ok_or_else(|| anyhow!("no status scripted"))
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> WaitPolicy {
        WaitPolicy {
            interval: Duration::from_millis(1),
            max_attempts,
        }
    }

    fn spec() -> InstanceSpec {
        InstanceSpec {
            image_id: "ami-0abc".into(),
            instance_type: "m5.2xlarge".into(),
            key_name: "builder-key".into(),
            security_group_id: "sg-1".into(),
            name: "yocto-builder".into(),
            volume_size_gib: 100,
        }
    }

    #[tokio::test]
    async fn resolve_image_picks_newest() {
        let mock = MockEc2 {
            images: vec![
                ImageSummary {
                    image_id: "ami-old".into(),
                    creation_date: "2023-02-01T00:00:00.000Z".into(),
                },
                ImageSummary {
                    image_id: "ami-new".into(),
                    creation_date: "2024-03-01T00:00:00.000Z".into(),
                },
            ],
            ..Default::default()
        };
        let id = resolve_image(&mock, &ImageQuery::ubuntu_jammy()).await.unwrap();
        assert_eq!(id, "ami-new");
    }

    #[tokio::test]
    async fn resolve_image_fails_when_nothing_matches() {
        let mock = MockEc2::default();
        let err = resolve_image(&mock, &ImageQuery::ubuntu_jammy())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no images found"));
    }

    #[tokio::test]
    async fn ensure_group_returns_existing_without_creating() {
        let mock = MockEc2 {
            existing_group: Some("sg-existing".into()),
            ..Default::default()
        };
        let outcome = ensure_security_group(
            &mock,
            &GroupRequest {
                vpc_id: "vpc-1".into(),
                name: "yocto-builder-sg".into(),
                ssh_cidr: ANYWHERE_CIDR.into(),
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome, GroupOutcome::Existing("sg-existing".into()));
        assert!(mock.created_groups.lock().unwrap().is_empty());
        assert!(mock.authorized.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ensure_group_creates_with_baseline_rules() {
        let mock = MockEc2::default();
        let outcome = ensure_security_group(
            &mock,
            &GroupRequest {
                vpc_id: "vpc-1".into(),
                name: "yocto-builder-sg".into(),
                ssh_cidr: "10.0.0.0/8".into(),
            },
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            GroupOutcome::Created("sg-created-yocto-builder-sg".into())
        );
        assert_eq!(mock.created_groups.lock().unwrap().len(), 1);

        let rules = mock.authorized.lock().unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0], IngressRule::tcp(22, "10.0.0.0/8", "SSH access"));
        assert_eq!(rules[1], IngressRule::tcp(80, ANYWHERE_CIDR, "HTTP access"));
        assert_eq!(rules[2], IngressRule::tcp(443, ANYWHERE_CIDR, "HTTPS access"));
    }

    #[tokio::test]
    async fn default_group_found() {
        let mock = MockEc2 {
            existing_group: Some("sg-default".into()),
            ..Default::default()
        };
        assert_eq!(find_default_group(&mock, "vpc-1").await.unwrap(), "sg-default");
    }

    #[tokio::test]
    async fn default_group_missing_is_not_found() {
        let mock = MockEc2::default();
        let err = find_default_group(&mock, "vpc-404").await.unwrap_err();
        let aws = err.downcast_ref::<AwsError>().unwrap();
        assert!(aws.is_not_found());
        assert!(err.to_string().contains("vpc-404"));
    }

    #[tokio::test]
    async fn web_ingress_opens_both_ports() {
        let mock = MockEc2::default();
        let statuses = open_web_ingress(&mock, "sg-1").await.unwrap();

        assert_eq!(
            statuses,
            vec![
                PortStatus {
                    port: 80,
                    outcome: RuleOutcome::Added
                },
                PortStatus {
                    port: 443,
                    outcome: RuleOutcome::Added
                },
            ]
        );
        let rules = mock.authorized.lock().unwrap();
        assert_eq!(rules[0].description, "Port 80 access");
        assert_eq!(rules[1].description, "Port 443 access");
    }

    #[tokio::test]
    async fn web_ingress_tolerates_duplicates() {
        let mock = MockEc2 {
            duplicate_rules: true,
            ..Default::default()
        };
        let statuses = open_web_ingress(&mock, "sg-1").await.unwrap();
        assert!(statuses
            .iter()
            .all(|s| s.outcome == RuleOutcome::AlreadyExists));
    }

    #[tokio::test]
    async fn web_ingress_stops_on_first_failure() {
        let mock = MockEc2 {
            fail_port: Some(80),
            ..Default::default()
        };
        assert!(open_web_ingress(&mock, "sg-1").await.is_err());
        assert!(mock.authorized.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn launch_waits_through_pending() {
        let mock = MockEc2 {
            statuses: Mutex::new(VecDeque::from(vec![
                MockEc2::status("pending", None, None),
                MockEc2::status("pending", None, None),
                MockEc2::status("running", Some("3.7.0.1"), Some("172.31.0.5")),
            ])),
            ..Default::default()
        };

        let report = launch_instance(&mock, &spec(), &fast_policy(10)).await.unwrap();
        assert_eq!(report.instance_id, "i-0123456789abcdef0");
        assert_eq!(report.public_ip, "3.7.0.1");
        assert_eq!(report.private_ip, "172.31.0.5");
        assert_eq!(report.state, "running");
    }

    #[tokio::test]
    async fn launch_reports_empty_strings_for_missing_ips() {
        let mock = MockEc2 {
            statuses: Mutex::new(VecDeque::from(vec![MockEc2::status(
                "running",
                None,
                Some("172.31.0.5"),
            )])),
            ..Default::default()
        };

        let report = launch_instance(&mock, &spec(), &fast_policy(3)).await.unwrap();
        assert_eq!(report.public_ip, "");
        assert_eq!(report.private_ip, "172.31.0.5");
    }

    #[tokio::test]
    async fn launch_fails_on_terminal_state() {
        let mock = MockEc2 {
            statuses: Mutex::new(VecDeque::from(vec![
                MockEc2::status("pending", None, None),
                MockEc2::status("terminated", None, None),
            ])),
            ..Default::default()
        };

        let err = launch_instance(&mock, &spec(), &fast_policy(10))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unexpected state 'terminated'"));
    }

    #[tokio::test]
    async fn launch_times_out_when_never_running() {
        let mock = MockEc2 {
            statuses: Mutex::new(VecDeque::from(vec![MockEc2::status("pending", None, None)])),
            ..Default::default()
        };

        let err = launch_instance(&mock, &spec(), &fast_policy(3))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn launch_report_serializes_orchestrator_shape() {
        let report = LaunchReport {
            instance_id: "i-1".into(),
            public_ip: "".into(),
            private_ip: "172.31.0.5".into(),
            state: "running".into(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "instance_id": "i-1",
                "public_ip": "",
                "private_ip": "172.31.0.5",
                "state": "running"
            })
        );
    }
}
