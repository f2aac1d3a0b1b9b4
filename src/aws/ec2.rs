//! EC2 adapter

use async_trait::async_trait;
use aws_sdk_ec2::Client;
use chrono::{DateTime, Utc};

use super::provider_error;
use crate::api::types::{
    Ec2Instance, FleetType, LaunchSpecification, LaunchTemplateOverride, SpotFleetConfig,
};
use crate::api::Ec2Api;
use crate::{Error, Result};

/// [`Ec2Api`] backed by the AWS SDK
pub struct Ec2Client {
    inner: Client,
}

impl Ec2Client {
    /// Create a client from the shared configuration
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            inner: Client::new(config),
        }
    }
}

#[async_trait]
impl Ec2Api for Ec2Client {
    async fn describe_instances(&self, instance_ids: &[String]) -> Result<Vec<Ec2Instance>> {
        let output = self
            .inner
            .describe_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|e| provider_error("failed to describe instances", e))?;

        let mut instances = Vec::new();
        for reservation in output.reservations() {
            for instance in reservation.instances() {
                instances.push(Ec2Instance {
                    instance_id: instance.instance_id().unwrap_or_default().to_string(),
                    launch_time: instance
                        .launch_time()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
                        .unwrap_or(DateTime::<Utc>::MIN_UTC),
                    availability_zone: instance
                        .placement()
                        .and_then(|p| p.availability_zone())
                        .unwrap_or_default()
                        .to_string(),
                    state: instance
                        .state()
                        .and_then(|s| s.name())
                        .map(|n| n.as_str().to_string())
                        .unwrap_or_default(),
                });
            }
        }
        Ok(instances)
    }

    async fn describe_spot_fleet_request(&self, id: &str) -> Result<SpotFleetConfig> {
        let output = self
            .inner
            .describe_spot_fleet_requests()
            .spot_fleet_request_ids(id)
            .send()
            .await
            .map_err(|e| provider_error("failed to describe the spot fleet request", e))?;

        let config = output.spot_fleet_request_configs().first().ok_or_else(|| {
            Error::validation(format!("the spot fleet request \"{id}\" doesn't exist"))
        })?;
        let data = config.spot_fleet_request_config();

        Ok(SpotFleetConfig {
            request_type: data
                .and_then(|d| d.r#type())
                .map(|t| match t.as_str() {
                    "maintain" => FleetType::Maintain,
                    "instant" => FleetType::Instant,
                    _ => FleetType::Request,
                })
                .unwrap_or(FleetType::Request),
            state: config
                .spot_fleet_request_state()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            target_capacity: data.and_then(|d| d.target_capacity()).unwrap_or_default(),
            launch_specifications: data
                .map(|d| d.launch_specifications())
                .unwrap_or_default()
                .iter()
                .map(|spec| LaunchSpecification {
                    weighted_capacity: spec.weighted_capacity(),
                })
                .collect(),
            launch_template_overrides: data
                .map(|d| d.launch_template_configs())
                .unwrap_or_default()
                .iter()
                .flat_map(|config| config.overrides())
                .map(|overrides| LaunchTemplateOverride {
                    weighted_capacity: overrides.weighted_capacity(),
                })
                .collect(),
        })
    }

    async fn describe_spot_fleet_instances(&self, id: &str) -> Result<Vec<String>> {
        let output = self
            .inner
            .describe_spot_fleet_instances()
            .spot_fleet_request_id(id)
            .send()
            .await
            .map_err(|e| provider_error("failed to describe spot fleet instances", e))?;
        Ok(output
            .active_instances()
            .iter()
            .filter_map(|instance| instance.instance_id().map(str::to_string))
            .collect())
    }

    async fn modify_spot_fleet_request(&self, id: &str, target_capacity: i32) -> Result<()> {
        self.inner
            .modify_spot_fleet_request()
            .spot_fleet_request_id(id)
            .target_capacity(target_capacity)
            .send()
            .await
            .map_err(|e| provider_error("failed to modify the spot fleet request", e))?;
        Ok(())
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()> {
        self.inner
            .terminate_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|e| provider_error("failed to terminate the instances", e))?;
        Ok(())
    }
}
