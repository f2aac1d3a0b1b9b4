//! EC2 Auto Scaling adapter

use async_trait::async_trait;
use aws_sdk_autoscaling::types as sdk;
use aws_sdk_autoscaling::Client;

use super::provider_error;
use crate::api::types::{GroupDetails, GroupInstance, GroupTag};
use crate::api::AutoScalingApi;
use crate::{Error, Result};

/// [`AutoScalingApi`] backed by the AWS SDK
pub struct AutoScalingClient {
    inner: Client,
}

impl AutoScalingClient {
    /// Create a client from the shared configuration
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            inner: Client::new(config),
        }
    }

    /// Tags managed by this tool never propagate to launched instances.
    fn build_tags(&self, name: &str, tags: &[GroupTag]) -> Result<Vec<sdk::Tag>> {
        tags.iter()
            .map(|tag| {
                sdk::Tag::builder()
                    .key(&tag.key)
                    .value(&tag.value)
                    .resource_id(name)
                    .resource_type("auto-scaling-group")
                    .propagate_at_launch(false)
                    .build()
                    .map_err(|e| Error::validation(format!("invalid tag \"{}\": {e}", tag.key)))
            })
            .collect()
    }
}

#[async_trait]
impl AutoScalingApi for AutoScalingClient {
    async fn describe_auto_scaling_group(&self, name: &str) -> Result<Option<GroupDetails>> {
        let output = self
            .inner
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(name)
            .send()
            .await
            .map_err(|e| provider_error("failed to describe the auto scaling group", e))?;

        Ok(output.auto_scaling_groups().first().map(|group| GroupDetails {
            name: group.auto_scaling_group_name().unwrap_or_default().to_string(),
            desired_capacity: group.desired_capacity().unwrap_or_default(),
            max_size: group.max_size().unwrap_or_default(),
            availability_zones: group.availability_zones().to_vec(),
            instances: group
                .instances()
                .iter()
                .map(|instance| GroupInstance {
                    instance_id: instance.instance_id().unwrap_or_default().to_string(),
                    lifecycle_state: instance
                        .lifecycle_state()
                        .map(|s| s.as_str().to_string())
                        .unwrap_or_default(),
                })
                .collect(),
            tags: group
                .tags()
                .iter()
                .map(|tag| GroupTag {
                    key: tag.key().unwrap_or_default().to_string(),
                    value: tag.value().unwrap_or_default().to_string(),
                })
                .collect(),
        }))
    }

    async fn update_auto_scaling_group(
        &self,
        name: &str,
        desired_capacity: Option<i32>,
        max_size: Option<i32>,
    ) -> Result<()> {
        self.inner
            .update_auto_scaling_group()
            .auto_scaling_group_name(name)
            .set_desired_capacity(desired_capacity)
            .set_max_size(max_size)
            .send()
            .await
            .map_err(|e| provider_error("failed to update the auto scaling group", e))?;
        Ok(())
    }

    async fn create_or_update_tags(&self, name: &str, tags: &[GroupTag]) -> Result<()> {
        self.inner
            .create_or_update_tags()
            .set_tags(Some(self.build_tags(name, tags)?))
            .send()
            .await
            .map_err(|e| provider_error("failed to create or update tags", e))?;
        Ok(())
    }

    async fn delete_tags(&self, name: &str, tags: &[GroupTag]) -> Result<()> {
        self.inner
            .delete_tags()
            .set_tags(Some(self.build_tags(name, tags)?))
            .send()
            .await
            .map_err(|e| provider_error("failed to delete tags", e))?;
        Ok(())
    }

    async fn detach_instances(
        &self,
        name: &str,
        instance_ids: &[String],
        decrement_desired_capacity: bool,
    ) -> Result<()> {
        self.inner
            .detach_instances()
            .auto_scaling_group_name(name)
            .set_instance_ids(Some(instance_ids.to_vec()))
            .should_decrement_desired_capacity(decrement_desired_capacity)
            .send()
            .await
            .map_err(|e| provider_error("failed to detach instances", e))?;
        Ok(())
    }
}
