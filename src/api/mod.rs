//! Narrow capability traits over the AWS services the core consumes
//!
//! Each trait covers exactly the calls one subsystem needs, expressed in the
//! crate's own domain types. The [`crate::aws`] module provides the SDK-backed
//! implementations; tests substitute mocks.

pub mod types;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::service::definition::{ObservedService, ServiceDefinition};
use crate::Result;
pub use types::{
    ContainerInstance, DeleteEntry, Ec2Instance, FleetType, GroupDetails, GroupInstance, GroupTag,
    LaunchSpecification, LaunchTemplateOverride, Page, QueueMessage, ServiceHealth,
    SpotFleetConfig, TaskSummary,
};

/// Calls against the ECS control plane
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EcsApi: Send + Sync {
    /// List container instance ARNs matching a cluster-level filter
    async fn list_container_instances(
        &self,
        cluster: &str,
        filter: &str,
        max_results: i32,
        next_token: Option<String>,
    ) -> Result<Page<String>>;

    /// Describe container instances by ARN
    async fn describe_container_instances(
        &self,
        cluster: &str,
        arns: &[String],
    ) -> Result<Vec<ContainerInstance>>;

    /// Transition container instances to the given status, e.g. `DRAINING`
    async fn update_container_instances_state(
        &self,
        cluster: &str,
        arns: &[String],
        status: &str,
    ) -> Result<()>;

    /// List the ARNs of tasks placed on one container instance
    async fn list_tasks_on_instance(
        &self,
        cluster: &str,
        container_instance_arn: &str,
        next_token: Option<String>,
    ) -> Result<Page<String>>;

    /// List the ARNs of a service's tasks with desired status `RUNNING`
    async fn list_service_tasks(
        &self,
        cluster: &str,
        service_name: &str,
        next_token: Option<String>,
    ) -> Result<Page<String>>;

    /// Describe tasks by ARN
    async fn describe_tasks(&self, cluster: &str, arns: &[String]) -> Result<Vec<TaskSummary>>;

    /// Stop one task with an audit reason
    async fn stop_task(&self, cluster: &str, task_arn: &str, reason: &str) -> Result<()>;

    /// Describe services for stability checks
    async fn describe_services(
        &self,
        cluster: &str,
        names: &[String],
    ) -> Result<Vec<ServiceHealth>>;

    /// Describe one service in full, including its tags, for recreation
    async fn describe_service(
        &self,
        cluster: &str,
        name: &str,
    ) -> Result<Option<ObservedService>>;

    /// Create a service from an assembled definition
    async fn create_service(&self, definition: &ServiceDefinition) -> Result<()>;

    /// Update a service's desired task count
    async fn update_service_desired_count(
        &self,
        cluster: &str,
        service_name: &str,
        desired_count: i32,
    ) -> Result<()>;

    /// Delete a service
    async fn delete_service(&self, cluster: &str, service_name: &str) -> Result<()>;
}

/// Calls against the EC2 Auto Scaling control plane
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AutoScalingApi: Send + Sync {
    /// Describe one auto scaling group, or `None` if it does not exist
    async fn describe_auto_scaling_group(&self, name: &str) -> Result<Option<GroupDetails>>;

    /// Update the group's desired capacity and/or maximum size
    async fn update_auto_scaling_group(
        &self,
        name: &str,
        desired_capacity: Option<i32>,
        max_size: Option<i32>,
    ) -> Result<()>;

    /// Create or update non-propagating tags on the group
    async fn create_or_update_tags(&self, name: &str, tags: &[GroupTag]) -> Result<()>;

    /// Delete tags from the group
    async fn delete_tags(&self, name: &str, tags: &[GroupTag]) -> Result<()>;

    /// Detach instances from the group
    async fn detach_instances(
        &self,
        name: &str,
        instance_ids: &[String],
        decrement_desired_capacity: bool,
    ) -> Result<()>;
}

/// Calls against the EC2 control plane
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Ec2Api: Send + Sync {
    /// Describe instances by id
    async fn describe_instances(&self, instance_ids: &[String]) -> Result<Vec<Ec2Instance>>;

    /// Describe one spot fleet request configuration
    async fn describe_spot_fleet_request(&self, id: &str) -> Result<SpotFleetConfig>;

    /// List the ids of a spot fleet's active instances
    async fn describe_spot_fleet_instances(&self, id: &str) -> Result<Vec<String>>;

    /// Modify a spot fleet request's target capacity
    async fn modify_spot_fleet_request(&self, id: &str, target_capacity: i32) -> Result<()>;

    /// Terminate instances
    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()>;
}

/// Calls against the SQS queue holding interruption warnings
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SqsApi: Send + Sync {
    /// Receive up to `max_messages` messages with long polling
    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: i32,
        visibility_timeout: i32,
        wait_time_seconds: i32,
    ) -> Result<Vec<QueueMessage>>;

    /// Delete a batch of processed messages
    async fn delete_message_batch(&self, queue_url: &str, entries: &[DeleteEntry]) -> Result<()>;
}
