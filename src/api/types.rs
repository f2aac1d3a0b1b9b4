//! Domain types owned by the core
//!
//! These are the snapshots the controllers operate on. The AWS SDK response
//! shapes never leave the [`crate::aws`] adapters; everything the core sees is
//! one of these types.

use chrono::{DateTime, Utc};

/// One page of a paginated listing
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Token to request the next page, if any
    pub next_token: Option<String>,
}

/// A container instance registered in an ECS cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerInstance {
    /// Full container instance ARN
    pub arn: String,
    /// EC2 instance id backing the container instance
    pub instance_id: String,
}

/// A task running on a container instance
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskSummary {
    /// Full task ARN
    pub arn: String,
    /// Task group, e.g. `service:web` or `family:batch`
    pub group: Option<String>,
    /// Last observed status, e.g. `RUNNING` or `STOPPED`
    pub last_status: Option<String>,
}

/// The slice of a service description the stability waiter needs
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceHealth {
    /// Service name
    pub name: String,
    /// Service status, e.g. `ACTIVE`
    pub status: Option<String>,
    /// Desired task count
    pub desired_count: i32,
    /// Running task count
    pub running_count: i32,
    /// Number of deployments; a stable service has exactly one
    pub deployment_count: usize,
}

impl ServiceHealth {
    /// A service is stable when a single deployment is running the desired
    /// number of tasks.
    pub fn is_stable(&self) -> bool {
        self.deployment_count == 1 && self.running_count == self.desired_count
    }
}

/// Snapshot of an auto scaling group as reported by the provider
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupDetails {
    /// Group name
    pub name: String,
    /// Current desired capacity
    pub desired_capacity: i32,
    /// Current maximum size
    pub max_size: i32,
    /// Availability zones the group spans
    pub availability_zones: Vec<String>,
    /// Instances currently attached to the group
    pub instances: Vec<GroupInstance>,
    /// Tags on the group
    pub tags: Vec<GroupTag>,
}

/// An instance attached to an auto scaling group
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupInstance {
    /// EC2 instance id
    pub instance_id: String,
    /// Lifecycle state, e.g. `InService` or `Pending`
    pub lifecycle_state: String,
}

/// A key/value tag on an auto scaling group
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupTag {
    /// Tag key
    pub key: String,
    /// Tag value
    pub value: String,
}

impl GroupTag {
    /// Convenience constructor
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An EC2 instance as seen by the capacity controllers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ec2Instance {
    /// EC2 instance id
    pub instance_id: String,
    /// When the instance was launched
    pub launch_time: DateTime<Utc>,
    /// Availability zone the instance runs in
    pub availability_zone: String,
    /// Instance state name, e.g. `running` or `terminated`
    pub state: String,
}

/// The request type of a spot fleet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FleetType {
    /// The fleet maintains its target capacity by relaunching instances
    Maintain,
    /// The fleet places a one-time request
    Request,
    /// The fleet launches instances once and never replaces them
    Instant,
}

/// Snapshot of a spot fleet request configuration
#[derive(Clone, Debug, PartialEq)]
pub struct SpotFleetConfig {
    /// Request type
    pub request_type: FleetType,
    /// Request state, e.g. `active` or `cancelled_running`
    pub state: String,
    /// Current target capacity
    pub target_capacity: i32,
    /// Launch specifications (fleets without a launch template)
    pub launch_specifications: Vec<LaunchSpecification>,
    /// Launch template overrides (fleets with a launch template)
    pub launch_template_overrides: Vec<LaunchTemplateOverride>,
}

/// A spot fleet launch specification
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LaunchSpecification {
    /// Capacity units one instance of this specification provides
    pub weighted_capacity: Option<f64>,
}

/// A launch template override within a spot fleet request
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LaunchTemplateOverride {
    /// Capacity units one instance of this override provides
    pub weighted_capacity: Option<f64>,
}

/// A message received from the interruption warning queue
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueMessage {
    /// Provider-assigned message id
    pub message_id: String,
    /// Raw message body
    pub body: String,
    /// Receipt handle used to delete the message
    pub receipt_handle: String,
}

/// A delete acknowledgment for a processed queue message
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteEntry {
    /// Entry id; ecsmec uses the EC2 instance id of the drained instance
    pub id: String,
    /// Receipt handle of the original message
    pub receipt_handle: String,
}
