//! Create-service payloads
//!
//! A [`ServiceDefinition`] is everything a CreateService call accepts,
//! projected from an observed service and optionally overridden by
//! operator-supplied JSON. The wire format uses the SDK's PascalCase member
//! names, and unknown fields are rejected so a typo in an override cannot
//! silently disappear.

use serde::{Deserialize, Serialize};

/// The service-linked role ECS manages itself. It must never be passed back
/// into CreateService; the API rejects an explicit role for services that
/// require the service-linked one. The name may grow a suffix, so this is a
/// substring match.
const SERVICE_LINKED_ROLE_ARN_PART: &str = ":role/aws-service-role/ecs.amazonaws.com/AWSServiceRoleForECS";

/// A full description of an existing service, as returned by DescribeServices
/// with tags included
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservedService {
    /// Service name
    pub service_name: String,
    /// ARN of the cluster the service runs in
    pub cluster_arn: String,
    /// Service status, e.g. `ACTIVE` or `DRAINING`
    pub status: Option<String>,
    /// IAM role ARN associated with the service, if any
    pub role_arn: Option<String>,
    /// Desired task count
    pub desired_count: i32,
    /// Whether ECS-managed tags are enabled
    pub enable_ecs_managed_tags: bool,
    /// Whether ECS Exec is enabled
    pub enable_execute_command: bool,
    /// Load balancer health check grace period
    pub health_check_grace_period_seconds: Option<i32>,
    /// Launch type, e.g. `EC2` or `FARGATE`
    pub launch_type: Option<String>,
    /// Platform version for Fargate services
    pub platform_version: Option<String>,
    /// Scheduling strategy, e.g. `REPLICA` or `DAEMON`
    pub scheduling_strategy: Option<String>,
    /// Tag propagation setting, e.g. `NONE` or `TASK_DEFINITION`
    pub propagate_tags: Option<String>,
    /// Task definition the service runs
    pub task_definition: Option<String>,
    /// Capacity provider strategy
    pub capacity_provider_strategy: Vec<CapacityProviderStrategyItem>,
    /// Deployment configuration
    pub deployment_configuration: Option<DeploymentConfiguration>,
    /// Deployment controller
    pub deployment_controller: Option<DeploymentController>,
    /// Load balancers attached to the service
    pub load_balancers: Vec<LoadBalancer>,
    /// Network configuration for awsvpc tasks
    pub network_configuration: Option<NetworkConfiguration>,
    /// Placement constraints
    pub placement_constraints: Vec<PlacementConstraint>,
    /// Placement strategy
    pub placement_strategy: Vec<PlacementStrategy>,
    /// Service discovery registries
    pub service_registries: Vec<ServiceRegistry>,
    /// Tags on the service
    pub tags: Vec<Tag>,
}

/// A create-service payload
///
/// All fields are optional; merging an override on top of a projected
/// definition replaces scalars and whole lists and merges nested structures
/// field by field.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct ServiceDefinition {
    /// Capacity provider strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_provider_strategy: Option<Vec<CapacityProviderStrategyItem>>,
    /// Cluster name or ARN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    /// Deployment configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_configuration: Option<DeploymentConfiguration>,
    /// Deployment controller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_controller: Option<DeploymentController>,
    /// Desired task count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_count: Option<i32>,
    /// Whether ECS-managed tags are enabled
    #[serde(rename = "EnableECSManagedTags", skip_serializing_if = "Option::is_none")]
    pub enable_ecs_managed_tags: Option<bool>,
    /// Whether ECS Exec is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_execute_command: Option<bool>,
    /// Load balancer health check grace period
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_grace_period_seconds: Option<i32>,
    /// Launch type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_type: Option<String>,
    /// Load balancers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancers: Option<Vec<LoadBalancer>>,
    /// Network configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_configuration: Option<NetworkConfiguration>,
    /// Placement constraints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_constraints: Option<Vec<PlacementConstraint>>,
    /// Placement strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_strategy: Option<Vec<PlacementStrategy>>,
    /// Platform version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    /// Tag propagation setting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propagate_tags: Option<String>,
    /// IAM role name or ARN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Scheduling strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling_strategy: Option<String>,
    /// Service name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// Service discovery registries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_registries: Option<Vec<ServiceRegistry>>,
    /// Tags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
    /// Task definition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_definition: Option<String>,
}

impl ServiceDefinition {
    /// Project an observed service into a create-service payload.
    ///
    /// Identity fields that CreateService would reject are filtered out: the
    /// managed service-linked role, and a `NONE` tag propagation value (the
    /// API only accepts it unset).
    pub fn from_observed(service: &ObservedService) -> Self {
        let role = service
            .role_arn
            .clone()
            .filter(|arn| !arn.contains(SERVICE_LINKED_ROLE_ARN_PART));
        let propagate_tags = service
            .propagate_tags
            .clone()
            .filter(|value| value != "NONE");

        Self {
            capacity_provider_strategy: non_empty(service.capacity_provider_strategy.clone()),
            cluster: Some(service.cluster_arn.clone()),
            deployment_configuration: service.deployment_configuration.clone(),
            deployment_controller: service.deployment_controller.clone(),
            desired_count: Some(service.desired_count),
            enable_ecs_managed_tags: Some(service.enable_ecs_managed_tags),
            enable_execute_command: Some(service.enable_execute_command),
            health_check_grace_period_seconds: service.health_check_grace_period_seconds,
            launch_type: service.launch_type.clone(),
            load_balancers: non_empty(service.load_balancers.clone()),
            network_configuration: service.network_configuration.clone(),
            placement_constraints: non_empty(service.placement_constraints.clone()),
            placement_strategy: non_empty(service.placement_strategy.clone()),
            platform_version: service.platform_version.clone(),
            propagate_tags,
            role,
            scheduling_strategy: service.scheduling_strategy.clone(),
            service_name: Some(service.service_name.clone()),
            service_registries: non_empty(service.service_registries.clone()),
            tags: non_empty(service.tags.clone()),
            task_definition: service.task_definition.clone(),
        }
    }

    /// Merge `other` on top of this definition with override semantics:
    /// present scalars replace, present lists replace wholesale, and nested
    /// structures merge recursively.
    pub fn merge(&mut self, other: ServiceDefinition) {
        replace(&mut self.capacity_provider_strategy, other.capacity_provider_strategy);
        replace(&mut self.cluster, other.cluster);
        merge_nested(&mut self.deployment_configuration, other.deployment_configuration);
        merge_nested(&mut self.deployment_controller, other.deployment_controller);
        replace(&mut self.desired_count, other.desired_count);
        replace(&mut self.enable_ecs_managed_tags, other.enable_ecs_managed_tags);
        replace(&mut self.enable_execute_command, other.enable_execute_command);
        replace(
            &mut self.health_check_grace_period_seconds,
            other.health_check_grace_period_seconds,
        );
        replace(&mut self.launch_type, other.launch_type);
        replace(&mut self.load_balancers, other.load_balancers);
        merge_nested(&mut self.network_configuration, other.network_configuration);
        replace(&mut self.placement_constraints, other.placement_constraints);
        replace(&mut self.placement_strategy, other.placement_strategy);
        replace(&mut self.platform_version, other.platform_version);
        replace(&mut self.propagate_tags, other.propagate_tags);
        replace(&mut self.role, other.role);
        replace(&mut self.scheduling_strategy, other.scheduling_strategy);
        replace(&mut self.service_name, other.service_name);
        replace(&mut self.service_registries, other.service_registries);
        replace(&mut self.tags, other.tags);
        replace(&mut self.task_definition, other.task_definition);
    }
}

/// Recursive merge for nested structures
trait Merge {
    fn merge(&mut self, other: Self);
}

fn replace<T>(dst: &mut Option<T>, src: Option<T>) {
    if src.is_some() {
        *dst = src;
    }
}

fn merge_nested<T: Merge>(dst: &mut Option<T>, src: Option<T>) {
    match (dst.as_mut(), src) {
        (Some(dst), Some(src)) => dst.merge(src),
        (None, Some(src)) => *dst = Some(src),
        (_, None) => {}
    }
}

fn non_empty<T>(values: Vec<T>) -> Option<Vec<T>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// One entry of a capacity provider strategy
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct CapacityProviderStrategyItem {
    /// Capacity provider name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_provider: Option<String>,
    /// Relative share of tasks placed through this provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
    /// Minimum number of tasks placed through this provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<i32>,
}

/// Deployment rollout parameters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct DeploymentConfiguration {
    /// Circuit breaker settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_circuit_breaker: Option<DeploymentCircuitBreaker>,
    /// Upper bound on running tasks during a deployment, in percent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_percent: Option<i32>,
    /// Lower bound on healthy tasks during a deployment, in percent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_healthy_percent: Option<i32>,
}

impl Merge for DeploymentConfiguration {
    fn merge(&mut self, other: Self) {
        merge_nested(
            &mut self.deployment_circuit_breaker,
            other.deployment_circuit_breaker,
        );
        replace(&mut self.maximum_percent, other.maximum_percent);
        replace(&mut self.minimum_healthy_percent, other.minimum_healthy_percent);
    }
}

/// Deployment circuit breaker settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct DeploymentCircuitBreaker {
    /// Whether the circuit breaker is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
    /// Whether a tripped breaker rolls the deployment back
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<bool>,
}

impl Merge for DeploymentCircuitBreaker {
    fn merge(&mut self, other: Self) {
        replace(&mut self.enable, other.enable);
        replace(&mut self.rollback, other.rollback);
    }
}

/// Deployment controller selection
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct DeploymentController {
    /// Controller type, e.g. `ECS` or `CODE_DEPLOY`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

impl Merge for DeploymentController {
    fn merge(&mut self, other: Self) {
        replace(&mut self.r#type, other.r#type);
    }
}

/// A load balancer target attached to a service
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct LoadBalancer {
    /// Container to route traffic to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Container port to route traffic to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_port: Option<i32>,
    /// Classic load balancer name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer_name: Option<String>,
    /// Target group ARN for ALB/NLB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_group_arn: Option<String>,
}

/// Network configuration for awsvpc tasks
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct NetworkConfiguration {
    /// The awsvpc settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awsvpc_configuration: Option<AwsVpcConfiguration>,
}

impl Merge for NetworkConfiguration {
    fn merge(&mut self, other: Self) {
        merge_nested(&mut self.awsvpc_configuration, other.awsvpc_configuration);
    }
}

/// Subnets, security groups, and public IP assignment for awsvpc tasks
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct AwsVpcConfiguration {
    /// Whether tasks receive a public IP, `ENABLED` or `DISABLED`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assign_public_ip: Option<String>,
    /// Security group ids
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_groups: Option<Vec<String>>,
    /// Subnet ids
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnets: Option<Vec<String>>,
}

impl Merge for AwsVpcConfiguration {
    fn merge(&mut self, other: Self) {
        replace(&mut self.assign_public_ip, other.assign_public_ip);
        replace(&mut self.security_groups, other.security_groups);
        replace(&mut self.subnets, other.subnets);
    }
}

/// A task placement constraint
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct PlacementConstraint {
    /// Cluster query expression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Constraint type, e.g. `memberOf` or `distinctInstance`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

/// A task placement strategy entry
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct PlacementStrategy {
    /// Attribute the strategy applies to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Strategy type, e.g. `spread` or `binpack`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

/// A service discovery registry
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct ServiceRegistry {
    /// Container name for SRV records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Container port for SRV records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_port: Option<i32>,
    /// Port for SRV records with awsvpc tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    /// Cloud Map service ARN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_arn: Option<String>,
}

/// A resource tag
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct Tag {
    /// Tag key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Tag value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}
