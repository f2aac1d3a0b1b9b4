//! ECS adapter

use async_trait::async_trait;
use aws_sdk_ecs::error::ProvideErrorMetadata;
use aws_sdk_ecs::types as sdk;
use aws_sdk_ecs::Client;

use super::provider_error;
use crate::api::types::{ContainerInstance, Page, ServiceHealth, TaskSummary};
use crate::api::EcsApi;
use crate::service::definition::{
    self as def, ObservedService, ServiceDefinition,
};
use crate::{Error, Result};

/// [`EcsApi`] backed by the AWS SDK
pub struct EcsClient {
    inner: Client,
}

impl EcsClient {
    /// Create a client from the shared configuration
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            inner: Client::new(config),
        }
    }
}

#[async_trait]
impl EcsApi for EcsClient {
    async fn list_container_instances(
        &self,
        cluster: &str,
        filter: &str,
        max_results: i32,
        next_token: Option<String>,
    ) -> Result<Page<String>> {
        let output = self
            .inner
            .list_container_instances()
            .cluster(cluster)
            .filter(filter)
            .max_results(max_results)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| provider_error("failed to list container instances", e))?;
        Ok(Page {
            items: output.container_instance_arns().to_vec(),
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn describe_container_instances(
        &self,
        cluster: &str,
        arns: &[String],
    ) -> Result<Vec<ContainerInstance>> {
        let output = self
            .inner
            .describe_container_instances()
            .cluster(cluster)
            .set_container_instances(Some(arns.to_vec()))
            .send()
            .await
            .map_err(|e| provider_error("failed to describe container instances", e))?;
        Ok(output
            .container_instances()
            .iter()
            .map(|instance| ContainerInstance {
                arn: instance.container_instance_arn().unwrap_or_default().to_string(),
                instance_id: instance.ec2_instance_id().unwrap_or_default().to_string(),
            })
            .collect())
    }

    async fn update_container_instances_state(
        &self,
        cluster: &str,
        arns: &[String],
        status: &str,
    ) -> Result<()> {
        self.inner
            .update_container_instances_state()
            .cluster(cluster)
            .set_container_instances(Some(arns.to_vec()))
            .status(sdk::ContainerInstanceStatus::from(status))
            .send()
            .await
            .map_err(|e| provider_error("failed to update the container instances' state", e))?;
        Ok(())
    }

    async fn list_tasks_on_instance(
        &self,
        cluster: &str,
        container_instance_arn: &str,
        next_token: Option<String>,
    ) -> Result<Page<String>> {
        let output = self
            .inner
            .list_tasks()
            .cluster(cluster)
            .container_instance(container_instance_arn)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| provider_error("failed to list tasks", e))?;
        Ok(Page {
            items: output.task_arns().to_vec(),
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn list_service_tasks(
        &self,
        cluster: &str,
        service_name: &str,
        next_token: Option<String>,
    ) -> Result<Page<String>> {
        let output = self
            .inner
            .list_tasks()
            .cluster(cluster)
            .service_name(service_name)
            .desired_status(sdk::DesiredStatus::Running)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| provider_error("failed to list tasks", e))?;
        Ok(Page {
            items: output.task_arns().to_vec(),
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn describe_tasks(&self, cluster: &str, arns: &[String]) -> Result<Vec<TaskSummary>> {
        let output = self
            .inner
            .describe_tasks()
            .cluster(cluster)
            .set_tasks(Some(arns.to_vec()))
            .send()
            .await
            .map_err(|e| provider_error("failed to describe tasks", e))?;
        Ok(output
            .tasks()
            .iter()
            .map(|task| TaskSummary {
                arn: task.task_arn().unwrap_or_default().to_string(),
                group: task.group().map(str::to_string),
                last_status: task.last_status().map(str::to_string),
            })
            .collect())
    }

    async fn stop_task(&self, cluster: &str, task_arn: &str, reason: &str) -> Result<()> {
        self.inner
            .stop_task()
            .cluster(cluster)
            .task(task_arn)
            .reason(reason)
            .send()
            .await
            .map_err(|e| provider_error("failed to stop the task", e))?;
        Ok(())
    }

    async fn describe_services(
        &self,
        cluster: &str,
        names: &[String],
    ) -> Result<Vec<ServiceHealth>> {
        let output = self
            .inner
            .describe_services()
            .cluster(cluster)
            .set_services(Some(names.to_vec()))
            .send()
            .await
            .map_err(|e| provider_error("failed to describe services", e))?;
        Ok(output
            .services()
            .iter()
            .map(|service| ServiceHealth {
                name: service.service_name().unwrap_or_default().to_string(),
                status: service.status().map(str::to_string),
                desired_count: service.desired_count(),
                running_count: service.running_count(),
                deployment_count: service.deployments().len(),
            })
            .collect())
    }

    async fn describe_service(
        &self,
        cluster: &str,
        name: &str,
    ) -> Result<Option<ObservedService>> {
        let output = self
            .inner
            .describe_services()
            .cluster(cluster)
            .services(name)
            .include(sdk::ServiceField::Tags)
            .send()
            .await
            .map_err(|e| provider_error("failed to describe the service", e))?;
        Ok(output.services().first().map(observe_service))
    }

    async fn create_service(&self, definition: &ServiceDefinition) -> Result<()> {
        let input = build_create_service(&self.inner, definition)?;
        match input.send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let service_error = err.into_service_error();
                if service_error.is_invalid_parameter_exception() {
                    return Err(Error::ServiceCreation(
                        service_error.meta().message().unwrap_or_default().to_string(),
                    ));
                }
                Err(provider_error("failed to create the service", service_error))
            }
        }
    }

    async fn update_service_desired_count(
        &self,
        cluster: &str,
        service_name: &str,
        desired_count: i32,
    ) -> Result<()> {
        self.inner
            .update_service()
            .cluster(cluster)
            .service(service_name)
            .desired_count(desired_count)
            .send()
            .await
            .map_err(|e| provider_error("failed to update the desired count", e))?;
        Ok(())
    }

    async fn delete_service(&self, cluster: &str, service_name: &str) -> Result<()> {
        self.inner
            .delete_service()
            .cluster(cluster)
            .service(service_name)
            .send()
            .await
            .map_err(|e| provider_error("failed to delete the service", e))?;
        Ok(())
    }
}

fn observe_service(service: &sdk::Service) -> ObservedService {
    ObservedService {
        service_name: service.service_name().unwrap_or_default().to_string(),
        cluster_arn: service.cluster_arn().unwrap_or_default().to_string(),
        status: service.status().map(str::to_string),
        role_arn: service.role_arn().map(str::to_string),
        desired_count: service.desired_count(),
        enable_ecs_managed_tags: service.enable_ecs_managed_tags(),
        enable_execute_command: service.enable_execute_command(),
        health_check_grace_period_seconds: service.health_check_grace_period_seconds(),
        launch_type: service.launch_type().map(|v| v.as_str().to_string()),
        platform_version: service.platform_version().map(str::to_string),
        scheduling_strategy: service.scheduling_strategy().map(|v| v.as_str().to_string()),
        propagate_tags: service.propagate_tags().map(|v| v.as_str().to_string()),
        task_definition: service.task_definition().map(str::to_string),
        capacity_provider_strategy: service
            .capacity_provider_strategy()
            .iter()
            .map(|item| def::CapacityProviderStrategyItem {
                capacity_provider: item.capacity_provider().map(str::to_string),
                weight: Some(item.weight()),
                base: Some(item.base()),
            })
            .collect(),
        deployment_configuration: service.deployment_configuration().map(|config| {
            def::DeploymentConfiguration {
                deployment_circuit_breaker: config.deployment_circuit_breaker().map(|breaker| {
                    def::DeploymentCircuitBreaker {
                        enable: Some(breaker.enable()),
                        rollback: Some(breaker.rollback()),
                    }
                }),
                maximum_percent: config.maximum_percent(),
                minimum_healthy_percent: config.minimum_healthy_percent(),
            }
        }),
        deployment_controller: service.deployment_controller().map(|controller| {
            def::DeploymentController {
                r#type: controller.r#type().map(|v| v.as_str().to_string()),
            }
        }),
        load_balancers: service
            .load_balancers()
            .iter()
            .map(|lb| def::LoadBalancer {
                container_name: lb.container_name().map(str::to_string),
                container_port: lb.container_port(),
                load_balancer_name: lb.load_balancer_name().map(str::to_string),
                target_group_arn: lb.target_group_arn().map(str::to_string),
            })
            .collect(),
        network_configuration: service.network_configuration().map(|network| {
            def::NetworkConfiguration {
                awsvpc_configuration: network.awsvpc_configuration().map(|vpc| {
                    def::AwsVpcConfiguration {
                        assign_public_ip: vpc.assign_public_ip().map(|v| v.as_str().to_string()),
                        security_groups: Some(vpc.security_groups().to_vec()),
                        subnets: Some(vpc.subnets().to_vec()),
                    }
                }),
            }
        }),
        placement_constraints: service
            .placement_constraints()
            .iter()
            .map(|constraint| def::PlacementConstraint {
                expression: constraint.expression().map(str::to_string),
                r#type: constraint.r#type().map(|v| v.as_str().to_string()),
            })
            .collect(),
        placement_strategy: service
            .placement_strategy()
            .iter()
            .map(|strategy| def::PlacementStrategy {
                field: strategy.field().map(str::to_string),
                r#type: strategy.r#type().map(|v| v.as_str().to_string()),
            })
            .collect(),
        service_registries: service
            .service_registries()
            .iter()
            .map(|registry| def::ServiceRegistry {
                container_name: registry.container_name().map(str::to_string),
                container_port: registry.container_port(),
                port: registry.port(),
                registry_arn: registry.registry_arn().map(str::to_string),
            })
            .collect(),
        tags: service
            .tags()
            .iter()
            .map(|tag| def::Tag {
                key: tag.key().map(str::to_string),
                value: tag.value().map(str::to_string),
            })
            .collect(),
    }
}

fn build_create_service(
    client: &Client,
    definition: &ServiceDefinition,
) -> Result<aws_sdk_ecs::operation::create_service::builders::CreateServiceFluentBuilder> {
    let mut builder = client
        .create_service()
        .set_cluster(definition.cluster.clone())
        .set_service_name(definition.service_name.clone())
        .set_desired_count(definition.desired_count)
        .set_enable_ecs_managed_tags(definition.enable_ecs_managed_tags)
        .set_enable_execute_command(definition.enable_execute_command)
        .set_health_check_grace_period_seconds(definition.health_check_grace_period_seconds)
        .set_launch_type(definition.launch_type.as_deref().map(sdk::LaunchType::from))
        .set_platform_version(definition.platform_version.clone())
        .set_propagate_tags(
            definition
                .propagate_tags
                .as_deref()
                .map(sdk::PropagateTags::from),
        )
        .set_role(definition.role.clone())
        .set_scheduling_strategy(
            definition
                .scheduling_strategy
                .as_deref()
                .map(sdk::SchedulingStrategy::from),
        )
        .set_task_definition(definition.task_definition.clone());

    if let Some(items) = &definition.capacity_provider_strategy {
        let items = items
            .iter()
            .map(|item| {
                sdk::CapacityProviderStrategyItem::builder()
                    .set_capacity_provider(item.capacity_provider.clone())
                    .set_weight(item.weight)
                    .set_base(item.base)
                    .build()
                    .map_err(|e| Error::validation(format!("invalid capacity provider strategy: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        builder = builder.set_capacity_provider_strategy(Some(items));
    }

    if let Some(config) = &definition.deployment_configuration {
        let mut sdk_config = sdk::DeploymentConfiguration::builder()
            .set_maximum_percent(config.maximum_percent)
            .set_minimum_healthy_percent(config.minimum_healthy_percent);
        if let Some(breaker) = &config.deployment_circuit_breaker {
            sdk_config = sdk_config.deployment_circuit_breaker(
                sdk::DeploymentCircuitBreaker::builder()
                    .enable(breaker.enable.unwrap_or_default())
                    .rollback(breaker.rollback.unwrap_or_default())
                    .build(),
            );
        }
        builder = builder.deployment_configuration(sdk_config.build());
    }

    if let Some(controller) = &definition.deployment_controller {
        let controller = sdk::DeploymentController::builder()
            .set_type(
                controller
                    .r#type
                    .as_deref()
                    .map(sdk::DeploymentControllerType::from),
            )
            .build()
            .map_err(|e| Error::validation(format!("invalid deployment controller: {e}")))?;
        builder = builder.deployment_controller(controller);
    }

    if let Some(load_balancers) = &definition.load_balancers {
        let load_balancers = load_balancers
            .iter()
            .map(|lb| {
                sdk::LoadBalancer::builder()
                    .set_container_name(lb.container_name.clone())
                    .set_container_port(lb.container_port)
                    .set_load_balancer_name(lb.load_balancer_name.clone())
                    .set_target_group_arn(lb.target_group_arn.clone())
                    .build()
            })
            .collect();
        builder = builder.set_load_balancers(Some(load_balancers));
    }

    if let Some(network) = &definition.network_configuration {
        let mut sdk_network = sdk::NetworkConfiguration::builder();
        if let Some(vpc) = &network.awsvpc_configuration {
            let vpc = sdk::AwsVpcConfiguration::builder()
                .set_subnets(vpc.subnets.clone())
                .set_security_groups(vpc.security_groups.clone())
                .set_assign_public_ip(
                    vpc.assign_public_ip
                        .as_deref()
                        .map(sdk::AssignPublicIp::from),
                )
                .build()
                .map_err(|e| Error::validation(format!("invalid network configuration: {e}")))?;
            sdk_network = sdk_network.awsvpc_configuration(vpc);
        }
        builder = builder.network_configuration(sdk_network.build());
    }

    if let Some(constraints) = &definition.placement_constraints {
        let constraints = constraints
            .iter()
            .map(|constraint| {
                sdk::PlacementConstraint::builder()
                    .set_expression(constraint.expression.clone())
                    .set_type(
                        constraint
                            .r#type
                            .as_deref()
                            .map(sdk::PlacementConstraintType::from),
                    )
                    .build()
            })
            .collect();
        builder = builder.set_placement_constraints(Some(constraints));
    }

    if let Some(strategy) = &definition.placement_strategy {
        let strategy = strategy
            .iter()
            .map(|entry| {
                sdk::PlacementStrategy::builder()
                    .set_field(entry.field.clone())
                    .set_type(
                        entry
                            .r#type
                            .as_deref()
                            .map(sdk::PlacementStrategyType::from),
                    )
                    .build()
            })
            .collect();
        builder = builder.set_placement_strategy(Some(strategy));
    }

    if let Some(registries) = &definition.service_registries {
        let registries = registries
            .iter()
            .map(|registry| {
                sdk::ServiceRegistry::builder()
                    .set_container_name(registry.container_name.clone())
                    .set_container_port(registry.container_port)
                    .set_port(registry.port)
                    .set_registry_arn(registry.registry_arn.clone())
                    .build()
            })
            .collect();
        builder = builder.set_service_registries(Some(registries));
    }

    if let Some(tags) = &definition.tags {
        let tags = tags
            .iter()
            .map(|tag| {
                sdk::Tag::builder()
                    .set_key(tag.key.clone())
                    .set_value(tag.value.clone())
                    .build()
            })
            .collect();
        builder = builder.set_tags(Some(tags));
    }

    Ok(builder)
}
