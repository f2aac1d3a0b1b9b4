//! Draining of container instances
//!
//! Draining is the heart of every capacity operation: before an instance is
//! detached or terminated, its tasks must be shepherded away. Tasks that
//! belong to a service drain on their own once the instance enters `DRAINING`;
//! tasks without a service never would, so they are stopped explicitly.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tracing::info;

use crate::api::types::{ContainerInstance, DeleteEntry, QueueMessage};
use crate::api::EcsApi;
use crate::limits;
use crate::waiters;
use crate::{Error, Result};

/// Reason recorded on tasks ecsmec stops explicitly
const STOP_REASON: &str = "Task stopped by ecsmec";

/// Target state for instances being drained
const DRAINING: &str = "DRAINING";

/// Drains container instances identified by their EC2 instance ids
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Drainer: Send + Sync {
    /// Drain the given instances and wait until every affected task has
    /// stopped and every affected service is stable again.
    async fn drain(&self, instance_ids: &[String]) -> Result<()>;

    /// Start draining the instances named by interruption warning messages.
    ///
    /// Returns a delete acknowledgment for every message whose instance
    /// resolved in the cluster. Does not wait for tasks to stop; a spot
    /// interruption gives two minutes at best.
    async fn process_interruptions(
        &self,
        messages: Vec<QueueMessage>,
    ) -> Result<Vec<DeleteEntry>>;
}

/// The EC2 spot interruption warning envelope
/// cf. <https://docs.aws.amazon.com/AWSEC2/latest/UserGuide/spot-interruptions.html>
#[derive(Debug, Deserialize)]
struct InterruptionWarning {
    detail: InterruptionWarningDetail,
}

#[derive(Debug, Deserialize)]
struct InterruptionWarningDetail {
    #[serde(rename = "instance-id")]
    instance_id: String,
}

/// [`Drainer`] backed by the ECS control plane
pub struct EcsDrainer<E> {
    cluster: String,
    batch_size: i32,
    ecs: E,
}

impl<E: EcsApi> EcsDrainer<E> {
    /// Create a drainer for the given cluster.
    ///
    /// `batch_size` bounds how many instances are resolved and drained per
    /// page and may not exceed the ListContainerInstances maximum.
    pub fn new(cluster: impl Into<String>, batch_size: i32, ecs: E) -> Result<Self> {
        if batch_size > limits::MAX_LISTABLE_CONTAINER_INSTANCES {
            return Err(Error::validation(format!(
                "batch sizes greater than {} are not supported",
                limits::MAX_LISTABLE_CONTAINER_INSTANCES
            )));
        }
        Ok(Self {
            cluster: cluster.into(),
            batch_size,
            ecs,
        })
    }

    fn pages<'a>(&'a self, instance_ids: &[String]) -> ContainerInstancePages<'a, E> {
        ContainerInstancePages {
            ecs: &self.ecs,
            cluster: &self.cluster,
            batch_size: self.batch_size,
            filter: format!("ec2InstanceId in [{}]", instance_ids.join(",")),
            next_token: None,
            started: false,
        }
    }

    /// The operator gate: drains only proceed after an explicit Enter. Blocks
    /// the calling thread, which is fine for a one-shot CLI operation.
    fn confirm(&self, instances: &[ContainerInstance]) {
        println!(
            "Drain the following container instances in the cluster \"{}\":",
            self.cluster
        );
        for instance in instances {
            println!(
                "\t{} ({})",
                container_instance_id(&instance.arn),
                instance.instance_id
            );
        }
        print!("\nPress ENTER to continue ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        let _ = io::stdin().lock().read_line(&mut line);
    }

    /// Stop unmanaged tasks, mark the instances `DRAINING`, and optionally
    /// wait for all collected tasks and services to settle.
    async fn drain_container_instances(
        &self,
        instances: &[ContainerInstance],
        wait: bool,
    ) -> Result<()> {
        let mut all_task_arns = Vec::new();
        let mut all_service_names = Vec::new();

        for instance in instances {
            let mut next_token = None;
            loop {
                let page = self
                    .ecs
                    .list_tasks_on_instance(&self.cluster, &instance.arn, next_token)
                    .await?;
                if page.items.is_empty() {
                    break;
                }

                let tasks = self.ecs.describe_tasks(&self.cluster, &page.items).await?;
                for task in &tasks {
                    // A task group starting with "service:" can only belong to
                    // a service; ECS rejects that namespace for anything else.
                    match task.group.as_deref().and_then(service_name) {
                        Some(name) => all_service_names.push(name.to_string()),
                        None => {
                            // Tasks without a service stay running on a
                            // DRAINING instance, so stop them here.
                            info!(task = %task.arn, "Stop the task");
                            self.ecs
                                .stop_task(&self.cluster, &task.arn, STOP_REASON)
                                .await?;
                        }
                    }
                }

                all_task_arns.extend(page.items);
                next_token = page.next_token;
                if next_token.is_none() {
                    break;
                }
            }
        }

        let arns: Vec<String> = instances.iter().map(|i| i.arn.clone()).collect();
        for chunk in arns.chunks(limits::MAX_UPDATABLE_CONTAINER_INSTANCES_STATE) {
            self.ecs
                .update_container_instances_state(&self.cluster, chunk, DRAINING)
                .await?;
        }

        if !wait {
            return Ok(());
        }

        info!(cluster = %self.cluster, "Wait for all the tasks in the cluster to stop");
        waiters::wait_until_tasks_stopped(&self.ecs, &self.cluster, &all_task_arns).await?;

        info!(cluster = %self.cluster, "Wait for all the services in the cluster to become stable");
        waiters::wait_until_services_stable(&self.ecs, &self.cluster, &all_service_names).await?;

        Ok(())
    }
}

#[async_trait]
impl<E: EcsApi> Drainer for EcsDrainer<E> {
    async fn drain(&self, instance_ids: &[String]) -> Result<()> {
        let mut processed = 0;

        let mut pages = self.pages(instance_ids);
        while let Some(instances) = pages.next().await? {
            processed += instances.len();
            self.confirm(&instances);
            self.drain_container_instances(&instances, true).await?;
        }

        if processed == 0 {
            return Err(Error::NoMatchingNodes {
                cluster: self.cluster.clone(),
            });
        }
        if processed != instance_ids.len() {
            return Err(Error::PartialResolution {
                expected: instance_ids.len(),
                drained: processed,
            });
        }

        Ok(())
    }

    async fn process_interruptions(
        &self,
        messages: Vec<QueueMessage>,
    ) -> Result<Vec<DeleteEntry>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut instance_ids = Vec::with_capacity(messages.len());
        let mut receipt_handles = HashMap::with_capacity(messages.len());
        for message in &messages {
            let warning: InterruptionWarning = serde_json::from_str(&message.body)
                .map_err(|e| Error::message_parse(format!("{}: {e}", message.body)))?;
            instance_ids.push(warning.detail.instance_id.clone());
            receipt_handles.insert(warning.detail.instance_id, message.receipt_handle.clone());
        }

        let mut entries = Vec::new();
        let mut pages = self.pages(&instance_ids);
        while let Some(instances) = pages.next().await? {
            for instance in &instances {
                info!(
                    cluster = %self.cluster,
                    container_instance = container_instance_id(&instance.arn),
                    instance_id = %instance.instance_id,
                    "Drain the container instance"
                );
            }

            self.drain_container_instances(&instances, false).await?;

            // Unresolved instances simply don't get an entry; their messages
            // reappear after the visibility timeout.
            for instance in &instances {
                if let Some(handle) = receipt_handles.get(&instance.instance_id) {
                    entries.push(DeleteEntry {
                        id: instance.instance_id.clone(),
                        receipt_handle: handle.clone(),
                    });
                }
            }
        }

        Ok(entries)
    }
}

/// Pages through the cluster's container instances matching a set of EC2
/// instance ids, describing each page as it goes.
struct ContainerInstancePages<'a, E> {
    ecs: &'a E,
    cluster: &'a str,
    batch_size: i32,
    filter: String,
    next_token: Option<String>,
    started: bool,
}

impl<E: EcsApi> ContainerInstancePages<'_, E> {
    async fn next(&mut self) -> Result<Option<Vec<ContainerInstance>>> {
        if self.started && self.next_token.is_none() {
            return Ok(None);
        }

        let page = self
            .ecs
            .list_container_instances(
                self.cluster,
                &self.filter,
                self.batch_size,
                self.next_token.take(),
            )
            .await?;
        self.started = true;
        self.next_token = page.next_token;

        if page.items.is_empty() {
            return Ok(None);
        }

        let instances = self
            .ecs
            .describe_container_instances(self.cluster, &page.items)
            .await?;
        Ok(Some(instances))
    }
}

/// Extract the short container instance id from its ARN
fn container_instance_id(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

/// Extract the service name from a task group like `service:web`
fn service_name(group: &str) -> Option<&str> {
    group.strip_prefix("service:")
}
