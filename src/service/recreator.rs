//! The clone, stabilize, delete, rename pipeline

use std::time::Duration;

use tokio::time::sleep;
use tracing::info;

use crate::api::EcsApi;
use crate::service::definition::ServiceDefinition;
use crate::waiters;
use crate::{Error, Result};

/// Suffix of the intermediate name used while a service is recreated under
/// its original name
const TEMPORARY_NAME_SUFFIX: &str = "-copied-by-ecsmec";

/// CreateService fails with exactly this message while the service being
/// replaced is still draining. The SDK exposes no stable code for it, so the
/// retry matches the literal text.
const RETRYABLE_CREATE_MESSAGE: &str = "Unable to Start a service that is still Draining.";

const CREATE_ATTEMPTS: u32 = 60;
const CREATE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Recreates services whose properties cannot be changed in place
pub struct ServiceRecreator<E> {
    ecs: E,
}

impl<E: EcsApi> ServiceRecreator<E> {
    /// Create a recreator backed by the given ECS API
    pub fn new(ecs: E) -> Self {
        Self { ecs }
    }

    /// Recreate `service_name` with `overrides` applied.
    ///
    /// Without a `ServiceName` override the service keeps its name, which
    /// takes two rounds: copy to a temporary name, delete the original, copy
    /// back, delete the temporary. With a `ServiceName` override a single
    /// copy-and-delete suffices.
    pub async fn recreate(
        &self,
        cluster: &str,
        service_name: &str,
        mut overrides: ServiceDefinition,
    ) -> Result<()> {
        let renaming_back = overrides.service_name.is_none();
        let temporary_name = format!("{service_name}{TEMPORARY_NAME_SUFFIX}");
        if renaming_back {
            overrides.service_name = Some(temporary_name.clone());
        }

        self.copy(cluster, service_name, overrides).await?;
        self.stop_and_delete(cluster, service_name).await?;

        if renaming_back {
            self.copy(
                cluster,
                &temporary_name,
                ServiceDefinition {
                    service_name: Some(service_name.to_string()),
                    ..Default::default()
                },
            )
            .await?;
            self.stop_and_delete(cluster, &temporary_name).await?;
        }

        Ok(())
    }

    /// Create a copy of `service_name` with `overrides` applied and wait for
    /// it to become stable.
    async fn copy(
        &self,
        cluster: &str,
        service_name: &str,
        overrides: ServiceDefinition,
    ) -> Result<()> {
        let observed = self
            .ecs
            .describe_service(cluster, service_name)
            .await?
            .ok_or_else(|| {
                Error::validation(format!("the service \"{service_name}\" doesn't exist"))
            })?;
        if observed.status.as_deref() != Some("ACTIVE") {
            return Err(Error::validation(format!(
                "the service \"{service_name}\" is not active"
            )));
        }

        let mut definition = ServiceDefinition::from_observed(&observed);
        definition.merge(overrides);

        if let Ok(rendered) = serde_json::to_string_pretty(&definition) {
            info!("Create the following service and wait for it to become stable\n{rendered}");
        }

        let mut attempt = 1;
        loop {
            match self.create_and_wait_until_stable(&definition).await {
                Err(Error::ServiceCreation(message))
                    if message == RETRYABLE_CREATE_MESSAGE && attempt < CREATE_ATTEMPTS =>
                {
                    attempt += 1;
                    info!(
                        attempt,
                        "Retry to create the service in 1s because the old service is still draining"
                    );
                    sleep(CREATE_RETRY_INTERVAL).await;
                }
                result => return result,
            }
        }
    }

    async fn create_and_wait_until_stable(&self, definition: &ServiceDefinition) -> Result<()> {
        self.ecs.create_service(definition).await?;

        let cluster = definition.cluster.as_deref().unwrap_or_default();
        let service_name = definition.service_name.clone().unwrap_or_default();
        waiters::wait_until_services_stable(&self.ecs, cluster, &[service_name]).await
    }

    /// Scale the service to zero, wait for its tasks to stop, and delete it.
    async fn stop_and_delete(&self, cluster: &str, service_name: &str) -> Result<()> {
        info!(service = service_name, "Stop all the tasks of the service and wait for them to stop");

        let mut task_arns = Vec::new();
        let mut next_token = None;
        loop {
            let page = self
                .ecs
                .list_service_tasks(cluster, service_name, next_token)
                .await?;
            task_arns.extend(page.items);
            next_token = page.next_token;
            if next_token.is_none() {
                break;
            }
        }

        self.ecs
            .update_service_desired_count(cluster, service_name, 0)
            .await?;
        waiters::wait_until_tasks_stopped(&self.ecs, cluster, &task_arns).await?;

        info!(service = service_name, "Delete the service");
        self.ecs.delete_service(cluster, service_name).await
    }
}
