//! Observation of container instance registrations
//!
//! After new instances launch, the controllers need to know when they have
//! actually registered with the cluster before old capacity may be drained.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
#[cfg(test)]
use mockall::automock;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::api::EcsApi;
use crate::limits;
use crate::{Error, Result};

const REGISTRATION_INTERVAL: Duration = Duration::from_secs(10);
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(300);

/// A cluster that can report fresh container instance registrations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Name of the cluster
    fn name(&self) -> &str;

    /// Wait until exactly `count` container instances registered after
    /// `registered_after` are present.
    ///
    /// An over-count means some other actor is adding capacity at the same
    /// time; that must not be mistaken for our own instances, so the wait
    /// only succeeds on an exact match.
    async fn wait_until_container_instances_registered(
        &self,
        count: usize,
        registered_after: DateTime<Utc>,
    ) -> Result<()>;
}

/// [`Cluster`] backed by the ECS control plane
pub struct EcsCluster<E> {
    name: String,
    ecs: E,
}

impl<E: EcsApi> EcsCluster<E> {
    /// Create an observer for the named cluster
    pub fn new(name: impl Into<String>, ecs: E) -> Self {
        Self {
            name: name.into(),
            ecs,
        }
    }

    async fn count_registered_since(&self, registered_after: DateTime<Utc>) -> Result<usize> {
        let filter = format!(
            "registeredAt >= {}",
            registered_after.to_rfc3339_opts(SecondsFormat::Secs, true)
        );

        let mut found = 0;
        let mut next_token = None;
        loop {
            let page = self
                .ecs
                .list_container_instances(
                    &self.name,
                    &filter,
                    limits::MAX_LISTABLE_CONTAINER_INSTANCES,
                    next_token,
                )
                .await?;
            found += page.items.len();
            next_token = page.next_token;
            if next_token.is_none() {
                return Ok(found);
            }
        }
    }
}

#[async_trait]
impl<E: EcsApi> Cluster for EcsCluster<E> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn wait_until_container_instances_registered(
        &self,
        count: usize,
        registered_after: DateTime<Utc>,
    ) -> Result<()> {
        if count == 0 {
            return Ok(());
        }

        let deadline = Instant::now() + REGISTRATION_TIMEOUT;
        loop {
            let found = self.count_registered_since(registered_after).await?;
            if found == count {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::wait_timeout(format!(
                    "{count} container instances are expected to be registered but {found} \
                     instances were registered within {REGISTRATION_TIMEOUT:?}"
                )));
            }
            debug!(
                cluster = %self.name,
                found, count, "Waiting for container instances to register"
            );
            sleep(REGISTRATION_INTERVAL).await;
        }
    }
}
