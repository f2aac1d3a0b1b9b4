//! Polling waiters shared by the capacity controllers and the service
//! recreator
//!
//! Each waiter checks immediately, then polls at a fixed cadence until its
//! condition holds or the deadline passes. Deadlines use the tokio clock so
//! tests can drive them with a paused runtime.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::api::{AutoScalingApi, Ec2Api, EcsApi};
use crate::limits;
use crate::{Error, Result};

const TASKS_STOPPED_INTERVAL: Duration = Duration::from_secs(6);
const TASKS_STOPPED_TIMEOUT: Duration = Duration::from_secs(600);

const SERVICES_STABLE_INTERVAL: Duration = Duration::from_secs(15);
const SERVICES_STABLE_TIMEOUT: Duration = Duration::from_secs(600);

const INSTANCES_TERMINATED_INTERVAL: Duration = Duration::from_secs(15);
const INSTANCES_TERMINATED_TIMEOUT: Duration = Duration::from_secs(600);

const GROUP_IN_SERVICE_INTERVAL: Duration = Duration::from_secs(10);
const GROUP_IN_SERVICE_TIMEOUT: Duration = Duration::from_secs(300);

/// Wait until every given task reaches `STOPPED`, chunked to the DescribeTasks
/// limit. The deadline applies per chunk.
pub async fn wait_until_tasks_stopped<E>(ecs: &E, cluster: &str, task_arns: &[String]) -> Result<()>
where
    E: EcsApi + ?Sized,
{
    for chunk in task_arns.chunks(limits::MAX_DESCRIBABLE_TASKS) {
        let deadline = Instant::now() + TASKS_STOPPED_TIMEOUT;
        loop {
            let tasks = ecs.describe_tasks(cluster, chunk).await?;
            if tasks
                .iter()
                .all(|task| task.last_status.as_deref() == Some("STOPPED"))
            {
                break;
            }
            if Instant::now() >= deadline {
                return Err(Error::wait_timeout(format!(
                    "{} tasks didn't stop within {:?}",
                    chunk.len(),
                    TASKS_STOPPED_TIMEOUT
                )));
            }
            debug!(cluster, tasks = chunk.len(), "Tasks are still running");
            sleep(TASKS_STOPPED_INTERVAL).await;
        }
    }
    Ok(())
}

/// Wait until every named service is stable: a single deployment running the
/// desired number of tasks. Chunked to the DescribeServices limit.
pub async fn wait_until_services_stable<E>(
    ecs: &E,
    cluster: &str,
    service_names: &[String],
) -> Result<()>
where
    E: EcsApi + ?Sized,
{
    for chunk in service_names.chunks(limits::MAX_DESCRIBABLE_SERVICES) {
        let deadline = Instant::now() + SERVICES_STABLE_TIMEOUT;
        loop {
            let services = ecs.describe_services(cluster, chunk).await?;
            if !services.is_empty() && services.iter().all(|service| service.is_stable()) {
                break;
            }
            if Instant::now() >= deadline {
                return Err(Error::stability_timeout(format!(
                    "the services {:?} didn't become stable within {:?}",
                    chunk, SERVICES_STABLE_TIMEOUT
                )));
            }
            debug!(cluster, services = ?chunk, "Services are not stable yet");
            sleep(SERVICES_STABLE_INTERVAL).await;
        }
    }
    Ok(())
}

/// Wait until every given EC2 instance reaches the `terminated` state.
pub async fn wait_until_instances_terminated<E>(ec2: &E, instance_ids: &[String]) -> Result<()>
where
    E: Ec2Api + ?Sized,
{
    if instance_ids.is_empty() {
        return Ok(());
    }

    let deadline = Instant::now() + INSTANCES_TERMINATED_TIMEOUT;
    loop {
        let instances = ec2.describe_instances(instance_ids).await?;
        if instances
            .iter()
            .all(|instance| instance.state == "terminated")
        {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::wait_timeout(format!(
                "{} instances didn't terminate within {:?}",
                instance_ids.len(),
                INSTANCES_TERMINATED_TIMEOUT
            )));
        }
        debug!(
            instances = instance_ids.len(),
            "Instances are still shutting down"
        );
        sleep(INSTANCES_TERMINATED_INTERVAL).await;
    }
}

/// Wait until at least `capacity` instances of the auto scaling group are
/// `InService`.
///
/// The SDK's group-in-service waiter keys off MinSize, so a scale-up that
/// leaves MinSize untouched would be declared ready immediately. Counting
/// lifecycle states against the requested capacity avoids that.
pub async fn wait_until_group_in_service<A>(
    autoscaling: &A,
    group_name: &str,
    capacity: i32,
) -> Result<()>
where
    A: AutoScalingApi + ?Sized,
{
    let deadline = Instant::now() + GROUP_IN_SERVICE_TIMEOUT;
    loop {
        let details = autoscaling
            .describe_auto_scaling_group(group_name)
            .await?
            .ok_or_else(|| {
                Error::provider(format!(
                    "the auto scaling group \"{group_name}\" disappeared while waiting"
                ))
            })?;

        let in_service = details
            .instances
            .iter()
            .filter(|instance| instance.lifecycle_state == "InService")
            .count() as i32;
        if in_service >= capacity {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::wait_timeout(format!(
                "can't prepare at least {capacity} in-service instances within {:?}",
                GROUP_IN_SERVICE_TIMEOUT
            )));
        }
        debug!(
            group = group_name,
            in_service, capacity, "Waiting for instances to come in service"
        );
        sleep(GROUP_IN_SERVICE_INTERVAL).await;
    }
}
