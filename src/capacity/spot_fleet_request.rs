//! Spot fleet request controller
//!
//! Shrinking a spot fleet is different from shrinking an auto scaling group:
//! the fleet itself picks the instances to reclaim and announces them through
//! interruption warnings. The controller lowers the target capacity while a
//! background poller turns those warnings into drains, and only returns once
//! enough capacity has been drained.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::types::SpotFleetConfig;
use crate::api::Ec2Api;
use crate::capacity::poller::MessageHandler;
use crate::capacity::{Drainer, QueuePoller};
use crate::waiters;
use crate::{Error, Result};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(300);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Controller for one spot fleet request
pub struct SpotFleetRequest<E> {
    id: String,
    config: SpotFleetConfig,
    ec2: E,
}

impl<E: Ec2Api> SpotFleetRequest<E> {
    /// Load the configuration of the given spot fleet request
    pub async fn new(id: impl Into<String>, ec2: E) -> Result<Self> {
        let id = id.into();
        let config = ec2.describe_spot_fleet_request(&id).await?;
        Ok(Self { id, config })
    }

    /// Drain and terminate every active instance of the fleet.
    ///
    /// A `maintain` fleet that is still active would relaunch replacements
    /// while we drain, so it must be cancelled first.
    pub async fn terminate_all_instances(&self, drainer: &dyn Drainer) -> Result<()> {
        let instance_ids = self.ec2.describe_spot_fleet_instances(&self.id).await?;
        if instance_ids.is_empty() {
            return Ok(());
        }

        if self.config.request_type == crate::api::types::FleetType::Maintain
            && !self.config.state.starts_with("cancelled")
        {
            return Err(Error::RequestNotCancelled {
                state: self.config.state.clone(),
            });
        }

        drainer.drain(&instance_ids).await?;

        info!(instance_ids = ?instance_ids, "Terminate instances");
        self.ec2.terminate_instances(&instance_ids).await?;
        waiters::wait_until_instances_terminated(&self.ec2, &instance_ids).await
    }

    /// Lower the fleet's target capacity by `amount`, draining the instances
    /// the fleet interrupts along the way.
    ///
    /// The poller is started before the capacity is modified so that no
    /// interruption warning can slip past, and it is cancelled and joined
    /// before this returns so no message is consumed past the operation.
    pub async fn reduce_capacity(
        &self,
        amount: i32,
        drainer: Arc<dyn Drainer>,
        poller: Arc<dyn QueuePoller>,
    ) -> Result<()> {
        let target_capacity = self.config.target_capacity;
        let amount = if target_capacity - amount < 0 {
            target_capacity
        } else {
            amount
        };
        if amount == 0 {
            return Ok(());
        }

        let capacity_per_instance = capacity_per_instance(&self.config)?;

        let drained = Arc::new(AtomicI32::new(0));
        let token = CancellationToken::new();

        let handler: Box<MessageHandler> = {
            let drained = drained.clone();
            Box::new(move |messages| {
                let drainer = drainer.clone();
                let drained = drained.clone();
                async move {
                    let entries = drainer.process_interruptions(messages).await?;
                    drained.fetch_add(
                        entries.len() as i32 * capacity_per_instance,
                        Ordering::SeqCst,
                    );
                    Ok(entries)
                }
                .boxed()
            })
        };

        let poll_task = tokio::spawn({
            let token = token.clone();
            async move { poller.poll(token, &handler).await }
        });

        let result = self
            .drain_reduced_capacity(amount, capacity_per_instance, &drained)
            .await;

        token.cancel();
        if let Err(err) = poll_task.await {
            warn!(error = %err, "The interruption poller task failed");
        }

        result
    }

    async fn drain_reduced_capacity(
        &self,
        amount: i32,
        capacity_per_instance: i32,
        drained: &AtomicI32,
    ) -> Result<()> {
        let new_target_capacity = self.config.target_capacity - amount;
        info!(
            id = %self.id,
            target_capacity = new_target_capacity,
            "Modify the spot fleet request"
        );
        self.ec2
            .modify_spot_fleet_request(&self.id, new_target_capacity)
            .await?;

        info!("Wait for instances to be drained");
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        // One more drained instance would overshoot the requested amount, so
        // the wait stops as soon as the gap is smaller than a single
        // instance's capacity.
        while drained.load(Ordering::SeqCst) <= amount - capacity_per_instance {
            if Instant::now() >= deadline {
                return Err(Error::drain_timeout(format!(
                    "all the spot fleet instances weren't drained within {DRAIN_TIMEOUT:?}"
                )));
            }
            sleep(DRAIN_POLL_INTERVAL).await;
        }

        Ok(())
    }
}

/// Determine how much capacity one instance contributes.
///
/// All weighted capacities configured on the fleet must agree and be whole
/// numbers; a fleet without any weighting counts one unit per instance.
fn capacity_per_instance(config: &SpotFleetConfig) -> Result<i32> {
    let mut capacity = 0i32;

    let weights = config
        .launch_template_overrides
        .iter()
        .filter_map(|o| o.weighted_capacity)
        .chain(
            config
                .launch_specifications
                .iter()
                .filter_map(|s| s.weighted_capacity),
        );
    for weight in weights {
        if weight.fract() != 0.0 {
            return Err(Error::FractionalWeight);
        }
        let weight = weight as i32;
        if capacity == 0 {
            capacity = weight;
        }
        if capacity != weight {
            return Err(Error::MixedWeights);
        }
    }

    Ok(if capacity == 0 { 1 } else { capacity })
}
