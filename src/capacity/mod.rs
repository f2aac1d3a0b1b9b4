//! Safe-drain capacity coordination
//!
//! The subsystems in this module move cluster capacity without losing tasks:
//! the [`Drainer`] shepherds tasks off container instances, the cluster
//! observer waits for replacements to register, and the two controllers drive
//! auto scaling groups and spot fleet requests through their lifecycles.

mod auto_scaling_group;
mod cluster;
mod drainer;
mod poller;
mod spot_fleet_request;

pub use auto_scaling_group::AutoScalingGroup;
pub use cluster::{Cluster, EcsCluster};
pub use drainer::{Drainer, EcsDrainer};
pub use poller::{MessageHandler, QueuePoller, SqsQueuePoller};
pub use spot_fleet_request::SpotFleetRequest;

#[cfg(test)]
pub use cluster::MockCluster;
#[cfg(test)]
pub use drainer::MockDrainer;
