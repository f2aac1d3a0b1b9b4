//! Service recreation
//!
//! ECS rejects in-place updates of some service properties (placement
//! strategy, service registries, the service name itself). The recreator works
//! around that by cloning the service under a new name, waiting for the clone
//! to stabilize, and deleting the original.

pub mod definition;
mod recreator;

pub use definition::{ObservedService, ServiceDefinition};
pub use recreator::ServiceRecreator;
