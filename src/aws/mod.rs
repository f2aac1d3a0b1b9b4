//! AWS SDK backed implementations of the capability traits
//!
//! Everything SDK-shaped lives here: client construction, the adapters that
//! translate between SDK response shapes and the crate's domain types, and
//! the provisioning of the interruption warning sink. The rest of the crate
//! never sees an SDK type.

mod autoscaling;
mod ec2;
mod ecs;
pub mod interruptions;
mod sqs;

pub use autoscaling::AutoScalingClient;
pub use ec2::Ec2Client;
pub use ecs::EcsClient;
pub use sqs::SqsClient;

use aws_config::{BehaviorVersion, Region, SdkConfig};

use crate::Error;

/// Load the shared AWS configuration, honoring an optional profile and region
/// override from the command line.
pub async fn load_config(profile: Option<&str>, region: Option<&str>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(profile) = profile {
        loader = loader.profile_name(profile);
    }
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    loader.load().await
}

/// Wrap an SDK error with the failing operation's context, flattening the
/// source chain into the message so the actual service response is visible.
pub(crate) fn provider_error(context: &str, err: impl std::error::Error) -> Error {
    let mut message = format!("{context}: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    Error::provider(message)
}
