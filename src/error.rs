//! Error types for ecsmec operations

use thiserror::Error;

/// Main error type for ecsmec operations
///
/// Every operation surfaces exactly one of these kinds so that callers (and
/// tests) can tell validation problems, corrupt persisted state, provider
/// failures, and timeouts apart.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed input: flags, amounts, unsupported batch sizes
    #[error("validation error: {0}")]
    Validation(String),

    /// Persisted state tags exist on the auto scaling group but cannot be parsed
    #[error("corrupt state: {0}")]
    CorruptState(String),

    /// An underlying AWS API call failed
    #[error("provider error: {0}")]
    Provider(String),

    /// None of the requested instances are registered in the cluster
    #[error("no target instances exist in the cluster \"{cluster}\"")]
    NoMatchingNodes {
        /// Name of the cluster that was searched
        cluster: String,
    },

    /// Only a subset of the requested instances resolved in the cluster
    #[error("{expected} instances should be drained but only {drained} instances were drained")]
    PartialResolution {
        /// Number of instances that were requested
        expected: usize,
        /// Number of instances that actually resolved and were drained
        drained: usize,
    },

    /// An interruption warning message did not match the expected envelope
    #[error("failed to parse the message: {0}")]
    MessageParse(String),

    /// Spot fleet launch specifications carry differing weighted capacities
    #[error("mixed weighted capacities are not supported")]
    MixedWeights,

    /// A spot fleet weighted capacity is not an integer
    #[error("float weighted capacities are not supported")]
    FractionalWeight,

    /// A maintain-type spot fleet request must be cancelled before its
    /// instances are terminated, otherwise the fleet relaunches replacements
    #[error("the spot fleet request with the type \"maintain\" must be cancelled, but the state is \"{state}\"")]
    RequestNotCancelled {
        /// Observed state of the spot fleet request
        state: String,
    },

    /// A polling waiter ran out of time
    #[error("wait timeout: {0}")]
    WaitTimeout(String),

    /// The spot fleet reduction did not observe enough drained capacity in time
    #[error("drain timeout: {0}")]
    DrainTimeout(String),

    /// A service did not reach a stable state in time
    #[error("stability timeout: {0}")]
    StabilityTimeout(String),

    /// The desired capacity no longer matches the persisted original
    #[error("can't restore the state unless the desired capacity is {expected}, but it is {actual}")]
    DesiredInvariantViolated {
        /// The persisted original desired capacity
        expected: i32,
        /// The desired capacity that was actually observed
        actual: i32,
    },

    /// Creating a service failed; carries the provider's message so that the
    /// transient "still draining" case can be retried by exact match
    #[error("failed to create the service: {0}")]
    ServiceCreation(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a corrupt state error with the given message
    pub fn corrupt_state(msg: impl Into<String>) -> Self {
        Self::CorruptState(msg.into())
    }

    /// Create a provider error with the given message
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a message parse error with the given message
    pub fn message_parse(msg: impl Into<String>) -> Self {
        Self::MessageParse(msg.into())
    }

    /// Create a wait timeout error with the given message
    pub fn wait_timeout(msg: impl Into<String>) -> Self {
        Self::WaitTimeout(msg.into())
    }

    /// Create a drain timeout error with the given message
    pub fn drain_timeout(msg: impl Into<String>) -> Self {
        Self::DrainTimeout(msg.into())
    }

    /// Create a stability timeout error with the given message
    pub fn stability_timeout(msg: impl Into<String>) -> Self {
        Self::StabilityTimeout(msg.into())
    }
}
