//! Per-call batch maxima imposed by the AWS APIs
//!
//! Every list-taking call in the core is chunked to these limits. They are
//! part of the operational contract, not tunables.

/// DetachInstances can detach instances up to this value
/// cf. <https://docs.aws.amazon.com/autoscaling/ec2/APIReference/API_DetachInstances.html>
pub const MAX_DETACHABLE_INSTANCES: usize = 20;

/// DescribeServices can describe services up to this value
/// cf. <https://docs.aws.amazon.com/AmazonECS/latest/APIReference/API_DescribeServices.html>
pub const MAX_DESCRIBABLE_SERVICES: usize = 10;

/// DescribeTasks can describe tasks up to this value
/// cf. <https://docs.aws.amazon.com/AmazonECS/latest/APIReference/API_DescribeTasks.html>
pub const MAX_DESCRIBABLE_TASKS: usize = 100;

/// ListContainerInstances can list container instances up to this value
/// cf. <https://docs.aws.amazon.com/AmazonECS/latest/APIReference/API_ListContainerInstances.html>
pub const MAX_LISTABLE_CONTAINER_INSTANCES: i32 = 100;

/// UpdateContainerInstancesState accepts instances up to this value; larger
/// requests fail with "instanceIds can have at most 10 items."
/// cf. <https://docs.aws.amazon.com/AmazonECS/latest/APIReference/API_UpdateContainerInstancesState.html>
pub const MAX_UPDATABLE_CONTAINER_INSTANCES_STATE: usize = 10;

/// ReceiveMessage can receive messages up to this value
/// cf. <https://docs.aws.amazon.com/AWSSimpleQueueService/latest/APIReference/API_ReceiveMessage.html>
pub const MAX_RECEIVABLE_MESSAGES: i32 = 10;

/// ReceiveMessage can long-poll for up to this many seconds
/// cf. <https://docs.aws.amazon.com/AWSSimpleQueueService/latest/SQSDeveloperGuide/sqs-short-and-long-polling.html>
pub const WAIT_TIME_SECONDS_FOR_LONG_POLLING: i32 = 20;
