//! Provisioning of the interruption warning sink
//!
//! Spot fleet reduction needs a queue that receives EC2 spot interruption
//! warnings for the duration of the operation. The queue and the EventBridge
//! rule forwarding the warnings are created on demand under fixed names and
//! removed again once the operation finishes.

use aws_sdk_sqs::types::QueueAttributeName;
use tracing::info;

use super::provider_error;
use crate::{Error, Result};

/// Name of the temporary queue receiving interruption warnings
pub const QUEUE_NAME: &str = "ecsmec-ec2-spot-instance-interruption-warnings";

/// Name of the rule forwarding interruption warnings to the queue
pub const RULE_NAME: &str = "ecsmec-forward-ec2-spot-instance-interruption-warnings";

const TARGET_ID: &str = "sqs";

const EVENT_PATTERN: &str =
    r#"{"detail-type":["EC2 Spot Instance Interruption Warning"],"source":["aws.ec2"]}"#;

/// Create the queue and the forwarding rule, returning the queue URL.
///
/// The queue policy only admits messages sent by this rule.
pub async fn provision(
    sqs: &aws_sdk_sqs::Client,
    events: &aws_sdk_eventbridge::Client,
) -> Result<String> {
    info!(queue = QUEUE_NAME, "Create the queue for interruption warnings");
    let queue = sqs
        .create_queue()
        .queue_name(QUEUE_NAME)
        .send()
        .await
        .map_err(|e| provider_error("failed to create the queue", e))?;
    let queue_url = queue.queue_url().unwrap_or_default().to_string();

    let attributes = sqs
        .get_queue_attributes()
        .queue_url(&queue_url)
        .attribute_names(QueueAttributeName::QueueArn)
        .send()
        .await
        .map_err(|e| provider_error("failed to get the queue attributes", e))?;
    let queue_arn = attributes
        .attributes()
        .and_then(|attributes| attributes.get(&QueueAttributeName::QueueArn))
        .cloned()
        .ok_or_else(|| Error::provider("the queue has no ARN attribute".to_string()))?;

    info!(rule = RULE_NAME, "Create the rule forwarding interruption warnings");
    let rule = events
        .put_rule()
        .name(RULE_NAME)
        .event_pattern(EVENT_PATTERN)
        .send()
        .await
        .map_err(|e| provider_error("failed to create the rule", e))?;
    let rule_arn = rule.rule_arn().unwrap_or_default().to_string();

    let policy = serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Principal": { "Service": "events.amazonaws.com" },
                "Action": "SQS:SendMessage",
                "Resource": queue_arn,
                "Condition": { "ArnEquals": { "AWS:SourceArn": rule_arn } }
            }
        ]
    })
    .to_string();
    sqs.set_queue_attributes()
        .queue_url(&queue_url)
        .attributes(QueueAttributeName::Policy, policy)
        .send()
        .await
        .map_err(|e| provider_error("failed to update the queue access policy", e))?;

    let target = aws_sdk_eventbridge::types::Target::builder()
        .id(TARGET_ID)
        .arn(&queue_arn)
        .build()
        .map_err(|e| Error::validation(format!("invalid rule target: {e}")))?;
    events
        .put_targets()
        .rule(RULE_NAME)
        .targets(target)
        .send()
        .await
        .map_err(|e| provider_error("failed to put a target for the rule", e))?;

    Ok(queue_url)
}

/// Remove the forwarding rule and the queue created by [`provision`].
pub async fn teardown(
    sqs: &aws_sdk_sqs::Client,
    events: &aws_sdk_eventbridge::Client,
    queue_url: &str,
) -> Result<()> {
    info!(rule = RULE_NAME, "Delete the rule forwarding interruption warnings");
    events
        .remove_targets()
        .rule(RULE_NAME)
        .ids(TARGET_ID)
        .send()
        .await
        .map_err(|e| provider_error("failed to remove the targets of the rule", e))?;
    events
        .delete_rule()
        .name(RULE_NAME)
        .force(true)
        .send()
        .await
        .map_err(|e| provider_error("failed to delete the rule", e))?;

    info!(queue = QUEUE_NAME, "Delete the queue for interruption warnings");
    sqs.delete_queue()
        .queue_url(queue_url)
        .send()
        .await
        .map_err(|e| provider_error("failed to delete the queue", e))?;
    Ok(())
}
