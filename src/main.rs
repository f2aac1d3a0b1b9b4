//! ecsmec - a CLI tool for Amazon ECS that executes bothersome operations safely

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ecsmec::aws::{self, interruptions, AutoScalingClient, Ec2Client, EcsClient, SqsClient};
use ecsmec::capacity::{
    AutoScalingGroup, EcsCluster, EcsDrainer, SpotFleetRequest, SqsQueuePoller,
};
use ecsmec::service::{ServiceDefinition, ServiceRecreator};
use ecsmec::{limits, Error, Result};

#[derive(Parser, Debug)]
#[command(
    name = "ecsmec",
    version,
    about = "A CLI tool for Amazon ECS that provides some commands to execute bothersome operations"
)]
struct Cli {
    /// An AWS profile name in your credential file
    #[arg(long, global = true)]
    profile: Option<String>,

    /// The AWS region
    #[arg(long, global = true)]
    region: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Recreate a service with overrides
    ///
    /// Creates a new service from the specified service with overrides, and
    /// deletes the old one after the new one becomes stable. Make sure the
    /// cluster has enough spare capacity for the new service's tasks.
    RecreateService {
        /// The name of the target cluster
        #[arg(long, default_value = "default")]
        cluster: String,

        /// The name of the target service
        #[arg(long)]
        service: String,

        /// A JSON object overriding fields of the new service
        #[arg(long, default_value = "{}")]
        overrides: String,
    },

    /// Reduce the cluster capacity safely
    ///
    /// Shrinks the capacity backing the cluster, draining the instances that
    /// go away. Exactly one of the two fleet selectors must be given.
    ReduceClusterCapacity {
        /// The name of the target cluster
        #[arg(long, default_value = "default")]
        cluster: String,

        /// The name of the target auto scaling group
        #[arg(long)]
        auto_scaling_group_name: Option<String>,

        /// The ID of the target spot fleet request
        #[arg(long)]
        spot_fleet_request_id: Option<String>,

        /// The amount of capacity to reduce
        #[arg(long)]
        amount: i32,
    },

    /// Replace container instances
    ///
    /// Replaces every container instance of the auto scaling group that was
    /// launched before this command launched its replacements.
    ReplaceAutoScalingGroupInstances {
        /// The name of the target auto scaling group
        #[arg(long)]
        auto_scaling_group_name: String,

        /// The name of the target cluster
        #[arg(long, default_value = "default")]
        cluster: String,

        /// The number of instances drained at once
        #[arg(long, default_value_t = limits::MAX_LISTABLE_CONTAINER_INSTANCES)]
        batch_size: i32,
    },

    /// Terminate spot fleet instances
    ///
    /// Safely terminates all the container instances that belong to the
    /// specified spot fleet request.
    TerminateSpotFleetInstances {
        /// The ID of the target spot fleet request
        #[arg(long)]
        spot_fleet_request_id: String,

        /// The name of the target cluster
        #[arg(long, default_value = "default")]
        cluster: String,

        /// The number of instances drained at once
        #[arg(long, default_value_t = limits::MAX_LISTABLE_CONTAINER_INSTANCES)]
        batch_size: i32,
    },
}

/// Which kind of compute fleet a capacity reduction targets
enum FleetSelector {
    AutoScalingGroup(String),
    SpotFleetRequest(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::RecreateService {
            cluster,
            service,
            overrides,
        } => {
            let overrides: ServiceDefinition = serde_json::from_str(&overrides)
                .map_err(|e| Error::validation(format!("failed to parse \"overrides\": {e}")))?;

            let config = aws::load_config(cli.profile.as_deref(), cli.region.as_deref()).await;
            ServiceRecreator::new(EcsClient::new(&config))
                .recreate(&cluster, &service, overrides)
                .await
        }

        Commands::ReduceClusterCapacity {
            cluster,
            auto_scaling_group_name,
            spot_fleet_request_id,
            amount,
        } => {
            if amount <= 0 {
                return Err(Error::validation("\"amount\" must be greater than 0"));
            }
            let selector = match (auto_scaling_group_name, spot_fleet_request_id) {
                (Some(group_name), None) => FleetSelector::AutoScalingGroup(group_name),
                (None, Some(request_id)) => FleetSelector::SpotFleetRequest(request_id),
                _ => {
                    return Err(Error::validation(
                        "exactly one of \"auto-scaling-group-name\" and \"spot-fleet-request-id\" is required",
                    ))
                }
            };

            let config = aws::load_config(cli.profile.as_deref(), cli.region.as_deref()).await;
            match selector {
                FleetSelector::AutoScalingGroup(group_name) => {
                    let drainer = EcsDrainer::new(
                        &cluster,
                        limits::MAX_LISTABLE_CONTAINER_INSTANCES,
                        EcsClient::new(&config),
                    )?;
                    let mut group = AutoScalingGroup::new(
                        group_name,
                        AutoScalingClient::new(&config),
                        Ec2Client::new(&config),
                    )
                    .await?;
                    group.reduce_capacity(amount, &drainer).await
                }
                FleetSelector::SpotFleetRequest(request_id) => {
                    reduce_spot_fleet_capacity(&config, &cluster, &request_id, amount).await
                }
            }
        }

        Commands::ReplaceAutoScalingGroupInstances {
            auto_scaling_group_name,
            cluster,
            batch_size,
        } => {
            let config = aws::load_config(cli.profile.as_deref(), cli.region.as_deref()).await;
            let ecs = EcsClient::new(&config);
            let drainer = EcsDrainer::new(&cluster, batch_size, EcsClient::new(&config))?;
            let mut group = AutoScalingGroup::new(
                auto_scaling_group_name,
                AutoScalingClient::new(&config),
                Ec2Client::new(&config),
            )
            .await?;
            group
                .replace_instances(&drainer, &EcsCluster::new(&cluster, ecs))
                .await
        }

        Commands::TerminateSpotFleetInstances {
            spot_fleet_request_id,
            cluster,
            batch_size,
        } => {
            let config = aws::load_config(cli.profile.as_deref(), cli.region.as_deref()).await;
            let request = SpotFleetRequest::new(spot_fleet_request_id, Ec2Client::new(&config))
                .await?;
            let drainer = EcsDrainer::new(&cluster, batch_size, EcsClient::new(&config))?;
            request.terminate_all_instances(&drainer).await
        }
    }
}

/// Spot fleet reduction needs the interruption warning sink around it: the
/// queue and forwarding rule exist only for the duration of the operation.
async fn reduce_spot_fleet_capacity(
    config: &aws_config::SdkConfig,
    cluster: &str,
    request_id: &str,
    amount: i32,
) -> Result<()> {
    let request = SpotFleetRequest::new(request_id, Ec2Client::new(config)).await?;
    let drainer = Arc::new(EcsDrainer::new(
        cluster,
        limits::MAX_LISTABLE_CONTAINER_INSTANCES,
        EcsClient::new(config),
    )?);

    let sqs = aws_sdk_sqs::Client::new(config);
    let events = aws_sdk_eventbridge::Client::new(config);
    let queue_url = interruptions::provision(&sqs, &events).await?;

    let poller = Arc::new(SqsQueuePoller::new(&queue_url, SqsClient::new(config)));
    let result = request.reduce_capacity(amount, drainer, poller).await;

    // The sink is removed even if the reduction failed; a follow-up run
    // recreates it.
    if let Err(err) = interruptions::teardown(&sqs, &events, &queue_url).await {
        warn!(error = %err, "Failed to remove the interruption warning sink");
    }

    result
}
