//! Auto scaling group controller
//!
//! Replacement works launch-first: new instances are brought up and registered
//! before any old instance is drained, and the pre-mutation capacity values
//! are persisted as tags on the group so an interrupted run can resume from
//! any point.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;

use crate::api::types::{Ec2Instance, GroupDetails, GroupTag};
use crate::api::{AutoScalingApi, Ec2Api};
use crate::capacity::{Cluster, Drainer};
use crate::limits;
use crate::waiters;
use crate::{Error, Result};

const TAG_ORIGINAL_DESIRED_CAPACITY: &str = "ecsmec:OriginalDesiredCapacity";
const TAG_ORIGINAL_MAX_SIZE: &str = "ecsmec:OriginalMaxSize";
const TAG_STATE_SAVED_AT: &str = "ecsmec:StateSavedAt";

/// The pre-mutation capacity values persisted as tags on the group.
///
/// Writing these tags is the idempotence boundary of a replacement: once they
/// exist, every later step can be re-derived from them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SavedGroupState {
    original_desired_capacity: i32,
    original_max_size: i32,
    saved_at: DateTime<Utc>,
}

impl SavedGroupState {
    /// Parse the persisted state from the group's tags.
    ///
    /// All three tags must be present and parseable together; a partial or
    /// malformed set means a previous run left the group in a shape this tool
    /// no longer understands, which is not safe to act on.
    fn from_tags(tags: &[GroupTag]) -> Result<Option<Self>> {
        let mut values: HashMap<&str, &str> = HashMap::new();
        for tag in tags {
            match tag.key.as_str() {
                TAG_ORIGINAL_DESIRED_CAPACITY | TAG_ORIGINAL_MAX_SIZE | TAG_STATE_SAVED_AT => {
                    values.insert(&tag.key, &tag.value);
                }
                _ => {}
            }
        }
        if values.is_empty() {
            return Ok(None);
        }

        let require = |key: &str| {
            values.get(key).copied().ok_or_else(|| {
                Error::corrupt_state(format!("{key} is missing while other state tags exist"))
            })
        };
        let parse_capacity = |key: &str| -> Result<i32> {
            let value = require(key)?;
            value
                .parse()
                .map_err(|_| Error::corrupt_state(format!("{key} is invalid ({value})")))
        };

        let saved_at_value = require(TAG_STATE_SAVED_AT)?;
        let saved_at = DateTime::parse_from_rfc3339(saved_at_value)
            .map_err(|_| {
                Error::corrupt_state(format!(
                    "{TAG_STATE_SAVED_AT} is invalid ({saved_at_value})"
                ))
            })?
            .with_timezone(&Utc);

        Ok(Some(Self {
            original_desired_capacity: parse_capacity(TAG_ORIGINAL_DESIRED_CAPACITY)?,
            original_max_size: parse_capacity(TAG_ORIGINAL_MAX_SIZE)?,
            saved_at,
        }))
    }

    fn to_tags(self) -> [GroupTag; 3] {
        [
            GroupTag::new(
                TAG_ORIGINAL_DESIRED_CAPACITY,
                self.original_desired_capacity.to_string(),
            ),
            GroupTag::new(TAG_ORIGINAL_MAX_SIZE, self.original_max_size.to_string()),
            GroupTag::new(
                TAG_STATE_SAVED_AT,
                self.saved_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        ]
    }
}

/// Controller for one auto scaling group
///
/// Owns a snapshot of the group for the duration of one operation and reloads
/// it after every mutation.
pub struct AutoScalingGroup<A, E> {
    name: String,
    details: GroupDetails,
    state: Option<SavedGroupState>,
    autoscaling: A,
    ec2: E,
}

impl<A: AutoScalingApi, E: Ec2Api> AutoScalingGroup<A, E> {
    /// Load the named group, including any persisted replacement state
    pub async fn new(name: impl Into<String>, autoscaling: A, ec2: E) -> Result<Self> {
        let name = name.into();
        let (details, state) = Self::load(&name, &autoscaling).await?;
        Ok(Self {
            name,
            details,
            state,
            autoscaling,
            ec2,
        })
    }

    /// The desired capacity before the replacement started
    pub fn original_desired_capacity(&self) -> i32 {
        self.state
            .map_or(self.details.desired_capacity, |s| {
                s.original_desired_capacity
            })
    }

    /// The maximum size before the replacement started
    pub fn original_max_size(&self) -> i32 {
        self.state.map_or(self.details.max_size, |s| s.original_max_size)
    }

    /// When the persisted state was written, if a replacement is in progress
    pub fn state_saved_at(&self) -> Option<DateTime<Utc>> {
        self.state.map(|s| s.saved_at)
    }

    /// The current snapshot of the group
    pub fn details(&self) -> &GroupDetails {
        &self.details
    }

    /// Replace every instance launched before the operation started (or, when
    /// resuming, before the persisted state was saved) with fresh capacity.
    ///
    /// Launch first, then wait for cluster registration, then drain and
    /// terminate the old instances, then restore the original capacity
    /// settings and clear the persisted state.
    pub async fn replace_instances(
        &mut self,
        drainer: &dyn Drainer,
        cluster: &dyn Cluster,
    ) -> Result<()> {
        let base_time = self.state_saved_at().unwrap_or_else(Utc::now);

        let old_instance_count = self
            .fetch_instances()
            .await?
            .iter()
            .filter(|instance| instance.launch_time < base_time)
            .count();

        self.launch_new_instances(old_instance_count).await?;

        // Re-derived after the launch so a resumed run counts instances that
        // an earlier invocation already brought up.
        let new_instance_count = self.details.desired_capacity - self.original_desired_capacity();

        info!(cluster = cluster.name(), "Wait for all the new instances to be registered in the cluster");
        cluster
            .wait_until_container_instances_registered(
                new_instance_count.max(0) as usize,
                self.state_saved_at().unwrap_or(base_time),
            )
            .await?;

        self.terminate_instances(new_instance_count, drainer).await?;
        self.restore_state().await
    }

    /// Shrink the group by `amount` instances, oldest first and zone balanced
    pub async fn reduce_capacity(&mut self, amount: i32, drainer: &dyn Drainer) -> Result<()> {
        self.terminate_instances(amount, drainer).await
    }

    async fn load(name: &str, autoscaling: &A) -> Result<(GroupDetails, Option<SavedGroupState>)> {
        let details = autoscaling
            .describe_auto_scaling_group(name)
            .await?
            .ok_or_else(|| {
                Error::validation(format!("the auto scaling group \"{name}\" doesn't exist"))
            })?;
        let state = SavedGroupState::from_tags(&details.tags)?;
        Ok((details, state))
    }

    async fn reload(&mut self) -> Result<()> {
        let (details, state) = Self::load(&self.name, &self.autoscaling).await?;
        self.details = details;
        self.state = state;
        Ok(())
    }

    async fn fetch_instances(&self) -> Result<Vec<Ec2Instance>> {
        let ids: Vec<String> = self
            .details
            .instances
            .iter()
            .map(|instance| instance.instance_id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.ec2.describe_instances(&ids).await
    }

    /// Scale the group up by enough capacity to replace `old_instance_count`
    /// instances, persisting the pre-mutation state first.
    async fn launch_new_instances(&mut self, old_instance_count: usize) -> Result<()> {
        if old_instance_count == 0 {
            return Ok(());
        }

        let mut required = old_instance_count as i32;
        let zones = self.details.availability_zones.len() as i32;
        if zones > 2 && self.original_desired_capacity() % zones > 0 {
            // With more than two zones the new desired capacity has to be a
            // multiple of the zone count. Example with zones a/c/d populated
            // 2/1/2: doubling to 10 puts the new instances at 1/3/1, and once
            // the old ones are gone AZRebalance evens out the 1/3/1 split by
            // terminating an instance in c without draining it. Rounding the
            // launch up avoids handing the rebalancer that opportunity.
            required += zones - self.original_desired_capacity() % zones;
        }

        waiters::wait_until_group_in_service(
            &self.autoscaling,
            &self.name,
            self.details.desired_capacity,
        )
        .await?;

        let new_desired_capacity = self.original_desired_capacity() + required;
        if new_desired_capacity <= self.details.desired_capacity {
            // A previous invocation already launched the replacements.
            return Ok(());
        }
        let new_max_size = self.details.max_size.max(new_desired_capacity);

        self.save_current_state().await?;

        info!(
            group = %self.name,
            desired_capacity = new_desired_capacity,
            max_size = new_max_size,
            "Update the auto scaling group"
        );
        self.autoscaling
            .update_auto_scaling_group(&self.name, Some(new_desired_capacity), Some(new_max_size))
            .await?;

        waiters::wait_until_group_in_service(&self.autoscaling, &self.name, new_desired_capacity)
            .await?;

        self.reload().await
    }

    async fn save_current_state(&self) -> Result<()> {
        let state = self.state.unwrap_or(SavedGroupState {
            original_desired_capacity: self.details.desired_capacity,
            original_max_size: self.details.max_size,
            saved_at: Utc::now(),
        });
        self.autoscaling
            .create_or_update_tags(&self.name, &state.to_tags())
            .await
    }

    /// Drain, detach, and terminate the `count` instances chosen by
    /// [`Self::select_instance_ids`].
    async fn terminate_instances(&mut self, count: i32, drainer: &dyn Drainer) -> Result<()> {
        if count <= 0 {
            return Ok(());
        }

        let instance_ids = self.select_instance_ids(count as usize).await?;

        drainer.drain(&instance_ids).await?;

        for chunk in instance_ids.chunks(limits::MAX_DETACHABLE_INSTANCES) {
            info!(instance_ids = ?chunk, "Detach instances");
            self.autoscaling
                .detach_instances(&self.name, chunk, true)
                .await?;
        }

        info!(instance_ids = ?instance_ids, "Terminate instances");
        self.ec2.terminate_instances(&instance_ids).await?;
        waiters::wait_until_instances_terminated(&self.ec2, &instance_ids).await?;

        self.reload().await
    }

    /// Choose `count` instances to retire: oldest first, round-robin across
    /// availability zones ordered by population and then by old-instance
    /// count, both descending.
    ///
    /// Taking evenly from the fullest zones keeps the group balanced as it
    /// shrinks, so AZRebalance has no reason to terminate an instance of its
    /// own choosing, undrained.
    async fn select_instance_ids(&self, count: usize) -> Result<Vec<String>> {
        let mut instances = self.fetch_instances().await?;
        instances.sort_by_key(|instance| instance.launch_time);

        let mut zones: Vec<String> = Vec::new();
        let mut instances_by_zone: HashMap<String, Vec<Ec2Instance>> = HashMap::new();
        let mut old_count_by_zone: HashMap<String, usize> = HashMap::new();
        for instance in instances {
            let zone = instance.availability_zone.clone();
            if !zones.contains(&zone) {
                zones.push(zone.clone());
            }
            if let Some(saved_at) = self.state_saved_at() {
                if instance.launch_time < saved_at {
                    *old_count_by_zone.entry(zone.clone()).or_default() += 1;
                }
            }
            instances_by_zone.entry(zone).or_default().push(instance);
        }

        zones.sort_by(|a, b| {
            let population = instances_by_zone[b].len().cmp(&instances_by_zone[a].len());
            population.then_with(|| {
                let old_a = old_count_by_zone.get(a).copied().unwrap_or(0);
                let old_b = old_count_by_zone.get(b).copied().unwrap_or(0);
                old_b.cmp(&old_a)
            })
        });

        let mut queues: HashMap<&str, std::collections::VecDeque<Ec2Instance>> = instances_by_zone
            .iter()
            .map(|(zone, instances)| (zone.as_str(), instances.iter().cloned().collect()))
            .collect();

        let mut selected = Vec::with_capacity(count);
        loop {
            let mut popped = false;
            for zone in &zones {
                if selected.len() == count {
                    return Ok(selected);
                }
                if let Some(instance) =
                    queues.get_mut(zone.as_str()).and_then(|q| q.pop_front())
                {
                    selected.push(instance.instance_id);
                    popped = true;
                }
            }
            if !popped {
                return Ok(selected);
            }
        }
    }

    /// Bring the group's settings back to their persisted originals and clear
    /// the state tags.
    async fn restore_state(&mut self) -> Result<()> {
        let original = self.original_desired_capacity();
        if self.details.desired_capacity != original {
            return Err(Error::DesiredInvariantViolated {
                expected: original,
                actual: self.details.desired_capacity,
            });
        }

        info!(
            group = %self.name,
            max_size = self.original_max_size(),
            "Update the auto scaling group"
        );
        self.autoscaling
            .update_auto_scaling_group(&self.name, None, Some(self.original_max_size()))
            .await?;

        if let Some(state) = self.state {
            self.autoscaling
                .delete_tags(&self.name, &state.to_tags())
                .await?;
        }

        self.reload().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::GroupInstance;
    use crate::api::{MockAutoScalingApi, MockEc2Api};
    use crate::capacity::{MockCluster, MockDrainer};
    use chrono::Duration as ChronoDuration;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const GROUP_NAME: &str = "autoscaling-group-name";

    static INSTANCE_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn create_instance(zone: &str, launch_time: DateTime<Utc>) -> Ec2Instance {
        let n = INSTANCE_COUNTER.fetch_add(1, Ordering::SeqCst);
        Ec2Instance {
            instance_id: format!("i-{n:017}"),
            launch_time,
            availability_zone: zone.to_string(),
            state: "running".to_string(),
        }
    }

    fn create_instances(zone: &str, count: usize, launch_time: DateTime<Utc>) -> Vec<Ec2Instance> {
        (0..count).map(|_| create_instance(zone, launch_time)).collect()
    }

    fn group_instances(instances: &[Ec2Instance]) -> Vec<GroupInstance> {
        instances
            .iter()
            .map(|instance| GroupInstance {
                instance_id: instance.instance_id.clone(),
                lifecycle_state: "InService".to_string(),
            })
            .collect()
    }

    fn instance_ids(instances: &[Ec2Instance]) -> Vec<String> {
        instances.iter().map(|i| i.instance_id.clone()).collect()
    }

    fn terminated(instances: &[Ec2Instance]) -> Vec<Ec2Instance> {
        instances
            .iter()
            .map(|instance| Ec2Instance {
                state: "terminated".to_string(),
                ..instance.clone()
            })
            .collect()
    }

    fn state_tags(desired_capacity: i32, max_size: i32, saved_at: &str) -> Vec<GroupTag> {
        vec![
            GroupTag::new(TAG_ORIGINAL_DESIRED_CAPACITY, desired_capacity.to_string()),
            GroupTag::new(TAG_ORIGINAL_MAX_SIZE, max_size.to_string()),
            GroupTag::new(TAG_STATE_SAVED_AT, saved_at),
        ]
    }

    fn details(
        desired_capacity: i32,
        max_size: i32,
        zones: &[&str],
        instances: Vec<GroupInstance>,
        tags: Vec<GroupTag>,
    ) -> GroupDetails {
        GroupDetails {
            name: GROUP_NAME.to_string(),
            desired_capacity,
            max_size,
            availability_zones: zones.iter().map(|z| z.to_string()).collect(),
            instances,
            tags,
        }
    }

    fn expect_describe_group(
        autoscaling: &mut MockAutoScalingApi,
        seq: &mut Sequence,
        times: usize,
        details: GroupDetails,
    ) {
        autoscaling
            .expect_describe_auto_scaling_group()
            .times(times)
            .in_sequence(seq)
            .returning(move |_| Ok(Some(details.clone())));
    }

    #[tokio::test]
    async fn construction_without_state_tags_uses_current_values() {
        let mut autoscaling = MockAutoScalingApi::new();
        autoscaling
            .expect_describe_auto_scaling_group()
            .times(1)
            .returning(|_| Ok(Some(details(5, 10, &["ap-northeast-1a"], vec![], vec![]))));

        let group = AutoScalingGroup::new(GROUP_NAME, autoscaling, MockEc2Api::new())
            .await
            .expect("the group exists");
        assert_eq!(group.original_desired_capacity(), 5);
        assert_eq!(group.original_max_size(), 10);
        assert!(group.state_saved_at().is_none());
    }

    #[tokio::test]
    async fn construction_parses_persisted_state_tags() {
        let mut autoscaling = MockAutoScalingApi::new();
        autoscaling
            .expect_describe_auto_scaling_group()
            .times(1)
            .returning(|_| {
                Ok(Some(details(
                    10,
                    10,
                    &["ap-northeast-1a"],
                    vec![],
                    state_tags(5, 8, "2024-01-02T03:04:05Z"),
                )))
            });

        let group = AutoScalingGroup::new(GROUP_NAME, autoscaling, MockEc2Api::new())
            .await
            .expect("the group exists");
        assert_eq!(group.original_desired_capacity(), 5);
        assert_eq!(group.original_max_size(), 8);
        assert_eq!(
            group.state_saved_at(),
            Some("2024-01-02T03:04:05Z".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn construction_rejects_partial_state_tags() {
        let mut autoscaling = MockAutoScalingApi::new();
        autoscaling
            .expect_describe_auto_scaling_group()
            .times(1)
            .returning(|_| {
                Ok(Some(details(
                    10,
                    10,
                    &["ap-northeast-1a"],
                    vec![],
                    vec![GroupTag::new(TAG_ORIGINAL_DESIRED_CAPACITY, "5")],
                )))
            });

        let err = AutoScalingGroup::new(GROUP_NAME, autoscaling, MockEc2Api::new())
            .await
            .err()
            .expect("two of the three tags are missing");
        assert!(matches!(err, Error::CorruptState(_)));
    }

    #[tokio::test]
    async fn construction_rejects_malformed_state_tags() {
        let mut autoscaling = MockAutoScalingApi::new();
        autoscaling
            .expect_describe_auto_scaling_group()
            .times(1)
            .returning(|_| {
                Ok(Some(details(
                    10,
                    10,
                    &["ap-northeast-1a"],
                    vec![],
                    state_tags(5, 8, "not-a-timestamp"),
                )))
            });

        let err = AutoScalingGroup::new(GROUP_NAME, autoscaling, MockEc2Api::new())
            .await
            .err()
            .expect("the timestamp doesn't parse");
        assert!(matches!(err, Error::CorruptState(_)));
    }

    #[tokio::test]
    async fn construction_fails_for_a_missing_group() {
        let mut autoscaling = MockAutoScalingApi::new();
        autoscaling
            .expect_describe_auto_scaling_group()
            .times(1)
            .returning(|_| Ok(None));

        let err = AutoScalingGroup::new(GROUP_NAME, autoscaling, MockEc2Api::new())
            .await
            .err()
            .expect("the group doesn't exist");
        assert!(matches!(err, Error::Validation(_)));
    }

    /// The full replacement walk for a two-zone group whose desired capacity
    /// is a multiple of the zone count: persist state, double the capacity,
    /// drain and retire the six old instances zone by zone, then restore.
    #[tokio::test]
    async fn replace_instances_with_balanced_zones() {
        let now = Utc::now();
        let old: Vec<Ec2Instance> = [
            create_instances("ap-northeast-1a", 3, now - ChronoDuration::hours(24)),
            create_instances("ap-northeast-1c", 3, now - ChronoDuration::hours(24)),
        ]
        .concat();
        let new: Vec<Ec2Instance> = [
            create_instances("ap-northeast-1a", 3, now),
            create_instances("ap-northeast-1c", 3, now),
        ]
        .concat();
        let all: Vec<Ec2Instance> = [old.clone(), new.clone()].concat();
        let zones = ["ap-northeast-1a", "ap-northeast-1c"];
        let saved_at = now.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut autoscaling = MockAutoScalingApi::new();
        let mut ec2 = MockEc2Api::new();
        let mut drainer = MockDrainer::new();
        let mut cluster = MockCluster::new();
        let mut seq = Sequence::new();

        // Construction snapshot: 6 old instances, no tags.
        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(6, 8, &zones, group_instances(&old), vec![]),
        );

        // Old-instance selection.
        let described_old = old.clone();
        ec2.expect_describe_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(described_old.clone()));

        // The in-service wait before any mutation.
        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(6, 8, &zones, group_instances(&old), vec![]),
        );

        // State tags are written with the pre-mutation values.
        autoscaling
            .expect_create_or_update_tags()
            .times(1)
            .in_sequence(&mut seq)
            .withf(move |name, tags| {
                name == GROUP_NAME
                    && tags.len() == 3
                    && tags.iter().any(|t| {
                        t.key == TAG_ORIGINAL_DESIRED_CAPACITY && t.value == "6"
                    })
                    && tags.iter().any(|t| t.key == TAG_ORIGINAL_MAX_SIZE && t.value == "8")
                    && tags.iter().any(|t| t.key == TAG_STATE_SAVED_AT)
            })
            .returning(|_, _| Ok(()));

        // Scale up to 12; the max size has to follow.
        autoscaling
            .expect_update_auto_scaling_group()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|_, desired, max| *desired == Some(12) && *max == Some(12))
            .returning(|_, _, _| Ok(()));

        // In-service wait for the new capacity, then the reload.
        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            2,
            details(
                12,
                12,
                &zones,
                group_instances(&all),
                state_tags(6, 8, &saved_at),
            ),
        );

        // Registration of the six new instances.
        cluster.expect_name().return_const("default".to_string());
        cluster
            .expect_wait_until_container_instances_registered()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|count, _| *count == 6)
            .returning(|_, _| Ok(()));

        // Selection for termination sees all twelve instances.
        let described_all = all.clone();
        ec2.expect_describe_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(described_all.clone()));

        // The six old instances drain, zone-alternating, oldest first.
        let drained = Arc::new(Mutex::new(Vec::new()));
        let drained_capture = drained.clone();
        drainer
            .expect_drain()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |ids| {
                drained_capture.lock().unwrap().extend(ids.to_vec());
                Ok(())
            });

        // One detach batch (6 <= 20), decrementing the desired capacity.
        let old_ids = instance_ids(&old);
        let detached_ids = old_ids.clone();
        autoscaling
            .expect_detach_instances()
            .times(1)
            .in_sequence(&mut seq)
            .withf(move |_, ids, decrement| {
                let mut got = ids.to_vec();
                let mut want = detached_ids.clone();
                got.sort();
                want.sort();
                got == want && *decrement
            })
            .returning(|_, _, _| Ok(()));

        let terminated_ids = old_ids.clone();
        ec2.expect_terminate_instances()
            .times(1)
            .in_sequence(&mut seq)
            .withf(move |ids| {
                let mut got = ids.to_vec();
                let mut want = terminated_ids.clone();
                got.sort();
                want.sort();
                got == want
            })
            .returning(|_| Ok(()));

        // The terminated waiter.
        let gone = terminated(&old);
        ec2.expect_describe_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(gone.clone()));

        // Reload after termination: back at the original desired capacity.
        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(
                6,
                12,
                &zones,
                group_instances(&new),
                state_tags(6, 8, &saved_at),
            ),
        );

        // Restore: max size only, then the tags go away.
        autoscaling
            .expect_update_auto_scaling_group()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|_, desired, max| desired.is_none() && *max == Some(8))
            .returning(|_, _, _| Ok(()));
        autoscaling
            .expect_delete_tags()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|_, tags| tags.len() == 3)
            .returning(|_, _| Ok(()));
        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(6, 8, &zones, group_instances(&new), vec![]),
        );

        let mut group = AutoScalingGroup::new(GROUP_NAME, autoscaling, ec2)
            .await
            .expect("the group exists");
        group
            .replace_instances(&drainer, &cluster)
            .await
            .expect("the replacement completes");

        // Zone-balanced drain order: the zones alternate and every old
        // instance is covered.
        let drained = drained.lock().unwrap().clone();
        let mut sorted = drained.clone();
        sorted.sort();
        let mut want = old_ids.clone();
        want.sort();
        assert_eq!(sorted, want);
        let drained_zones: Vec<&str> = drained
            .iter()
            .map(|id| {
                old.iter()
                    .find(|i| &i.instance_id == id)
                    .map(|i| i.availability_zone.as_str())
                    .expect("only old instances drain")
            })
            .collect();
        for pair in drained_zones.chunks(2) {
            assert_ne!(pair[0], pair[1], "consecutive drains alternate zones");
        }
    }

    /// Three zones with desired capacity 5: the launch is rounded up to a
    /// multiple of the zone count, and the surplus new instance (the oldest
    /// new one) is retired along with the five old ones.
    #[tokio::test]
    async fn replace_instances_rounds_up_for_three_zones() {
        let now = Utc::now();
        let old: Vec<Ec2Instance> = [
            create_instances("ap-northeast-1a", 2, now - ChronoDuration::hours(24)),
            create_instances("ap-northeast-1c", 1, now - ChronoDuration::hours(24)),
            create_instances("ap-northeast-1d", 2, now - ChronoDuration::hours(24)),
        ]
        .concat();
        let kept: Vec<Ec2Instance> = [
            create_instances("ap-northeast-1a", 2, now),
            create_instances("ap-northeast-1c", 2, now),
            create_instances("ap-northeast-1d", 1, now),
        ]
        .concat();
        let surplus = create_instance("ap-northeast-1c", now - ChronoDuration::seconds(1));
        let new: Vec<Ec2Instance> = [kept.clone(), vec![surplus.clone()]].concat();
        let to_terminate: Vec<Ec2Instance> = [old.clone(), vec![surplus.clone()]].concat();
        let all: Vec<Ec2Instance> = [old.clone(), new.clone()].concat();
        let zones = ["ap-northeast-1a", "ap-northeast-1c", "ap-northeast-1d"];
        let saved_at = now.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut autoscaling = MockAutoScalingApi::new();
        let mut ec2 = MockEc2Api::new();
        let mut drainer = MockDrainer::new();
        let mut cluster = MockCluster::new();
        let mut seq = Sequence::new();

        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(5, 8, &zones, group_instances(&old), vec![]),
        );

        let described_old = old.clone();
        ec2.expect_describe_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(described_old.clone()));

        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(5, 8, &zones, group_instances(&old), vec![]),
        );

        autoscaling
            .expect_create_or_update_tags()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        // 5 old + (3 - 5 % 3) = 6 new, so the target is 11 and the max size
        // follows.
        autoscaling
            .expect_update_auto_scaling_group()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|_, desired, max| *desired == Some(11) && *max == Some(11))
            .returning(|_, _, _| Ok(()));

        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            2,
            details(
                11,
                11,
                &zones,
                group_instances(&all),
                state_tags(5, 8, &saved_at),
            ),
        );

        cluster.expect_name().return_const("default".to_string());
        cluster
            .expect_wait_until_container_instances_registered()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|count, _| *count == 6)
            .returning(|_, _| Ok(()));

        let described_all = all.clone();
        ec2.expect_describe_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(described_all.clone()));

        // The five old instances and the surplus new one drain.
        let expected_drained = instance_ids(&to_terminate);
        drainer
            .expect_drain()
            .times(1)
            .in_sequence(&mut seq)
            .withf(move |ids| {
                let mut got = ids.to_vec();
                let mut want = expected_drained.clone();
                got.sort();
                want.sort();
                got == want
            })
            .returning(|_| Ok(()));

        autoscaling
            .expect_detach_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        ec2.expect_terminate_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let gone = terminated(&to_terminate);
        ec2.expect_describe_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(gone.clone()));

        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(
                5,
                11,
                &zones,
                group_instances(&kept),
                state_tags(5, 8, &saved_at),
            ),
        );

        autoscaling
            .expect_update_auto_scaling_group()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|_, desired, max| desired.is_none() && *max == Some(8))
            .returning(|_, _, _| Ok(()));
        autoscaling
            .expect_delete_tags()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(5, 8, &zones, group_instances(&kept), vec![]),
        );

        let mut group = AutoScalingGroup::new(GROUP_NAME, autoscaling, ec2)
            .await
            .expect("the group exists");
        group
            .replace_instances(&drainer, &cluster)
            .await
            .expect("the replacement completes");
    }

    /// Resume with the tags still present and the desired capacity already
    /// back at the original: only the restore tail runs.
    #[tokio::test]
    async fn replace_instances_resumes_after_termination() {
        let now = Utc::now();
        let saved_at_time = now - ChronoDuration::hours(1);
        let saved_at = saved_at_time.to_rfc3339_opts(SecondsFormat::Secs, true);
        let instances: Vec<Ec2Instance> = [
            create_instances("ap-northeast-1a", 3, now),
            create_instances("ap-northeast-1c", 3, now),
        ]
        .concat();
        let zones = ["ap-northeast-1a", "ap-northeast-1c"];

        let mut autoscaling = MockAutoScalingApi::new();
        let mut ec2 = MockEc2Api::new();
        let drainer = MockDrainer::new();
        let mut cluster = MockCluster::new();
        let mut seq = Sequence::new();

        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(
                6,
                8,
                &zones,
                group_instances(&instances),
                state_tags(6, 8, &saved_at),
            ),
        );

        let described = instances.clone();
        ec2.expect_describe_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(described.clone()));

        // Everything is newer than the saved state, so no launch and no
        // termination; the registration wait sees a zero count.
        cluster.expect_name().return_const("default".to_string());
        cluster
            .expect_wait_until_container_instances_registered()
            .withf(|count, _| *count == 0)
            .returning(|_, _| Ok(()));

        autoscaling
            .expect_update_auto_scaling_group()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|_, desired, max| desired.is_none() && *max == Some(8))
            .returning(|_, _, _| Ok(()));
        autoscaling
            .expect_delete_tags()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(6, 8, &zones, group_instances(&instances), vec![]),
        );

        let mut group = AutoScalingGroup::new(GROUP_NAME, autoscaling, ec2)
            .await
            .expect("the group exists");
        group
            .replace_instances(&drainer, &cluster)
            .await
            .expect("only the restore tail runs");
    }

    /// Resume after the launch already happened: the launch step notices the
    /// capacity is already doubled and skips straight to termination.
    #[tokio::test]
    async fn replace_instances_resumes_after_launch() {
        let now = Utc::now();
        let saved_at = (now - ChronoDuration::hours(1)).to_rfc3339_opts(SecondsFormat::Secs, true);
        let saved_at_time: DateTime<Utc> = saved_at.parse().unwrap();
        let old: Vec<Ec2Instance> = [
            create_instances("ap-northeast-1a", 3, now - ChronoDuration::hours(24)),
            create_instances("ap-northeast-1c", 3, now - ChronoDuration::hours(24)),
        ]
        .concat();
        let new: Vec<Ec2Instance> = [
            create_instances("ap-northeast-1a", 3, now),
            create_instances("ap-northeast-1c", 3, now),
        ]
        .concat();
        let all: Vec<Ec2Instance> = [old.clone(), new.clone()].concat();
        let zones = ["ap-northeast-1a", "ap-northeast-1c"];

        let mut autoscaling = MockAutoScalingApi::new();
        let mut ec2 = MockEc2Api::new();
        let mut drainer = MockDrainer::new();
        let mut cluster = MockCluster::new();
        let mut seq = Sequence::new();

        // Construction and the in-service wait both see the scaled-up group.
        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(
                12,
                12,
                &zones,
                group_instances(&all),
                state_tags(6, 8, &saved_at),
            ),
        );

        let described_old = all.clone();
        ec2.expect_describe_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(described_old.clone()));

        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(
                12,
                12,
                &zones,
                group_instances(&all),
                state_tags(6, 8, &saved_at),
            ),
        );

        // No tag write, no scale-up: the capacity is already in place.
        cluster.expect_name().return_const("default".to_string());
        cluster
            .expect_wait_until_container_instances_registered()
            .times(1)
            .in_sequence(&mut seq)
            .withf(move |count, registered_after| {
                *count == 6 && *registered_after == saved_at_time
            })
            .returning(|_, _| Ok(()));

        let described_all = all.clone();
        ec2.expect_describe_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(described_all.clone()));

        let expected_drained = instance_ids(&old);
        drainer
            .expect_drain()
            .times(1)
            .in_sequence(&mut seq)
            .withf(move |ids| {
                let mut got = ids.to_vec();
                let mut want = expected_drained.clone();
                got.sort();
                want.sort();
                got == want
            })
            .returning(|_| Ok(()));

        autoscaling
            .expect_detach_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        ec2.expect_terminate_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let gone = terminated(&old);
        ec2.expect_describe_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(gone.clone()));

        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(
                6,
                12,
                &zones,
                group_instances(&new),
                state_tags(6, 8, &saved_at),
            ),
        );

        autoscaling
            .expect_update_auto_scaling_group()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|_, desired, max| desired.is_none() && *max == Some(8))
            .returning(|_, _, _| Ok(()));
        autoscaling
            .expect_delete_tags()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(6, 8, &zones, group_instances(&new), vec![]),
        );

        let mut group = AutoScalingGroup::new(GROUP_NAME, autoscaling, ec2)
            .await
            .expect("the group exists");
        group
            .replace_instances(&drainer, &cluster)
            .await
            .expect("the resumed replacement completes");
    }

    #[tokio::test]
    async fn restore_fails_when_the_desired_capacity_drifted() {
        let now = Utc::now();
        let saved_at = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let instances = create_instances("ap-northeast-1a", 4, now);
        let zones = ["ap-northeast-1a"];

        let mut autoscaling = MockAutoScalingApi::new();
        let mut ec2 = MockEc2Api::new();
        let drainer = MockDrainer::new();
        let mut cluster = MockCluster::new();

        // Some other actor scaled the group down to 4 while the persisted
        // original is 6. There is nothing to launch or terminate, and the
        // restore invariant trips before anything is mutated.
        autoscaling
            .expect_describe_auto_scaling_group()
            .returning({
                let instances = group_instances(&instances);
                let saved_at = saved_at.clone();
                move |_| {
                    Ok(Some(details(
                        4,
                        8,
                        &zones,
                        instances.clone(),
                        state_tags(6, 8, &saved_at),
                    )))
                }
            });
        let described = instances.clone();
        ec2.expect_describe_instances()
            .returning(move |_| Ok(described.clone()));
        cluster.expect_name().return_const("default".to_string());
        cluster
            .expect_wait_until_container_instances_registered()
            .withf(|count, _| *count == 0)
            .returning(|_, _| Ok(()));

        let mut group = AutoScalingGroup::new(GROUP_NAME, autoscaling, ec2)
            .await
            .expect("the group exists");
        let err = group
            .replace_instances(&drainer, &cluster)
            .await
            .expect_err("the desired capacity no longer matches");
        assert!(matches!(
            err,
            Error::DesiredInvariantViolated {
                expected: 6,
                actual: 4
            }
        ));
    }

    /// Reducing by 61 instances across three zones: detaching happens in
    /// chunks of 20, terminating in one call, and the selection empties the
    /// fullest zones first.
    #[tokio::test]
    async fn reduce_capacity_chunks_detach_calls() {
        let now = Utc::now();
        let to_terminate: Vec<Ec2Instance> = [
            create_instances("ap-northeast-1a", 20, now - ChronoDuration::hours(24)),
            create_instances("ap-northeast-1c", 21, now - ChronoDuration::hours(24)),
            create_instances("ap-northeast-1d", 20, now - ChronoDuration::hours(24)),
        ]
        .concat();
        let to_keep: Vec<Ec2Instance> = [
            create_instances("ap-northeast-1a", 2, now),
            create_instances("ap-northeast-1c", 2, now),
            create_instances("ap-northeast-1d", 2, now),
        ]
        .concat();
        let all: Vec<Ec2Instance> = [to_terminate.clone(), to_keep.clone()].concat();
        let zones = ["ap-northeast-1a", "ap-northeast-1c", "ap-northeast-1d"];

        let mut autoscaling = MockAutoScalingApi::new();
        let mut ec2 = MockEc2Api::new();
        let mut drainer = MockDrainer::new();
        let mut seq = Sequence::new();

        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(67, 67, &zones, group_instances(&all), vec![]),
        );

        let described = all.clone();
        ec2.expect_describe_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(described.clone()));

        drainer
            .expect_drain()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|ids| ids.len() == 61)
            .returning(|_| Ok(()));

        let detached = Arc::new(Mutex::new(Vec::new()));
        let detached_capture = detached.clone();
        autoscaling
            .expect_detach_instances()
            .times(4)
            .in_sequence(&mut seq)
            .withf(|_, ids, decrement| ids.len() <= limits::MAX_DETACHABLE_INSTANCES && *decrement)
            .returning(move |_, ids, _| {
                detached_capture.lock().unwrap().extend(ids.to_vec());
                Ok(())
            });

        let terminated_ids = Arc::new(Mutex::new(Vec::new()));
        let terminated_capture = terminated_ids.clone();
        ec2.expect_terminate_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |ids| {
                terminated_capture.lock().unwrap().extend(ids.to_vec());
                Ok(())
            });

        let gone = terminated(&to_terminate);
        ec2.expect_describe_instances()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(gone.clone()));

        expect_describe_group(
            &mut autoscaling,
            &mut seq,
            1,
            details(6, 67, &zones, group_instances(&to_keep), vec![]),
        );

        let mut group = AutoScalingGroup::new(GROUP_NAME, autoscaling, ec2)
            .await
            .expect("the group exists");
        group
            .reduce_capacity(61, &drainer)
            .await
            .expect("the reduction completes");

        let mut want = instance_ids(&to_terminate);
        want.sort();
        let mut detached = detached.lock().unwrap().clone();
        detached.sort();
        assert_eq!(detached, want);
        let mut terminated_ids = terminated_ids.lock().unwrap().clone();
        terminated_ids.sort();
        assert_eq!(terminated_ids, want);
    }
}
