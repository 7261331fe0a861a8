//! Retention pruner — downsize or delete revisions beyond the retention
//! count before a new one is created.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use veer_core::types::ScaleSetRevision;
use veer_provider::clients::{AutoScalePolicyClient, ComputeGroupClient};

use crate::capacity::CapacityController;
use crate::error::{RolloutError, RolloutResult};

/// What to do with the non-active revisions, split deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrunePlan {
    /// Downsized to zero capacity but kept as disaster-recovery headroom.
    pub downsize: Vec<String>,
    /// Deleted outright (after a downsize to zero).
    pub delete: Vec<String>,
}

/// Split the revision list into keep/downsize/delete.
///
/// The active revision is always kept and never appears in the plan. Among
/// the remaining revisions (already sorted most recent first), the first
/// `retention - 1` are downsized, the rest deleted — retention always
/// reserves one slot for the active revision, and `retention <= 0` behaves
/// as 1.
pub fn plan_retention(
    revisions: &[ScaleSetRevision],
    active: Option<&str>,
    retention: i32,
) -> PrunePlan {
    let keep = retention.max(1) as usize;
    let non_active = revisions
        .iter()
        .filter(|r| Some(r.name.as_str()) != active)
        .map(|r| r.name.clone());

    let mut plan = PrunePlan::default();
    for (index, name) in non_active.enumerate() {
        if index < keep - 1 {
            plan.downsize.push(name);
        } else {
            plan.delete.push(name);
        }
    }
    plan
}

/// Applies a [`PrunePlan`] against the provider.
pub struct RetentionPruner<C, A> {
    compute: Arc<C>,
    autoscale: Arc<A>,
    capacity: CapacityController<C>,
}

impl<C: ComputeGroupClient, A: AutoScalePolicyClient> RetentionPruner<C, A> {
    pub fn new(compute: Arc<C>, autoscale: Arc<A>, capacity: CapacityController<C>) -> Self {
        Self {
            compute,
            autoscale,
            capacity,
        }
    }

    /// Execute the plan: clear scaling policies, downsize, delete.
    ///
    /// Revisions already at zero capacity skip the resize wait but still
    /// consume their retention slot.
    pub async fn execute(
        &self,
        plan: &PrunePlan,
        revisions: &[ScaleSetRevision],
        timeout: Duration,
    ) -> RolloutResult<()> {
        for name in &plan.downsize {
            info!(revision = %name, "downsizing retained revision to zero");
            self.downsize_to_zero(name, revisions, timeout).await?;
        }
        for name in &plan.delete {
            info!(revision = %name, "deleting revision beyond retention");
            self.downsize_to_zero(name, revisions, timeout).await?;
            self.compute
                .delete_group(name)
                .await
                .map_err(|e| RolloutError::from_provider(name, e))?;
        }
        Ok(())
    }

    async fn downsize_to_zero(
        &self,
        name: &str,
        revisions: &[ScaleSetRevision],
        timeout: Duration,
    ) -> RolloutResult<()> {
        let holds_capacity = revisions
            .iter()
            .find(|r| r.name == name)
            .is_some_and(|r| r.capacity > 0);
        if !holds_capacity {
            return Ok(());
        }
        self.autoscale
            .clear_policies(name)
            .await
            .map_err(|e| RolloutError::from_provider(name, e))?;
        self.capacity.resize_and_await(name, 0, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::watch;
    use veer_core::tags::tags_for_new_revision;
    use veer_provider::clients::GroupConfig;
    use veer_provider::memory::MemoryCloud;

    fn revision(number: u32, capacity: u32) -> ScaleSetRevision {
        ScaleSetRevision {
            name: format!("web__{number}"),
            revision: number,
            capacity,
            min_capacity: 0,
            max_capacity: 4,
            created_at: u64::from(number) * 10,
            tags: tags_for_new_revision("map-1", number, u64::from(number) * 10, false),
        }
    }

    /// Most recent first, like discovery returns them.
    fn revisions(specs: &[(u32, u32)]) -> Vec<ScaleSetRevision> {
        specs.iter().map(|&(n, c)| revision(n, c)).collect()
    }

    #[test]
    fn plan_keeps_active_and_splits_the_rest() {
        let revs = revisions(&[(5, 2), (4, 1), (3, 0), (2, 0), (1, 0)]);
        let plan = plan_retention(&revs, Some("web__5"), 3);

        assert_eq!(plan.downsize, vec!["web__4", "web__3"]);
        assert_eq!(plan.delete, vec!["web__2", "web__1"]);
    }

    #[test]
    fn plan_counts_match_retention_law() {
        // k revisions total, retention n: downsize min(n-1, k-1), delete
        // max(0, k - n), never touching the active revision.
        for k in 1u32..=6 {
            for n in 1i32..=6 {
                let specs: Vec<(u32, u32)> = (1..=k).rev().map(|i| (i, 1)).collect();
                let revs = revisions(&specs);
                let active = format!("web__{k}");
                let plan = plan_retention(&revs, Some(active.as_str()), n);

                let k = k as i64;
                let n = i64::from(n);
                assert_eq!(plan.downsize.len() as i64, (n - 1).min(k - 1), "k={k} n={n}");
                assert_eq!(plan.delete.len() as i64, (k - n).max(0), "k={k} n={n}");
                assert!(!plan.downsize.contains(&active));
                assert!(!plan.delete.contains(&active));
            }
        }
    }

    #[test]
    fn zero_retention_behaves_as_one() {
        let revs = revisions(&[(3, 2), (2, 1), (1, 1)]);
        let plan = plan_retention(&revs, Some("web__3"), 0);
        assert!(plan.downsize.is_empty());
        assert_eq!(plan.delete, vec!["web__2", "web__1"]);
    }

    #[test]
    fn plan_without_active_prunes_everything_beyond_count() {
        let revs = revisions(&[(2, 0), (1, 0)]);
        let plan = plan_retention(&revs, None, 2);
        assert_eq!(plan.downsize, vec!["web__2"]);
        assert_eq!(plan.delete, vec!["web__1"]);
    }

    fn seed(cloud: &MemoryCloud, number: u32, capacity: u32) {
        cloud.seed_group(
            &format!("web__{number}"),
            GroupConfig {
                image: "img".to_string(),
                sku: "s".to_string(),
                network_profile: "n".to_string(),
                admin_profile: "a".to_string(),
            },
            capacity,
            0,
            tags_for_new_revision("map-1", number, 0, false),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn execute_downsizes_and_deletes() {
        let cloud = MemoryCloud::new();
        seed(&cloud, 1, 1);
        seed(&cloud, 2, 1);
        seed(&cloud, 3, 2);

        let (_, rx) = watch::channel(false);
        let compute = Arc::new(cloud.clone());
        let capacity =
            CapacityController::new(compute.clone(), Duration::from_secs(1), rx);
        let pruner = RetentionPruner::new(compute, Arc::new(cloud.clone()), capacity);

        let revs = revisions(&[(3, 2), (2, 1), (1, 1)]);
        let plan = plan_retention(&revs, Some("web__3"), 2);
        pruner
            .execute(&plan, &revs, Duration::from_secs(30))
            .await
            .unwrap();

        // web__2 downsized but kept; web__1 deleted; active untouched.
        assert_eq!(cloud.group_snapshot("web__2").unwrap().capacity, 0);
        assert!(!cloud.exists("web__1"));
        assert_eq!(cloud.group_snapshot("web__3").unwrap().capacity, 2);

        // Scaling policies are cleared before any downsize.
        let ops = cloud.ops();
        let clear_idx = ops.iter().position(|o| o == "clear-policies web__2").unwrap();
        let resize_idx = ops.iter().position(|o| o == "resize web__2 -> 0").unwrap();
        assert!(clear_idx < resize_idx);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_skips_resize_for_already_empty_revisions() {
        let cloud = MemoryCloud::new();
        seed(&cloud, 1, 0);
        seed(&cloud, 2, 2);

        let (_, rx) = watch::channel(false);
        let compute = Arc::new(cloud.clone());
        let capacity =
            CapacityController::new(compute.clone(), Duration::from_secs(1), rx);
        let pruner = RetentionPruner::new(compute, Arc::new(cloud.clone()), capacity);

        let revs = revisions(&[(2, 2), (1, 0)]);
        let plan = plan_retention(&revs, Some("web__2"), 2);
        pruner
            .execute(&plan, &revs, Duration::from_secs(30))
            .await
            .unwrap();

        assert!(cloud.ops().iter().all(|op| !op.starts_with("resize web__1")));
        assert!(cloud.exists("web__1"));
    }
}
