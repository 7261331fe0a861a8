//! In-memory provider — a control-plane stand-in for tests.
//!
//! Models the eventual consistency that makes the rollout core interesting:
//! a resize updates desired capacity immediately, but member instances only
//! reach their terminal state after a configurable number of list polls.
//! Mutating calls are recorded in an operation log so tests can assert on
//! ordering.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use tracing::debug;

use veer_core::tags::{TagMap, revision_from_tags};
use veer_core::types::{MemberInstance, ProvisioningState, ScaleSetRevision, ScalingPolicyDoc};

use crate::clients::{
    AutoScalePolicyClient, ComputeGroupClient, GroupConfig, LoadBalancer, LoadBalancerClient,
    ResizeOperation, ResizeStatus,
};
use crate::error::{ProviderError, ProviderResult};

#[derive(Debug, Clone)]
struct PendingResize {
    op_id: u64,
    target: u32,
    polls_left: u32,
    failed: bool,
}

#[derive(Debug, Clone)]
struct GroupRecord {
    config: GroupConfig,
    capacity: u32,
    min_capacity: u32,
    max_capacity: u32,
    created_at: u64,
    tags: TagMap,
    instances: Vec<MemberInstance>,
    policies: Vec<ScalingPolicyDoc>,
    pools: BTreeSet<String>,
    pending: Option<PendingResize>,
}

/// Read-only view of a group for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSnapshot {
    pub capacity: u32,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub created_at: u64,
    pub tags: TagMap,
    pub policies: Vec<ScalingPolicyDoc>,
    pub pools: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    groups: BTreeMap<String, GroupRecord>,
    load_balancers: BTreeMap<String, Vec<String>>,
    /// Logical clock for creation timestamps.
    clock: u64,
    next_op_id: u64,
    /// List polls before an issued resize converges.
    settle_polls: u32,
    ops: Vec<String>,
    refresh_failures: BTreeSet<String>,
    failed_resizes: BTreeSet<String>,
    transient_list_failures: u32,
}

/// Shared-handle in-memory cloud. Cloning shares the same state.
#[derive(Clone, Default)]
pub struct MemoryCloud {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `list_member_instances` polls before a resize converges.
    pub fn set_settle_polls(&self, polls: u32) {
        self.lock().settle_polls = polls;
    }

    /// Register a load balancer with its backend pools.
    pub fn add_load_balancer(&self, name: &str, pools: &[&str]) {
        self.lock()
            .load_balancers
            .insert(name.to_string(), pools.iter().map(|p| p.to_string()).collect());
    }

    /// Seed a pre-existing scale set at steady state.
    pub fn seed_group(
        &self,
        name: &str,
        config: GroupConfig,
        capacity: u32,
        min_capacity: u32,
        tags: TagMap,
    ) {
        let mut inner = self.lock();
        inner.clock += 1;
        let created_at = inner.clock;
        let instances = settled_instances(name, capacity);
        inner.groups.insert(
            name.to_string(),
            GroupRecord {
                config,
                capacity,
                min_capacity,
                max_capacity: capacity.max(min_capacity),
                created_at,
                tags,
                instances,
                policies: Vec::new(),
                pools: BTreeSet::new(),
                pending: None,
            },
        );
    }

    /// Replace the scaling-policy documents on a seeded group.
    pub fn set_policies(&self, name: &str, docs: Vec<ScalingPolicyDoc>) {
        if let Some(rec) = self.lock().groups.get_mut(name) {
            rec.policies = docs;
        }
    }

    /// Attach a seeded group to a pool without logging an operation.
    pub fn set_pool_membership(&self, name: &str, pool: &str) {
        if let Some(rec) = self.lock().groups.get_mut(name) {
            rec.pools.insert(pool.to_string());
        }
    }

    /// Make network-config refresh fail for one instance id.
    pub fn fail_refresh_of(&self, instance_id: &str) {
        self.lock().refresh_failures.insert(instance_id.to_string());
    }

    /// Make the next resize of a group report `Failed`.
    pub fn fail_resize_of(&self, group: &str) {
        self.lock().failed_resizes.insert(group.to_string());
    }

    /// Inject N throttling errors into upcoming instance-list calls.
    pub fn set_transient_list_failures(&self, count: u32) {
        self.lock().transient_list_failures = count;
    }

    /// Recorded mutating operations, in call order.
    pub fn ops(&self) -> Vec<String> {
        self.lock().ops.clone()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.lock().groups.contains_key(name)
    }

    pub fn group_snapshot(&self, name: &str) -> Option<GroupSnapshot> {
        self.lock().groups.get(name).map(|rec| GroupSnapshot {
            capacity: rec.capacity,
            min_capacity: rec.min_capacity,
            max_capacity: rec.max_capacity,
            created_at: rec.created_at,
            tags: rec.tags.clone(),
            policies: rec.policies.clone(),
            pools: rec.pools.iter().cloned().collect(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory cloud poisoned")
    }

    fn record(&self, op: String) {
        debug!(%op, "memory cloud operation");
        self.lock().ops.push(op);
    }
}

fn settled_instances(name: &str, count: u32) -> Vec<MemberInstance> {
    (0..count)
        .map(|i| MemberInstance {
            id: format!("{name}/{i}"),
            state: ProvisioningState::Succeeded,
        })
        .collect()
}

fn revision_view(name: &str, rec: &GroupRecord) -> ScaleSetRevision {
    ScaleSetRevision {
        name: name.to_string(),
        revision: revision_from_tags(&rec.tags).unwrap_or(0),
        capacity: rec.capacity,
        min_capacity: rec.min_capacity,
        max_capacity: rec.max_capacity,
        created_at: rec.created_at,
        tags: rec.tags.clone(),
    }
}

impl ComputeGroupClient for MemoryCloud {
    async fn list_groups(&self, _scope: &str) -> ProviderResult<Vec<ScaleSetRevision>> {
        let inner = self.lock();
        Ok(inner
            .groups
            .iter()
            .map(|(name, rec)| revision_view(name, rec))
            .collect())
    }

    async fn get_group(&self, name: &str) -> ProviderResult<ScaleSetRevision> {
        let inner = self.lock();
        inner
            .groups
            .get(name)
            .map(|rec| revision_view(name, rec))
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    async fn get_group_config(&self, name: &str) -> ProviderResult<GroupConfig> {
        let inner = self.lock();
        inner
            .groups
            .get(name)
            .map(|rec| rec.config.clone())
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    async fn create_group(
        &self,
        name: &str,
        config: &GroupConfig,
        max_capacity: u32,
        tags: TagMap,
    ) -> ProviderResult<()> {
        self.record(format!("create {name}"));
        let mut inner = self.lock();
        if inner.groups.contains_key(name) {
            return Err(ProviderError::Api(format!("group already exists: {name}")));
        }
        inner.clock += 1;
        let created_at = inner.clock;
        inner.groups.insert(
            name.to_string(),
            GroupRecord {
                config: config.clone(),
                capacity: 0,
                min_capacity: 0,
                max_capacity,
                created_at,
                tags,
                instances: Vec::new(),
                policies: Vec::new(),
                pools: BTreeSet::new(),
                pending: None,
            },
        );
        Ok(())
    }

    async fn resize(&self, name: &str, capacity: u32) -> ProviderResult<ResizeOperation> {
        self.record(format!("resize {name} -> {capacity}"));
        let mut inner = self.lock();
        inner.next_op_id += 1;
        let op_id = inner.next_op_id;
        let settle_polls = inner.settle_polls;
        let failed = inner.failed_resizes.remove(name);
        let rec = inner
            .groups
            .get_mut(name)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))?;
        rec.capacity = capacity;
        rec.pending = Some(PendingResize {
            op_id,
            target: capacity,
            polls_left: settle_polls,
            failed,
        });
        Ok(ResizeOperation {
            id: op_id,
            group: name.to_string(),
            target_capacity: capacity,
        })
    }

    async fn resize_status(&self, op: &ResizeOperation) -> ProviderResult<ResizeStatus> {
        let inner = self.lock();
        let rec = inner
            .groups
            .get(&op.group)
            .ok_or_else(|| ProviderError::NotFound(op.group.clone()))?;
        Ok(match &rec.pending {
            Some(p) if p.op_id == op.id && p.failed => {
                ResizeStatus::Failed(format!("resize of {} rejected", op.group))
            }
            Some(p) if p.op_id == op.id => ResizeStatus::InProgress,
            _ => ResizeStatus::Succeeded,
        })
    }

    async fn set_min_capacity(&self, name: &str, min: u32) -> ProviderResult<()> {
        self.record(format!("set-min {name} -> {min}"));
        let mut inner = self.lock();
        let rec = inner
            .groups
            .get_mut(name)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))?;
        rec.min_capacity = min;
        Ok(())
    }

    async fn update_tag(&self, name: &str, key: &str, value: &str) -> ProviderResult<()> {
        self.record(format!("tag {name} {key}={value}"));
        let mut inner = self.lock();
        let rec = inner
            .groups
            .get_mut(name)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))?;
        rec.tags.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_group(&self, name: &str) -> ProviderResult<()> {
        self.record(format!("delete {name}"));
        let mut inner = self.lock();
        inner
            .groups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    async fn list_member_instances(&self, name: &str) -> ProviderResult<Vec<MemberInstance>> {
        let mut inner = self.lock();
        if inner.transient_list_failures > 0 {
            inner.transient_list_failures -= 1;
            return Err(ProviderError::Transient("throttled: slow down".to_string()));
        }
        let rec = inner
            .groups
            .get_mut(name)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))?;
        if let Some(pending) = rec.pending.as_mut()
            && !pending.failed
        {
            if pending.polls_left == 0 {
                rec.instances = settled_instances(name, pending.target);
                rec.pending = None;
            } else {
                pending.polls_left -= 1;
            }
        }
        Ok(rec.instances.clone())
    }

    async fn refresh_member_network_config(
        &self,
        name: &str,
        instance_id: &str,
    ) -> ProviderResult<()> {
        self.record(format!("refresh {instance_id}"));
        let inner = self.lock();
        if !inner.groups.contains_key(name) {
            return Err(ProviderError::NotFound(name.to_string()));
        }
        if inner.refresh_failures.contains(instance_id) {
            return Err(ProviderError::Api(format!(
                "network profile update failed for {instance_id}"
            )));
        }
        Ok(())
    }
}

impl AutoScalePolicyClient for MemoryCloud {
    async fn get_policy_documents(&self, name: &str) -> ProviderResult<Vec<ScalingPolicyDoc>> {
        let inner = self.lock();
        inner
            .groups
            .get(name)
            .map(|rec| rec.policies.clone())
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    async fn attach_policy_documents(
        &self,
        name: &str,
        docs: &[ScalingPolicyDoc],
    ) -> ProviderResult<()> {
        self.record(format!("attach-policies {name} x{}", docs.len()));
        let mut inner = self.lock();
        let rec = inner
            .groups
            .get_mut(name)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))?;
        // Attach is an upsert: re-attaching an identical document is a no-op.
        for doc in docs {
            if !rec.policies.contains(doc) {
                rec.policies.push(doc.clone());
            }
        }
        Ok(())
    }

    async fn clear_policies(&self, name: &str) -> ProviderResult<()> {
        self.record(format!("clear-policies {name}"));
        let mut inner = self.lock();
        let rec = inner
            .groups
            .get_mut(name)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))?;
        rec.policies.clear();
        Ok(())
    }
}

impl LoadBalancerClient for MemoryCloud {
    async fn get_by_name(&self, name: &str) -> ProviderResult<LoadBalancer> {
        let inner = self.lock();
        inner
            .load_balancers
            .get(name)
            .map(|pools| LoadBalancer {
                name: name.to_string(),
                backend_pools: pools.clone(),
            })
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    async fn attach_backend_pool(
        &self,
        group: &str,
        load_balancer: &str,
        pool: &str,
    ) -> ProviderResult<()> {
        self.record(format!("attach-pool {group} -> {pool}"));
        let mut inner = self.lock();
        let known = inner
            .load_balancers
            .get(load_balancer)
            .ok_or_else(|| ProviderError::NotFound(load_balancer.to_string()))?;
        if !known.iter().any(|p| p == pool) {
            return Err(ProviderError::NotFound(format!("{load_balancer}/{pool}")));
        }
        let rec = inner
            .groups
            .get_mut(group)
            .ok_or_else(|| ProviderError::NotFound(group.to_string()))?;
        rec.pools.insert(pool.to_string());
        Ok(())
    }

    async fn detach_backend_pool(&self, group: &str, pool: &str) -> ProviderResult<()> {
        self.record(format!("detach-pool {group} -x {pool}"));
        let mut inner = self.lock();
        let rec = inner
            .groups
            .get_mut(group)
            .ok_or_else(|| ProviderError::NotFound(group.to_string()))?;
        rec.pools.remove(pool);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GroupConfig {
        GroupConfig {
            image: "img-1".to_string(),
            sku: "standard-2".to_string(),
            network_profile: "net-a".to_string(),
            admin_profile: "admin".to_string(),
        }
    }

    #[tokio::test]
    async fn create_then_get() {
        let cloud = MemoryCloud::new();
        cloud
            .create_group("web__1", &test_config(), 4, TagMap::new())
            .await
            .unwrap();

        let rev = cloud.get_group("web__1").await.unwrap();
        assert_eq!(rev.capacity, 0);
        assert!(cloud.exists("web__1"));
    }

    #[tokio::test]
    async fn duplicate_create_rejected() {
        let cloud = MemoryCloud::new();
        cloud
            .create_group("web__1", &test_config(), 4, TagMap::new())
            .await
            .unwrap();
        let err = cloud
            .create_group("web__1", &test_config(), 4, TagMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api(_)));
    }

    #[tokio::test]
    async fn resize_converges_after_settle_polls() {
        let cloud = MemoryCloud::new();
        cloud.set_settle_polls(2);
        cloud.seed_group("web__1", test_config(), 0, 0, TagMap::new());

        let op = cloud.resize("web__1", 3).await.unwrap();
        assert_eq!(cloud.resize_status(&op).await.unwrap(), ResizeStatus::InProgress);

        // Two polls return the stale (empty) list, the third settles.
        assert!(cloud.list_member_instances("web__1").await.unwrap().is_empty());
        assert!(cloud.list_member_instances("web__1").await.unwrap().is_empty());
        let settled = cloud.list_member_instances("web__1").await.unwrap();
        assert_eq!(settled.len(), 3);
        assert!(settled.iter().all(|i| i.state.is_terminal()));
        assert_eq!(cloud.resize_status(&op).await.unwrap(), ResizeStatus::Succeeded);
    }

    #[tokio::test]
    async fn injected_resize_failure_never_settles() {
        let cloud = MemoryCloud::new();
        cloud.seed_group("web__1", test_config(), 0, 0, TagMap::new());
        cloud.fail_resize_of("web__1");

        let op = cloud.resize("web__1", 3).await.unwrap();
        assert!(cloud.list_member_instances("web__1").await.unwrap().is_empty());
        assert!(matches!(
            cloud.resize_status(&op).await.unwrap(),
            ResizeStatus::Failed(_)
        ));
    }

    #[tokio::test]
    async fn transient_failures_drain() {
        let cloud = MemoryCloud::new();
        cloud.seed_group("web__1", test_config(), 1, 0, TagMap::new());
        cloud.set_transient_list_failures(2);

        assert!(cloud.list_member_instances("web__1").await.unwrap_err().is_transient());
        assert!(cloud.list_member_instances("web__1").await.unwrap_err().is_transient());
        assert_eq!(cloud.list_member_instances("web__1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pool_attach_validates_lb_and_pool() {
        let cloud = MemoryCloud::new();
        cloud.add_load_balancer("lb-1", &["prod", "stage"]);
        cloud.seed_group("web__1", test_config(), 1, 0, TagMap::new());

        cloud.attach_backend_pool("web__1", "lb-1", "prod").await.unwrap();
        assert_eq!(cloud.group_snapshot("web__1").unwrap().pools, vec!["prod"]);

        let err = cloud
            .attach_backend_pool("web__1", "lb-1", "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));

        cloud.detach_backend_pool("web__1", "prod").await.unwrap();
        assert!(cloud.group_snapshot("web__1").unwrap().pools.is_empty());
    }

    #[tokio::test]
    async fn policies_attach_and_clear() {
        let cloud = MemoryCloud::new();
        cloud.seed_group("web__1", test_config(), 1, 0, TagMap::new());

        let doc = ScalingPolicyDoc(serde_json::json!({"metric": "cpu", "target": 70}));
        cloud
            .attach_policy_documents("web__1", std::slice::from_ref(&doc))
            .await
            .unwrap();
        assert_eq!(cloud.get_policy_documents("web__1").await.unwrap(), vec![doc]);

        cloud.clear_policies("web__1").await.unwrap();
        assert!(cloud.get_policy_documents("web__1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_failure_injection() {
        let cloud = MemoryCloud::new();
        cloud.seed_group("web__1", test_config(), 2, 0, TagMap::new());
        cloud.fail_refresh_of("web__1/1");

        cloud.refresh_member_network_config("web__1", "web__1/0").await.unwrap();
        let err = cloud
            .refresh_member_network_config("web__1", "web__1/1")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api(_)));
    }

    #[tokio::test]
    async fn op_log_preserves_order() {
        let cloud = MemoryCloud::new();
        cloud.seed_group("web__1", test_config(), 1, 0, TagMap::new());

        cloud.resize("web__1", 2).await.unwrap();
        cloud.update_tag("web__1", "veer:bg-state", "blue").await.unwrap();
        cloud.delete_group("web__1").await.unwrap();

        assert_eq!(
            cloud.ops(),
            vec![
                "resize web__1 -> 2",
                "tag web__1 veer:bg-state=blue",
                "delete web__1",
            ]
        );
    }
}
