//! Backend-pool binder — move a revision in and out of load-balancer pools
//! and wait for member instances to pick the change up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use veer_core::retry::RetryPolicy;
use veer_provider::clients::{ComputeGroupClient, LoadBalancerClient};

use crate::error::{RolloutError, RolloutResult};
use crate::poll::{call_with_retry, cancelled};

/// Attaches/detaches scale sets to backend pools.
///
/// Pool membership changes only take effect once every member instance has
/// re-applied its network configuration, so each attach/detach is followed by
/// [`await_member_refresh`](Self::await_member_refresh).
pub struct BackendPoolBinder<C, L> {
    compute: Arc<C>,
    load_balancer: Arc<L>,
    retry: RetryPolicy,
    cancel: watch::Receiver<bool>,
}

impl<C: ComputeGroupClient, L: LoadBalancerClient> BackendPoolBinder<C, L> {
    pub fn new(
        compute: Arc<C>,
        load_balancer: Arc<L>,
        retry: RetryPolicy,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            compute,
            load_balancer,
            retry,
            cancel,
        }
    }

    /// Attach a revision to a backend pool of the named load balancer.
    pub async fn attach(
        &self,
        revision: &str,
        load_balancer: &str,
        pool: &str,
    ) -> RolloutResult<()> {
        info!(revision, load_balancer, pool, "attaching scale set to backend pool");
        // Resolve the load balancer first so a bad name fails with its own
        // NotFound instead of a confusing attach error.
        self.load_balancer
            .get_by_name(load_balancer)
            .await
            .map_err(|e| RolloutError::from_provider(load_balancer, e))?;
        call_with_retry(self.retry, "attach backend pool", async || {
            self.load_balancer
                .attach_backend_pool(revision, load_balancer, pool)
                .await
        })
        .await
        .map_err(|e| RolloutError::from_provider(revision, e))
    }

    /// Detach a revision from a backend pool.
    pub async fn detach(&self, revision: &str, pool: &str) -> RolloutResult<()> {
        info!(revision, pool, "detaching scale set from backend pool");
        call_with_retry(self.retry, "detach backend pool", async || {
            self.load_balancer.detach_backend_pool(revision, pool).await
        })
        .await
        .map_err(|e| RolloutError::from_provider(revision, e))
    }

    /// Re-apply network configuration to every member instance and block
    /// until the propagation call completes for all of them.
    ///
    /// Propagation is per-instance and not atomic across the set: failures
    /// are collected and surfaced as `PartialFailure`, never dropped.
    pub async fn await_member_refresh(
        &self,
        revision: &str,
        timeout: Duration,
    ) -> RolloutResult<()> {
        let mut cancel = self.cancel.clone();
        let refresh = async {
            let instances = self
                .compute
                .list_member_instances(revision)
                .await
                .map_err(|e| RolloutError::from_provider(revision, e))?;
            if instances.is_empty() {
                debug!(revision, "no member instances to refresh");
                return Ok(());
            }

            let mut failed = Vec::new();
            for instance in &instances {
                debug!(revision, instance = %instance.id, "refreshing member network configuration");
                let result = call_with_retry(self.retry, "refresh member", async || {
                    self.compute
                        .refresh_member_network_config(revision, &instance.id)
                        .await
                })
                .await;
                if let Err(err) = result {
                    warn!(revision, instance = %instance.id, error = %err, "member refresh failed");
                    failed.push(instance.id.clone());
                }
            }

            if failed.is_empty() {
                info!(revision, count = instances.len(), "all member instances refreshed");
                Ok(())
            } else {
                Err(RolloutError::PartialFailure {
                    revision: revision.to_string(),
                    operation: "network refresh".to_string(),
                    failed_instances: failed,
                })
            }
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, refresh) => match result {
                Ok(inner) => inner,
                Err(_) => Err(RolloutError::Timeout {
                    revision: revision.to_string(),
                    waiting_for: "member network refresh".to_string(),
                    waited: timeout,
                }),
            },
            _ = cancelled(&mut cancel) => Err(RolloutError::Cancelled {
                revision: revision.to_string(),
                waiting_for: "member network refresh".to_string(),
            }),
        }
    }
}
