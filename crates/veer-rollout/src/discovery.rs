//! Revision discovery — which scale sets belong to a deployment, and which
//! one is serving production.

use std::sync::Arc;

use tracing::debug;

use veer_core::tags::{belongs_to, is_blue};
use veer_core::types::{DeploymentTarget, ScaleSetRevision};
use veer_provider::clients::ComputeGroupClient;

use crate::error::RolloutResult;

/// Lists the revisions of one deployment, most recent first.
pub struct RevisionDiscovery<C> {
    compute: Arc<C>,
}

impl<C: ComputeGroupClient> RevisionDiscovery<C> {
    pub fn new(compute: Arc<C>) -> Self {
        Self { compute }
    }

    /// All scale sets owned by the target, sorted descending by creation
    /// time, ties broken descending by revision number.
    pub async fn list_revisions(
        &self,
        target: &DeploymentTarget,
    ) -> RolloutResult<Vec<ScaleSetRevision>> {
        let mut owned: Vec<ScaleSetRevision> = self
            .compute
            .list_groups(&target.scope)
            .await?
            .into_iter()
            .filter(|group| belongs_to(&group.tags, &target.deployment_id))
            .collect();
        owned.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.revision.cmp(&a.revision))
        });
        debug!(
            deployment = %target.deployment_id,
            count = owned.len(),
            "discovered revisions"
        );
        Ok(owned)
    }
}

/// Next revision number: `max + 1`, or 1 when no revision exists.
///
/// Order-independent, and tolerant of gaps left by deleted revisions.
pub fn next_revision_number(revisions: &[ScaleSetRevision]) -> u32 {
    revisions
        .iter()
        .map(|r| r.revision)
        .max()
        .map_or(1, |max| max + 1)
}

/// The most recently created revision holding capacity, if any.
pub fn most_recent_active(revisions: &[ScaleSetRevision]) -> Option<&ScaleSetRevision> {
    revisions.iter().find(|r| r.is_active())
}

/// Blue-green variant: a revision tagged `blue` takes precedence over the
/// capacity heuristic, so a swap interrupted mid-flight still resolves to
/// the side that was serving production.
pub fn most_recent_active_or_blue(revisions: &[ScaleSetRevision]) -> Option<&ScaleSetRevision> {
    revisions
        .iter()
        .find(|r| is_blue(&r.tags))
        .or_else(|| most_recent_active(revisions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use veer_core::tags::{BG_BLUE, BG_STATE_TAG, TagMap, tags_for_new_revision};

    fn revision(name: &str, number: u32, capacity: u32, created_at: u64) -> ScaleSetRevision {
        ScaleSetRevision {
            name: name.to_string(),
            revision: number,
            capacity,
            min_capacity: 0,
            max_capacity: capacity.max(4),
            created_at,
            tags: tags_for_new_revision("map-1", number, created_at, false),
        }
    }

    #[test]
    fn next_number_is_max_plus_one() {
        let revisions = vec![
            revision("web__3", 3, 0, 30),
            revision("web__7", 7, 2, 70),
            revision("web__5", 5, 0, 50),
        ];
        assert_eq!(next_revision_number(&revisions), 8);
    }

    #[test]
    fn next_number_is_order_independent() {
        let mut revisions = vec![
            revision("web__2", 2, 0, 20),
            revision("web__9", 9, 1, 90),
            revision("web__4", 4, 0, 40),
        ];
        let forward = next_revision_number(&revisions);
        revisions.reverse();
        assert_eq!(next_revision_number(&revisions), forward);
        revisions.swap(0, 1);
        assert_eq!(next_revision_number(&revisions), forward);
    }

    #[test]
    fn next_number_starts_at_one() {
        assert_eq!(next_revision_number(&[]), 1);
    }

    #[test]
    fn next_number_tolerates_gaps() {
        // Revisions 2 and 3 were deleted; numbering must not reuse them.
        let revisions = vec![revision("web__1", 1, 0, 10), revision("web__4", 4, 2, 40)];
        assert_eq!(next_revision_number(&revisions), 5);
    }

    #[test]
    fn most_recent_active_skips_empty_revisions() {
        let revisions = vec![
            revision("web__6", 6, 0, 60),
            revision("web__5", 5, 3, 50),
            revision("web__4", 4, 1, 40),
        ];
        assert_eq!(most_recent_active(&revisions).unwrap().name, "web__5");
    }

    #[test]
    fn most_recent_active_none_when_all_empty() {
        let revisions = vec![revision("web__2", 2, 0, 20)];
        assert!(most_recent_active(&revisions).is_none());
    }

    #[test]
    fn blue_tag_wins_over_capacity() {
        let mut blue = revision("web__4", 4, 0, 40);
        blue.tags = tags_for_new_revision("map-1", 4, 40, true);
        blue.tags
            .insert(BG_STATE_TAG.to_string(), BG_BLUE.to_string());
        let revisions = vec![revision("web__5", 5, 2, 50), blue];
        assert_eq!(most_recent_active_or_blue(&revisions).unwrap().name, "web__4");
    }

    #[test]
    fn blue_fallback_is_capacity() {
        let revisions = vec![revision("web__5", 5, 2, 50), revision("web__4", 4, 0, 40)];
        assert_eq!(most_recent_active_or_blue(&revisions).unwrap().name, "web__5");
    }

    #[tokio::test]
    async fn listing_filters_and_sorts() {
        use veer_provider::clients::GroupConfig;
        use veer_provider::memory::MemoryCloud;

        let cloud = MemoryCloud::new();
        let config = GroupConfig {
            image: "img".to_string(),
            sku: "s".to_string(),
            network_profile: "n".to_string(),
            admin_profile: "a".to_string(),
        };
        // Seeded in creation order 1, 2; plus a foreign deployment and an
        // untagged group that must both be filtered out.
        cloud.seed_group(
            "web__1",
            config.clone(),
            0,
            0,
            tags_for_new_revision("map-1", 1, 0, false),
        );
        cloud.seed_group(
            "web__2",
            config.clone(),
            2,
            1,
            tags_for_new_revision("map-1", 2, 0, false),
        );
        cloud.seed_group(
            "other__1",
            config.clone(),
            1,
            0,
            tags_for_new_revision("map-2", 1, 0, false),
        );
        cloud.seed_group("unmanaged", config, 1, 0, TagMap::new());

        let target = DeploymentTarget {
            deployment_id: "map-1".to_string(),
            account: "acct".to_string(),
            scope: "rg-1".to_string(),
            name_prefix: "web".to_string(),
        };

        let discovery = RevisionDiscovery::new(Arc::new(cloud));
        let revisions = discovery.list_revisions(&target).await.unwrap();

        let names: Vec<&str> = revisions.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["web__2", "web__1"]);
    }
}
