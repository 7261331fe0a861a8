//! Tag conventions — ownership filtering and revision naming.
//!
//! Each scale set carries a small set of controller-owned tags next to
//! whatever the user put on the base scale set. The ownership tag is the only
//! durable coordination mechanism between rollouts: discovery filters on it,
//! revision numbering is parsed back out of it.

use std::collections::BTreeMap;

/// Provider tags, keyed deterministically.
pub type TagMap = BTreeMap<String, String>;

/// Ownership tag. Value is `<deployment_id>__<revision>`.
pub const DEPLOYMENT_TAG: &str = "veer:deployment";

/// Creation time tag, epoch seconds. Used for recency sorting.
pub const CREATED_AT_TAG: &str = "veer:created-at";

/// Blue-green state tag. `blue` is serving production, `green` is staged.
pub const BG_STATE_TAG: &str = "veer:bg-state";

pub const BG_BLUE: &str = "blue";
pub const BG_GREEN: &str = "green";

/// Separator between name prefix / deployment id and the revision number.
pub const REVISION_SEPARATOR: &str = "__";

/// Full scale-set name for a revision: `<prefix>__<revision>`.
pub fn scale_set_name(prefix: &str, revision: u32) -> String {
    format!("{prefix}{REVISION_SEPARATOR}{revision}")
}

/// Ownership tag value for a revision: `<deployment_id>__<revision>`.
pub fn revision_tag_value(deployment_id: &str, revision: u32) -> String {
    format!("{deployment_id}{REVISION_SEPARATOR}{revision}")
}

/// Whether a tag map marks a scale set as belonging to a deployment.
///
/// Ownership requires the deployment tag to start with exactly
/// `<deployment_id>__`, so `app1` never claims `app10`'s revisions when the
/// two deployments share a resource group.
pub fn belongs_to(tags: &TagMap, deployment_id: &str) -> bool {
    tags.get(DEPLOYMENT_TAG)
        .is_some_and(|v| v.starts_with(&format!("{deployment_id}{REVISION_SEPARATOR}")))
}

/// Parse the revision number back out of the ownership tag.
pub fn revision_from_tags(tags: &TagMap) -> Option<u32> {
    let value = tags.get(DEPLOYMENT_TAG)?;
    let (_, revision) = value.rsplit_once(REVISION_SEPARATOR)?;
    revision.parse().ok()
}

/// Creation epoch recorded in the tags, if present and well-formed.
pub fn created_at_from_tags(tags: &TagMap) -> Option<u64> {
    tags.get(CREATED_AT_TAG)?.parse().ok()
}

/// Whether the tags mark the revision as the blue (production) side.
pub fn is_blue(tags: &TagMap) -> bool {
    tags.get(BG_STATE_TAG).is_some_and(|v| v == BG_BLUE)
}

/// Controller-owned tags for a freshly created revision.
///
/// Blue-green revisions start out `green`: staged, not yet serving
/// production.
pub fn tags_for_new_revision(
    deployment_id: &str,
    revision: u32,
    created_at: u64,
    blue_green: bool,
) -> TagMap {
    let mut tags = TagMap::new();
    tags.insert(
        DEPLOYMENT_TAG.to_string(),
        revision_tag_value(deployment_id, revision),
    );
    tags.insert(CREATED_AT_TAG.to_string(), created_at.to_string());
    if blue_green {
        tags.insert(BG_STATE_TAG.to_string(), BG_GREEN.to_string());
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags_for(deployment_id: &str, revision: u32) -> TagMap {
        tags_for_new_revision(deployment_id, revision, 1000, false)
    }

    #[test]
    fn name_and_tag_value_convention() {
        assert_eq!(scale_set_name("web", 7), "web__7");
        assert_eq!(revision_tag_value("map-1", 7), "map-1__7");
    }

    #[test]
    fn ownership_requires_exact_prefix() {
        let tags = tags_for("app1", 3);
        assert!(belongs_to(&tags, "app1"));
        // `app1` tags must not be claimed by `app` nor claim `app10`.
        assert!(!belongs_to(&tags, "app"));
        let tags10 = tags_for("app10", 3);
        assert!(!belongs_to(&tags10, "app1"));
    }

    #[test]
    fn ownership_missing_tag() {
        assert!(!belongs_to(&TagMap::new(), "app1"));
    }

    #[test]
    fn revision_parses_back_from_tag() {
        let tags = tags_for("map-1", 42);
        assert_eq!(revision_from_tags(&tags), Some(42));
    }

    #[test]
    fn revision_parse_tolerates_separator_in_id() {
        // Deployment ids may themselves contain the separator; the revision
        // is whatever follows the last one.
        let mut tags = TagMap::new();
        tags.insert(DEPLOYMENT_TAG.to_string(), "a__b__9".to_string());
        assert_eq!(revision_from_tags(&tags), Some(9));
    }

    #[test]
    fn revision_parse_rejects_garbage() {
        let mut tags = TagMap::new();
        tags.insert(DEPLOYMENT_TAG.to_string(), "no-separator".to_string());
        assert_eq!(revision_from_tags(&tags), None);
        tags.insert(DEPLOYMENT_TAG.to_string(), "app__notanumber".to_string());
        assert_eq!(revision_from_tags(&tags), None);
    }

    #[test]
    fn new_revision_tags_blue_green() {
        let tags = tags_for_new_revision("map-1", 5, 1234, true);
        assert_eq!(tags.get(BG_STATE_TAG).map(String::as_str), Some(BG_GREEN));
        assert_eq!(created_at_from_tags(&tags), Some(1234));
        assert!(!is_blue(&tags));
    }

    #[test]
    fn new_revision_tags_plain() {
        let tags = tags_for_new_revision("map-1", 5, 1234, false);
        assert!(!tags.contains_key(BG_STATE_TAG));
    }
}
