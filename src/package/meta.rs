//! Version records persisted by the metadata store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Tag, VersionQuery};

/// Metadata for a single committed version.
///
/// Immutable once committed: changing content means adding a new version.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VersionMeta {
    pub version: u64,
    /// Opaque blob store location holding the version's content.
    pub location: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// The per-package index record: committed versions, tag aliases and the id
/// allocation counter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PackageMeta {
    #[serde(default)]
    pub versions: BTreeMap<u64, VersionMeta>,
    /// Tag name -> version id. At most one version per tag.
    #[serde(default)]
    pub tags: BTreeMap<String, u64>,
    /// Next id to hand out. Only ever advances, so ids are never reused
    /// even after the version they named is deleted.
    #[serde(default = "first_version_id")]
    pub next_version: u64,
}

fn first_version_id() -> u64 {
    1
}

impl Default for PackageMeta {
    fn default() -> Self {
        Self {
            versions: BTreeMap::new(),
            tags: BTreeMap::new(),
            next_version: first_version_id(),
        }
    }
}

impl PackageMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a new version record, advancing the id counter and pointing
    /// `latest` at it in the same step. The new id is always the maximum,
    /// so `latest` stays the highest committed version.
    pub fn commit(
        &mut self,
        location: &str,
        description: &str,
        extra: &BTreeMap<String, String>,
    ) -> u64 {
        let version = self.next_version;
        self.next_version += 1;
        self.versions.insert(
            version,
            VersionMeta {
                version,
                location: location.to_string(),
                description: description.to_string(),
                extra: extra.clone(),
            },
        );
        self.tags.insert(Tag::Latest.as_str().to_string(), version);
        version
    }

    /// Remove a version record along with any tags still pointing at it.
    /// Returns the removed record, or `None` if it was already gone.
    pub fn remove(&mut self, version: u64) -> Option<VersionMeta> {
        let removed = self.versions.remove(&version);
        if removed.is_some() {
            self.tags.retain(|_, v| *v != version);
        }
        removed
    }

    /// Resolve a version id or tag to its record.
    pub fn resolve(&self, query: &VersionQuery) -> Option<&VersionMeta> {
        match query {
            VersionQuery::Id(id) => self.versions.get(id),
            VersionQuery::Tag(tag) => self
                .tags
                .get(tag.as_str())
                .and_then(|id| self.versions.get(id)),
        }
    }

    /// Highest committed version id, if any versions remain.
    pub fn highest_version(&self) -> Option<u64> {
        self.versions.keys().next_back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_extra() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn test_commit_assigns_monotonic_ids() {
        let mut meta = PackageMeta::new();
        assert_eq!(meta.commit("loc-1", "first", &no_extra()), 1);
        assert_eq!(meta.commit("loc-2", "second", &no_extra()), 2);
        assert_eq!(meta.highest_version(), Some(2));
    }

    #[test]
    fn test_commit_moves_latest() {
        let mut meta = PackageMeta::new();
        meta.commit("loc-1", "", &no_extra());
        meta.commit("loc-2", "", &no_extra());

        let latest = meta.resolve(&VersionQuery::Tag(Tag::Latest)).unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.location, "loc-2");
    }

    #[test]
    fn test_ids_are_never_reused_after_remove() {
        let mut meta = PackageMeta::new();
        meta.commit("loc-1", "", &no_extra());
        meta.commit("loc-2", "", &no_extra());
        meta.remove(2);

        // A fresh commit must not resurrect id 2
        assert_eq!(meta.commit("loc-3", "", &no_extra()), 3);
    }

    #[test]
    fn test_remove_clears_dangling_tags() {
        let mut meta = PackageMeta::new();
        meta.commit("loc-1", "", &no_extra());
        meta.tags.insert(Tag::Live.as_str().to_string(), 1);

        meta.remove(1);
        assert!(meta.tags.is_empty());
        assert!(meta.resolve(&VersionQuery::Tag(Tag::Live)).is_none());
    }

    #[test]
    fn test_remove_absent_is_none() {
        let mut meta = PackageMeta::new();
        meta.commit("loc-1", "", &no_extra());
        assert!(meta.remove(9).is_none());
        assert_eq!(meta.versions.len(), 1);
    }

    #[test]
    fn test_resolve_by_id_and_tag() {
        let mut meta = PackageMeta::new();
        let mut extra = BTreeMap::new();
        extra.insert("arch".to_string(), "x86_64".to_string());
        meta.commit("loc-1", "desc", &extra);

        let by_id = meta.resolve(&VersionQuery::Id(1)).unwrap();
        assert_eq!(by_id.description, "desc");
        assert_eq!(by_id.extra.get("arch").unwrap(), "x86_64");
        assert!(meta.resolve(&VersionQuery::Id(2)).is_none());
        assert!(meta.resolve(&VersionQuery::Tag(Tag::Live)).is_none());
    }

    #[test]
    fn test_serde_defaults_for_missing_fields() {
        // Records written before a field existed must still load
        let meta: PackageMeta = serde_json::from_str("{}").unwrap();
        assert!(meta.versions.is_empty());
        assert_eq!(meta.next_version, 1);
    }

    #[test]
    fn test_round_trips_through_json() {
        let mut meta = PackageMeta::new();
        let mut extra = BTreeMap::new();
        extra.insert("os".to_string(), "linux".to_string());
        meta.commit("loc-1", "first", &extra);

        let json = serde_json::to_string_pretty(&meta).unwrap();
        let loaded: PackageMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, meta);
    }
}
