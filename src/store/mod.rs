//! Storage abstractions behind the coordinator.
//!
//! Two independently-failing systems back every package: a metadata index
//! and a blob store. Both are modeled as object-safe async traits so
//! concrete backends are constructed behind the factory functions below and
//! injected into the coordinator at construction; tests inject mockall
//! mocks instead. The coordinator never reaches around these traits.

mod jsonmeta;
mod localfs;

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;

pub use jsonmeta::JsonFileMetadataStore;
pub use localfs::LocalFsBlobStore;

use crate::config::Config;
use crate::package::{PackageUri, Tag, VersionMeta, VersionQuery};

/// Authoritative index of roles -> packages -> versions -> tags.
///
/// Implementations must make per-package writes atomic: `add_pkg_meta` must
/// allocate ids that never collide under concurrent calls on the same
/// package, and tag updates must be single-key atomic writes so racing
/// invocations serialize here, not in the coordinator. Calls are expected to
/// complete within store-default timeouts; a timeout is an error like any
/// other, never a half-applied write.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Commit a new version record and return its id. The `latest` tag
    /// advances together with the commit.
    async fn add_pkg_meta(
        &self,
        role: &str,
        name: &str,
        location: &str,
        description: &str,
        extra: &BTreeMap<String, String>,
    ) -> Result<u64>;

    /// Look up a version record by id or tag. Absent is `None`, not an error.
    async fn get_pkg_meta(
        &self,
        role: &str,
        name: &str,
        query: &VersionQuery,
    ) -> Result<Option<VersionMeta>>;

    /// Look up just the blob location of a version or tag.
    async fn get_pkg_location(
        &self,
        role: &str,
        name: &str,
        query: &VersionQuery,
    ) -> Result<Option<String>>;

    /// Remove a version record. Returns `false` if the record was already
    /// gone, e.g. when a concurrent delete won the race.
    async fn delete_pkg_meta(&self, role: &str, name: &str, version: u64) -> Result<bool>;

    /// All roles known to the index.
    async fn get_roles(&self) -> Result<Vec<String>>;

    /// All packages under a role.
    async fn get_packages(&self, role: &str) -> Result<Vec<String>>;

    /// All committed version ids of a package, ascending.
    async fn get_versions(&self, role: &str, name: &str) -> Result<Vec<u64>>;

    /// Point `tag` at `version`, displacing any previous target. Returns
    /// `false` when the version does not exist; existence is checked under
    /// the same atomic write that moves the tag.
    async fn set_tag(&self, tag: Tag, role: &str, name: &str, version: u64) -> Result<bool>;

    /// Remove `tag`. Returns `false` if it was not set.
    async fn unset_tag(&self, tag: Tag, role: &str, name: &str) -> Result<bool>;

    /// Derive the deterministic URI identifying a committed version.
    fn get_pkg_uri(
        &self,
        scheme: &str,
        role: &str,
        name: &str,
        version: u64,
        extra: &BTreeMap<String, String>,
    ) -> PackageUri {
        PackageUri::new(scheme, role, name, version, extra.clone())
    }
}

/// Content storage keyed by opaque location identifiers.
///
/// The store owns the bytes; the metadata index owns the references.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store the file at `path` and return its new opaque location.
    async fn upload(&self, path: &Path) -> Result<String>;

    /// Fetch the blob at `location` into `dest`.
    async fn download(&self, location: &str, dest: &Path) -> Result<()>;

    /// Discard the blob at `location`.
    async fn delete(&self, location: &str) -> Result<()>;

    /// Whether `location` currently holds a blob.
    async fn exists(&self, location: &str) -> Result<bool>;

    /// Every location currently held by the store, for reconciliation.
    async fn list_locations(&self) -> Result<Vec<String>>;

    /// URI scheme identifying this store kind.
    fn scheme(&self) -> &str;
}

/// Storage backend selector, parsed from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    LocalFs,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "localfs" => Ok(StoreKind::LocalFs),
            other => Err(anyhow!("unknown store kind '{}'", other)),
        }
    }
}

/// Construct the metadata store selected by `config`.
pub fn create_metadata_store(config: &Config) -> Result<Box<dyn MetadataStore>> {
    match config.metadata_store {
        StoreKind::LocalFs => Ok(Box::new(JsonFileMetadataStore::new(config.meta_root()))),
    }
}

/// Construct the blob store selected by `config`.
pub fn create_blob_store(config: &Config) -> Result<Box<dyn BlobStore>> {
    match config.blob_store {
        StoreKind::LocalFs => Ok(Box::new(LocalFsBlobStore::new(config.blob_root()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_kind_parsing() {
        assert_eq!("localfs".parse::<StoreKind>().unwrap(), StoreKind::LocalFs);
        assert!("hdfs".parse::<StoreKind>().is_err());
    }

    #[test]
    fn test_store_kind_deserialize() {
        let kind: StoreKind = serde_json::from_str("\"localfs\"").unwrap();
        assert_eq!(kind, StoreKind::LocalFs);
    }

    #[test]
    fn test_factory_builds_local_stores() {
        let config = Config::with_root(std::path::PathBuf::from("/tmp/vpak-test"));
        let meta = create_metadata_store(&config).unwrap();
        let blob = create_blob_store(&config).unwrap();
        assert_eq!(blob.scheme(), "file");
        // URI derivation is a pure function of its inputs
        let uri = meta.get_pkg_uri("file", "r", "p", 1, &BTreeMap::new());
        assert_eq!(uri.to_string(), "file://r/p/1");
    }
}
