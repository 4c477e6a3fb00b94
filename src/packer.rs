//! The package coordinator.
//!
//! [`Packer`] orchestrates every multi-step operation across the metadata
//! index and the blob store. The two stores fail independently, so each
//! operation is sequenced to keep the metadata authoritative: an
//! interrupted `add` or `delete` can leave an orphan blob behind, but a
//! record is never committed pointing at bytes that were deliberately
//! discarded. Orphans are bounded, reported, and collected by [`Packer::clean`];
//! nothing is rolled back automatically, because a rollback spanning two
//! independently-failing stores cannot itself be made atomic.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use log::{debug, info, warn};
use serde::Serialize;

use crate::error::PackerError;
use crate::package::{PackageUri, Tag, VersionMeta, VersionQuery};
use crate::store::{BlobStore, MetadataStore};

type Result<T, E = PackerError> = std::result::Result<T, E>;

/// A metadata record whose blob is missing from the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokenRef {
    pub role: String,
    pub name: String,
    pub version: u64,
    pub location: String,
    /// Live records are reported but never removed.
    pub live: bool,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanReport {
    /// Orphan blob locations that were deleted.
    pub orphans_deleted: Vec<String>,
    /// Broken references found in scope; `records_removed` lists the ones
    /// that were acted on.
    pub broken_refs: Vec<BrokenRef>,
    /// (role, name, version) records removed because their blob was missing.
    pub records_removed: Vec<(String, String, u64)>,
}

impl CleanReport {
    pub fn is_clean(&self) -> bool {
        self.orphans_deleted.is_empty() && self.broken_refs.is_empty()
    }
}

pub struct Packer {
    metastore: Box<dyn MetadataStore>,
    blobstore: Box<dyn BlobStore>,
}

impl Packer {
    pub fn new(metastore: Box<dyn MetadataStore>, blobstore: Box<dyn BlobStore>) -> Self {
        Self {
            metastore,
            blobstore,
        }
    }

    /// Upload `file` as a new version of `role`/`name` and return the URI
    /// identifying the committed version.
    #[tracing::instrument(skip(self, description, extra, file))]
    pub async fn add_version(
        &self,
        role: &str,
        name: &str,
        description: &str,
        extra: &BTreeMap<String, String>,
        file: &Path,
    ) -> Result<PackageUri> {
        // Upload first; a failure here leaves no trace in either store.
        let location =
            self.blobstore
                .upload(file)
                .await
                .map_err(|source| PackerError::Upload {
                    role: role.into(),
                    name: name.into(),
                    source,
                })?;

        // Commit the record. The blob is already durable, so a failure here
        // leaves an orphan for `clean` to collect.
        let version = match self
            .metastore
            .add_pkg_meta(role, name, &location, description, extra)
            .await
        {
            Ok(version) => version,
            Err(source) => {
                warn!(
                    "Metadata commit for {}/{} failed; blob {} is now an orphan. Run clean to reclaim it.",
                    role, name, location
                );
                return Err(PackerError::MetadataCommit {
                    role: role.into(),
                    name: name.into(),
                    source,
                });
            }
        };
        debug!("Committed {}/{} version {} -> {}", role, name, version, location);

        Ok(self
            .metastore
            .get_pkg_uri(self.blobstore.scheme(), role, name, version, extra))
    }

    /// Fetch the content of a version (or of the version a tag resolves to)
    /// into `dest`.
    #[tracing::instrument(skip(self, dest))]
    pub async fn download(
        &self,
        role: &str,
        name: &str,
        query: &VersionQuery,
        dest: &Path,
    ) -> Result<()> {
        let location = self.resolve_location(role, name, query).await?;
        self.blobstore
            .download(&location, dest)
            .await
            .map_err(|source| PackerError::Download {
                role: role.into(),
                name: name.into(),
                location,
                source,
            })?;
        Ok(())
    }

    /// Delete a version: its metadata record first, then its blob.
    ///
    /// A version tagged `live` is rejected before anything is touched.
    /// Once the record is removed the version no longer exists, whatever
    /// happens to the blob afterwards; a failed blob delete only costs
    /// storage space and is reported as a warning.
    #[tracing::instrument(skip(self))]
    pub async fn delete_version(&self, role: &str, name: &str, version: u64) -> Result<()> {
        let query = VersionQuery::Id(version);
        let location = self.resolve_location(role, name, &query).await?;

        let live = self
            .metastore
            .get_pkg_meta(role, name, &VersionQuery::Tag(Tag::Live))
            .await
            .map_err(|source| metadata_read(role, name, source))?;
        if live.is_some_and(|meta| meta.version == version) {
            return Err(PackerError::LiveVersion {
                role: role.into(),
                name: name.into(),
                version,
            });
        }

        let removed = self
            .metastore
            .delete_pkg_meta(role, name, version)
            .await
            .map_err(|source| PackerError::MetadataDelete {
                role: role.into(),
                name: name.into(),
                version,
                source,
            })?;
        if !removed {
            // A concurrent delete won the race
            return Err(not_found(role, name, &query));
        }

        self.recompute_latest(role, name).await?;

        if let Err(err) = self.blobstore.delete(&location).await {
            warn!(
                "Metadata for {}/{} version {} removed but blob {} still exists: {:#}. Run clean to reclaim it.",
                role, name, version, location, err
            );
        }
        Ok(())
    }

    /// All packages under a role.
    pub async fn list_packages(&self, role: &str) -> Result<Vec<String>> {
        self.metastore
            .get_packages(role)
            .await
            .map_err(|source| metadata_read(role, "*", source))
    }

    /// All committed version ids of a package, ascending.
    pub async fn list_versions(&self, role: &str, name: &str) -> Result<Vec<u64>> {
        self.metastore
            .get_versions(role, name)
            .await
            .map_err(|source| metadata_read(role, name, source))
    }

    /// Point the `live` tag at `version`, displacing any previous target.
    #[tracing::instrument(skip(self))]
    pub async fn set_live(&self, role: &str, name: &str, version: u64) -> Result<()> {
        let moved = self
            .metastore
            .set_tag(Tag::Live, role, name, version)
            .await
            .map_err(|source| metadata_commit(role, name, source))?;
        if !moved {
            return Err(not_found(role, name, &VersionQuery::Id(version)));
        }
        Ok(())
    }

    /// Remove the `live` tag. Returns whether a tag was actually removed;
    /// unsetting when no live version is set is a no-op, not an error.
    #[tracing::instrument(skip(self))]
    pub async fn unset_live(&self, role: &str, name: &str) -> Result<bool> {
        let removed = self
            .metastore
            .unset_tag(Tag::Live, role, name)
            .await
            .map_err(|source| metadata_commit(role, name, source))?;
        if !removed {
            debug!("No live version set for {}/{}", role, name);
        }
        Ok(removed)
    }

    /// Resolve a version id or tag to its metadata record.
    pub async fn show_version(
        &self,
        role: &str,
        name: &str,
        query: &VersionQuery,
    ) -> Result<VersionMeta> {
        self.metastore
            .get_pkg_meta(role, name, query)
            .await
            .map_err(|source| metadata_read(role, name, source))?
            .ok_or_else(|| not_found(role, name, query))
    }

    /// Resolve the version currently tagged `live`.
    pub async fn show_live(&self, role: &str, name: &str) -> Result<VersionMeta> {
        self.show_version(role, name, &VersionQuery::Tag(Tag::Live))
            .await
    }

    /// Resolve the version currently tagged `latest`.
    pub async fn show_latest(&self, role: &str, name: &str) -> Result<VersionMeta> {
        self.show_version(role, name, &VersionQuery::Tag(Tag::Latest))
            .await
    }

    /// Reconcile the metadata index against the blob store.
    ///
    /// Orphan blobs (no referencing record) are deleted; they belong to no
    /// role, so even a role-scoped pass removes them, and the referenced
    /// set is always built from the whole index. Broken references (record
    /// without blob) are reported, and removed only when `remove_broken`
    /// is set and the record is not tagged `live`. Running the pass twice
    /// with no intervening writes changes nothing the second time.
    ///
    /// The pass assumes no writer is concurrently mid-`add`: a blob
    /// uploaded but not yet committed is indistinguishable from an orphan.
    #[tracing::instrument(skip(self))]
    pub async fn clean(&self, role: Option<&str>, remove_broken: bool) -> Result<CleanReport> {
        let mut report = CleanReport::default();

        let roles = self
            .metastore
            .get_roles()
            .await
            .map_err(|source| metadata_read("*", "*", source))?;

        let mut referenced = BTreeSet::new();
        let mut broken = Vec::new();
        for scan_role in &roles {
            let in_scope = role.is_none_or(|scope| scope == scan_role.as_str());
            let packages = self
                .metastore
                .get_packages(scan_role)
                .await
                .map_err(|source| metadata_read(scan_role, "*", source))?;
            for name in packages {
                let live_version = self
                    .metastore
                    .get_pkg_meta(scan_role, &name, &VersionQuery::Tag(Tag::Live))
                    .await
                    .map_err(|source| metadata_read(scan_role, &name, source))?
                    .map(|meta| meta.version);
                let versions = self
                    .metastore
                    .get_versions(scan_role, &name)
                    .await
                    .map_err(|source| metadata_read(scan_role, &name, source))?;
                for version in versions {
                    let Some(meta) = self
                        .metastore
                        .get_pkg_meta(scan_role, &name, &VersionQuery::Id(version))
                        .await
                        .map_err(|source| metadata_read(scan_role, &name, source))?
                    else {
                        // Deleted while we were scanning; nothing to reconcile
                        continue;
                    };
                    referenced.insert(meta.location.clone());

                    let blob_exists =
                        self.blobstore.exists(&meta.location).await.map_err(|err| {
                            PackerError::Inconsistency(format!(
                                "failed to probe blob {}: {:#}",
                                meta.location, err
                            ))
                        })?;
                    if !blob_exists && in_scope {
                        broken.push(BrokenRef {
                            role: scan_role.clone(),
                            name: name.clone(),
                            version,
                            location: meta.location,
                            live: live_version == Some(version),
                        });
                    }
                }
            }
        }

        let locations = self.blobstore.list_locations().await.map_err(|err| {
            PackerError::Inconsistency(format!("failed to enumerate blob store: {:#}", err))
        })?;
        for location in locations {
            if referenced.contains(&location) {
                continue;
            }
            match self.blobstore.delete(&location).await {
                Ok(()) => {
                    info!("Deleted orphan blob {}", location);
                    report.orphans_deleted.push(location);
                }
                Err(err) => warn!("Failed to delete orphan blob {}: {:#}", location, err),
            }
        }

        for broken_ref in &broken {
            if broken_ref.live {
                warn!(
                    "{}/{} version {} is live but its blob {} is missing; left untouched",
                    broken_ref.role, broken_ref.name, broken_ref.version, broken_ref.location
                );
                continue;
            }
            if !remove_broken {
                continue;
            }
            let removed = self
                .metastore
                .delete_pkg_meta(&broken_ref.role, &broken_ref.name, broken_ref.version)
                .await
                .map_err(|source| PackerError::MetadataDelete {
                    role: broken_ref.role.clone(),
                    name: broken_ref.name.clone(),
                    version: broken_ref.version,
                    source,
                })?;
            if removed {
                self.recompute_latest(&broken_ref.role, &broken_ref.name)
                    .await?;
                info!(
                    "Removed broken record {}/{} version {}",
                    broken_ref.role, broken_ref.name, broken_ref.version
                );
                report.records_removed.push((
                    broken_ref.role.clone(),
                    broken_ref.name.clone(),
                    broken_ref.version,
                ));
            }
        }
        report.broken_refs = broken;

        Ok(report)
    }

    async fn resolve_location(
        &self,
        role: &str,
        name: &str,
        query: &VersionQuery,
    ) -> Result<String> {
        self.metastore
            .get_pkg_location(role, name, query)
            .await
            .map_err(|source| metadata_read(role, name, source))?
            .ok_or_else(|| not_found(role, name, query))
    }

    /// `latest` always aliases the highest surviving version; recomputing
    /// unconditionally keeps the tag correct after races.
    async fn recompute_latest(&self, role: &str, name: &str) -> Result<()> {
        let versions = self
            .metastore
            .get_versions(role, name)
            .await
            .map_err(|source| metadata_read(role, name, source))?;
        match versions.iter().max() {
            Some(&highest) => {
                let moved = self
                    .metastore
                    .set_tag(Tag::Latest, role, name, highest)
                    .await
                    .map_err(|source| metadata_commit(role, name, source))?;
                if !moved {
                    // The candidate vanished under us; the next write will
                    // recompute again
                    debug!("Version {} of {}/{} vanished during latest recompute", highest, role, name);
                }
            }
            None => {
                self.metastore
                    .unset_tag(Tag::Latest, role, name)
                    .await
                    .map_err(|source| metadata_commit(role, name, source))?;
            }
        }
        Ok(())
    }
}

fn metadata_read(role: &str, name: &str, source: anyhow::Error) -> PackerError {
    PackerError::MetadataRead {
        role: role.into(),
        name: name.into(),
        source,
    }
}

fn metadata_commit(role: &str, name: &str, source: anyhow::Error) -> PackerError {
    PackerError::MetadataCommit {
        role: role.into(),
        name: name.into(),
        source,
    }
}

fn not_found(role: &str, name: &str, query: &VersionQuery) -> PackerError {
    PackerError::NotFound {
        role: role.into(),
        name: name.into(),
        version: query.to_string(),
    }
}
