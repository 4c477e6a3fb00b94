//! JSON-file metadata index.
//!
//! One `meta.json` per (role, package) under the metadata root:
//! `<root>/<role>/<name>/meta.json`. Every mutation rewrites the file
//! through a temp file and rename, so readers never observe a half-written
//! index and concurrent invocations serialize on the final atomic replace.
//! The package file is kept once created: its `next_version` counter is
//! what guarantees ids are never reused, even after the last version of a
//! package is deleted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use tokio::fs;

use super::MetadataStore;
use crate::package::{PackageMeta, Tag, VersionMeta, VersionQuery};

pub struct JsonFileMetadataStore {
    root: PathBuf,
}

impl JsonFileMetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn package_dir(&self, role: &str, name: &str) -> PathBuf {
        self.root.join(role).join(name)
    }

    fn meta_path(&self, role: &str, name: &str) -> PathBuf {
        self.package_dir(role, name).join("meta.json")
    }

    async fn load(&self, role: &str, name: &str) -> Result<Option<PackageMeta>> {
        let path = self.meta_path(role, name);
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let meta = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse metadata at {:?}", path))?;
                Ok(Some(meta))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(anyhow::Error::from(e).context(format!("Failed to read metadata at {:?}", path)))
            }
        }
    }

    async fn save(&self, role: &str, name: &str, meta: &PackageMeta) -> Result<()> {
        let path = self.meta_path(role, name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(meta)?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json.as_bytes())
            .await
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("Failed to replace {:?}", path))?;
        Ok(())
    }

    /// Names of the immediate subdirectories of `dir`, sorted. A missing
    /// directory is an empty listing, not an error.
    async fn subdirs(&self, dir: &Path) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(anyhow::Error::from(e).context(format!("Failed to list {:?}", dir)));
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl MetadataStore for JsonFileMetadataStore {
    async fn add_pkg_meta(
        &self,
        role: &str,
        name: &str,
        location: &str,
        description: &str,
        extra: &BTreeMap<String, String>,
    ) -> Result<u64> {
        let mut meta = self.load(role, name).await?.unwrap_or_default();
        let version = meta.commit(location, description, extra);
        self.save(role, name, &meta).await?;
        debug!("Committed {}/{} version {} -> {}", role, name, version, location);
        Ok(version)
    }

    async fn get_pkg_meta(
        &self,
        role: &str,
        name: &str,
        query: &VersionQuery,
    ) -> Result<Option<VersionMeta>> {
        Ok(self
            .load(role, name)
            .await?
            .and_then(|meta| meta.resolve(query).cloned()))
    }

    async fn get_pkg_location(
        &self,
        role: &str,
        name: &str,
        query: &VersionQuery,
    ) -> Result<Option<String>> {
        Ok(self
            .get_pkg_meta(role, name, query)
            .await?
            .map(|meta| meta.location))
    }

    async fn delete_pkg_meta(&self, role: &str, name: &str, version: u64) -> Result<bool> {
        let Some(mut meta) = self.load(role, name).await? else {
            return Ok(false);
        };
        if meta.remove(version).is_none() {
            return Ok(false);
        }
        self.save(role, name, &meta).await?;
        debug!("Removed {}/{} version {}", role, name, version);
        Ok(true)
    }

    async fn get_roles(&self) -> Result<Vec<String>> {
        self.subdirs(&self.root).await
    }

    async fn get_packages(&self, role: &str) -> Result<Vec<String>> {
        let role_dir = self.root.join(role);
        let mut packages = Vec::new();
        for name in self.subdirs(&role_dir).await? {
            // Only directories that actually hold an index are packages
            if fs::try_exists(role_dir.join(&name).join("meta.json")).await? {
                packages.push(name);
            }
        }
        Ok(packages)
    }

    async fn get_versions(&self, role: &str, name: &str) -> Result<Vec<u64>> {
        Ok(self
            .load(role, name)
            .await?
            .map(|meta| meta.versions.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn set_tag(&self, tag: Tag, role: &str, name: &str, version: u64) -> Result<bool> {
        let Some(mut meta) = self.load(role, name).await? else {
            return Ok(false);
        };
        if !meta.versions.contains_key(&version) {
            return Ok(false);
        }
        meta.tags.insert(tag.as_str().to_string(), version);
        self.save(role, name, &meta).await?;
        debug!("Tag {} on {}/{} -> {}", tag, role, name, version);
        Ok(true)
    }

    async fn unset_tag(&self, tag: Tag, role: &str, name: &str) -> Result<bool> {
        let Some(mut meta) = self.load(role, name).await? else {
            return Ok(false);
        };
        if meta.tags.remove(tag.as_str()).is_none() {
            return Ok(false);
        }
        self.save(role, name, &meta).await?;
        debug!("Tag {} removed from {}/{}", tag, role, name);
        Ok(true)
    }
}
