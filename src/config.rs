//! Tool configuration.
//!
//! A single explicit [`Config`] value is built once in `main` and passed by
//! reference into the store factories; nothing reads process-wide state
//! after startup. An optional `config.json` under the root overrides the
//! store selection.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;

use crate::store::StoreKind;

/// Directory under the home directory used when no root is given.
pub const DEFAULT_ROOT_DIR: &str = ".vpak";

/// Name of the optional configuration file under the root.
pub const CONFIG_FILE: &str = "config.json";

/// The on-disk configuration file. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    metadata_store: StoreKind,
    blob_store: StoreKind,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory holding both store trees and `config.json`.
    pub root: PathBuf,
    pub metadata_store: StoreKind,
    pub blob_store: StoreKind,
}

impl Config {
    /// Build the configuration: explicit root override when given,
    /// `~/.vpak` otherwise, with `config.json` applied on top if present.
    pub fn load(root: Option<PathBuf>) -> Result<Self> {
        let root = match root {
            Some(path) => path,
            None => default_root()?,
        };

        let config_path = root.join(CONFIG_FILE);
        let file = if config_path.exists() {
            debug!("Loading configuration from {:?}", config_path);
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {:?}", config_path))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {:?}", config_path))?
        } else {
            ConfigFile::default()
        };

        Ok(Self {
            root,
            metadata_store: file.metadata_store,
            blob_store: file.blob_store,
        })
    }

    /// Configuration rooted at `root` with default store kinds.
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            metadata_store: StoreKind::default(),
            blob_store: StoreKind::default(),
        }
    }

    /// Directory tree of the metadata index.
    pub fn meta_root(&self) -> PathBuf {
        self.root.join("meta")
    }

    /// Directory tree of the blob store.
    pub fn blob_root(&self) -> PathBuf {
        self.root.join("blobs")
    }
}

fn default_root() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_ROOT_DIR))
        .context("Could not determine the home directory; pass --root")
}
