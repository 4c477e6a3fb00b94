//! Error taxonomy for coordinator operations.
//!
//! Every failure a caller can react to differently gets its own variant, so
//! the CLI (or an orchestration layer driving the coordinator) can decide
//! whether to retry, run `clean`, or escalate. The coordinator itself never
//! retries; transient-vs-permanent classification belongs to the backing
//! stores.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackerError {
    /// The blob store rejected or could not complete an upload. No metadata
    /// was written.
    #[error("failed to upload blob for {role}/{name}")]
    Upload {
        role: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The blob store could not retrieve data for a committed location.
    /// Signals a broken reference; `clean` will report it.
    #[error("failed to download blob {location} for {role}/{name}")]
    Download {
        role: String,
        name: String,
        location: String,
        #[source]
        source: anyhow::Error,
    },

    /// A metadata write was rejected. When this happens on the commit step
    /// of `add`, the already-uploaded blob is an orphan until `clean`
    /// collects it.
    #[error("failed to write metadata for {role}/{name}")]
    MetadataCommit {
        role: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The metadata index could not be read.
    #[error("failed to read metadata for {role}/{name}")]
    MetadataRead {
        role: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// A version record could not be removed from the metadata index.
    #[error("failed to delete metadata for {role}/{name} version {version}")]
    MetadataDelete {
        role: String,
        name: String,
        version: u64,
        #[source]
        source: anyhow::Error,
    },

    /// The requested package, version or tag does not exist. Also covers
    /// losing a race against a concurrent delete.
    #[error("package {role}/{name} version {version} not found")]
    NotFound {
        role: String,
        name: String,
        version: String,
    },

    /// The target version is tagged `live` and cannot be deleted.
    #[error("{role}/{name} version {version} is live and cannot be deleted")]
    LiveVersion {
        role: String,
        name: String,
        version: u64,
    },

    /// The two stores disagree in a way a reconciliation pass could not
    /// resolve.
    #[error("store inconsistency: {0}")]
    Inconsistency(String),
}
