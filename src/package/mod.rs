//! Package data model
//!
//! This module provides the version records persisted by the metadata
//! store, the typed version selectors used by the read operations, and the
//! package URI returned by `add`.

mod meta;
mod query;
mod uri;

pub use meta::{PackageMeta, VersionMeta};
pub use query::{Tag, VersionQuery};
pub use uri::PackageUri;
