//! Typed version selectors.
//!
//! Read operations accept either a concrete version id or a tag name; the
//! CLI parses the argument once into a [`VersionQuery`] and everything below
//! works with the typed form.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

/// Named aliases that resolve to at most one version within a package.
///
/// `latest` always aliases the highest surviving version and is maintained
/// by the coordinator; `live` is only ever moved by operator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tag {
    Live,
    Latest,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Live => "live",
            Tag::Latest => "latest",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(Tag::Live),
            "latest" => Ok(Tag::Latest),
            other => Err(anyhow!(
                "unknown tag '{}'. Expected 'live' or 'latest'.",
                other
            )),
        }
    }
}

/// A version argument as the user writes it: `3`, `live` or `latest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionQuery {
    Id(u64),
    Tag(Tag),
}

impl fmt::Display for VersionQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionQuery::Id(id) => write!(f, "{}", id),
            VersionQuery::Tag(tag) => write!(f, "{}", tag),
        }
    }
}

impl FromStr for VersionQuery {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<u64>() {
            return Ok(VersionQuery::Id(id));
        }
        match s.parse::<Tag>() {
            Ok(tag) => Ok(VersionQuery::Tag(tag)),
            Err(_) => Err(anyhow!(
                "invalid version '{}'. Expected a version id, 'live' or 'latest'.",
                s
            )),
        }
    }
}
