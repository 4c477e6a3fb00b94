//! Package URIs.
//!
//! `add` returns a URI identifying exactly the committed version:
//! `<scheme>://<role>/<name>/<version>[?key=value&...]`. The extra
//! attributes are rendered in sorted key order, so the string is
//! deterministic for a given record and parses back into its parts.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageUri {
    pub scheme: String,
    pub role: String,
    pub name: String,
    pub version: u64,
    pub extra: BTreeMap<String, String>,
}

impl PackageUri {
    pub fn new(
        scheme: &str,
        role: &str,
        name: &str,
        version: u64,
        extra: BTreeMap<String, String>,
    ) -> Self {
        Self {
            scheme: scheme.to_string(),
            role: role.to_string(),
            name: name.to_string(),
            version,
            extra,
        }
    }
}

impl fmt::Display for PackageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/{}/{}",
            self.scheme, self.role, self.name, self.version
        )?;
        for (i, (key, value)) in self.extra.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, key, value)?;
        }
        Ok(())
    }
}

impl FromStr for PackageUri {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| anyhow!("invalid package uri '{}': missing scheme", s))?;
        if scheme.is_empty() {
            bail!("invalid package uri '{}': empty scheme", s);
        }

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let mut parts = path.splitn(3, '/');
        let (role, name, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(role), Some(name), Some(version))
                if !role.is_empty() && !name.is_empty() =>
            {
                (role, name, version)
            }
            _ => bail!(
                "invalid package uri '{}': expected <scheme>://<role>/<name>/<version>",
                s
            ),
        };
        let version = version
            .parse::<u64>()
            .map_err(|_| anyhow!("invalid package uri '{}': bad version '{}'", s, version))?;

        let mut extra = BTreeMap::new();
        if let Some(query) = query {
            for pair in query.split('&') {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow!("invalid package uri '{}': bad query '{}'", s, pair))?;
                extra.insert(key.to_string(), value.to_string());
            }
        }

        Ok(PackageUri::new(scheme, role, name, version, extra))
    }
}
