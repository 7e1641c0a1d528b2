//! Container image references
//!
//! Parses `[registry/]repository[:tag][@digest]` the way container engines do:
//! the first path segment is only treated as a registry host when it looks
//! like one (contains a dot or a port, or is `localhost`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Tag assumed by container engines when a reference carries none
pub const DEFAULT_TAG: &str = "latest";

/// A parsed container image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string
    pub fn parse(s: &str) -> Result<Self> {
        let clean = s.trim();
        let invalid = |reason: &str| CoreError::InvalidImageReference {
            reference: s.to_string(),
            reason: reason.to_string(),
        };

        if clean.is_empty() {
            return Err(invalid("empty reference"));
        }
        if clean.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }

        let (name_tag, digest) = match clean.split_once('@') {
            Some((_, "")) => return Err(invalid("empty digest")),
            Some((n, d)) => (n, Some(d.to_string())),
            None => (clean, None),
        };

        // A colon only introduces a tag when it follows the last path separator,
        // otherwise it belongs to a registry port.
        let (name, tag) = match name_tag.rfind(':') {
            Some(idx) if name_tag.rfind('/').is_none_or(|slash| idx > slash) => {
                let tag = &name_tag[idx + 1..];
                if tag.is_empty() {
                    return Err(invalid("empty tag"));
                }
                (&name_tag[..idx], Some(tag.to_string()))
            }
            _ => (name_tag, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if looks_like_host(first) => (Some(first.to_string()), rest),
            _ => (None, name),
        };

        if repository.is_empty() || repository.ends_with('/') {
            return Err(invalid("empty repository"));
        }

        Ok(Self {
            registry,
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// Copy of this reference with any digest pin removed
    #[must_use]
    pub fn without_digest(&self) -> Self {
        Self {
            digest: None,
            ..self.clone()
        }
    }

    /// Tag, or `latest` when the reference is untagged
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// Last path segment of the repository (`bitnami/nginx` -> `nginx`)
    pub fn basename(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }

    /// Registry host, if the reference names one
    pub fn registry_host(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    /// Registry-qualified repository without tag or digest
    pub fn repository_path(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, self.repository),
            None => self.repository.clone(),
        }
    }

    /// Where this image lives once mirrored for `chart` into `private_registry`
    ///
    /// `docker.io/bitnami/nginx:1.25` mirrored for chart `web` into
    /// `123.dkr.ecr.eu-west-1.amazonaws.com` becomes
    /// `123.dkr.ecr.eu-west-1.amazonaws.com/web/nginx:1.25`.
    #[must_use]
    pub fn mirrored_into(&self, private_registry: &str, chart: &str) -> Self {
        Self {
            registry: Some(private_registry.trim_end_matches('/').to_string()),
            repository: format!("{}/{}", chart, self.basename()),
            tag: Some(self.tag_or_default().to_string()),
            digest: None,
        }
    }
}

fn looks_like_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repository_path())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl FromStr for ImageReference {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ImageReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ImageReference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
