//! Values overlays pointing charts at mirrored images
//!
//! Given the chart's default values and the public to private image mapping,
//! [`rewrite`] produces a sparse overlay: a document that only carries the
//! `repository`/`tag` pairs that must change. Helm merges it over the
//! defaults at install time.

use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};
use std::path::Path;

use crate::document::{PathSegment, display_path, walk_mapping_strings};
use crate::error::{CoreError, Result};
use crate::reference::ImageReference;

/// One rewritten location in the values document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    /// Dotted path of the mapping that received `repository` and `tag`
    pub path: String,
    pub public: ImageReference,
    pub private: ImageReference,
}

/// Sparse overlay produced by [`rewrite`]
#[derive(Debug, Clone)]
pub struct ValuesOverlay {
    document: Value,
    rewrites: Vec<Rewrite>,
    skipped: Vec<String>,
}

impl ValuesOverlay {
    fn new() -> Self {
        Self {
            document: Value::Mapping(Mapping::new()),
            rewrites: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn rewrites(&self) -> &[Rewrite] {
        &self.rewrites
    }

    /// Paths of matches that could not be expressed in a sparse overlay
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.rewrites.is_empty()
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.document)?)
    }

    /// Write the overlay to disk
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }
}

/// Load a values document, treating an empty file as an empty mapping
pub fn load_values(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_yaml::from_str(&content)?;
    Ok(match value {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    })
}

/// Compute the overlay redirecting every matched image to its private copy
///
/// Only pairs with equal basenames are considered. A string entry matches when
/// its repository portion equals the public repository path, with or without
/// the registry host. The parent mapping of each match receives
/// `{repository, tag}` of the private reference. Matches under a sequence or
/// at the top level are skipped.
pub fn rewrite(values: &Value, mapping: &IndexMap<ImageReference, ImageReference>) -> ValuesOverlay {
    let mut overlay = ValuesOverlay::new();

    for (public, private) in mapping {
        if public.basename() != private.basename() {
            continue;
        }

        let mut matches: Vec<Vec<PathSegment>> = Vec::new();
        walk_mapping_strings(values, &mut |path, value| {
            if matches_repository(value, public) {
                matches.push(path.to_vec());
            }
        });

        for path in matches {
            let parent = &path[..path.len() - 1];
            let Some(keys) = mapping_keys(parent) else {
                let location = display_path(&path);
                tracing::warn!(
                    path = %location,
                    image = %public,
                    "image reference cannot be overridden by a sparse overlay, skipping"
                );
                overlay.skipped.push(location);
                continue;
            };

            set_image(&mut overlay.document, &keys, private);

            let location = keys.join(".");
            if !overlay.rewrites.iter().any(|r| r.path == location && &r.public == public) {
                overlay.rewrites.push(Rewrite {
                    path: location,
                    public: public.clone(),
                    private: private.clone(),
                });
            }
        }
    }

    overlay
}

/// Repository portion of a string: text before `@` and before a trailing `:tag`
fn repository_portion(value: &str) -> &str {
    let without_digest = value.split('@').next().unwrap_or(value);
    match without_digest.rfind(':') {
        Some(idx) if without_digest.rfind('/').is_none_or(|slash| idx > slash) => {
            &without_digest[..idx]
        }
        _ => without_digest,
    }
}

fn matches_repository(value: &str, public: &ImageReference) -> bool {
    let candidate = repository_portion(value.trim());
    !candidate.is_empty()
        && (candidate == public.repository_path() || candidate == public.repository)
}

/// Keys of a parent path, or None when it is the root or crosses a sequence
fn mapping_keys(parent: &[PathSegment]) -> Option<Vec<String>> {
    if parent.is_empty() {
        return None;
    }
    parent
        .iter()
        .map(|segment| match segment {
            PathSegment::Key(k) => Some(k.clone()),
            PathSegment::Index(_) => None,
        })
        .collect()
}

fn set_image(document: &mut Value, keys: &[String], private: &ImageReference) {
    let target = descend(document, keys);
    if let Value::Mapping(map) = target {
        map.insert(
            Value::String("repository".to_string()),
            Value::String(private.repository_path()),
        );
        map.insert(
            Value::String("tag".to_string()),
            Value::String(private.tag_or_default().to_string()),
        );
    }
}

/// Walk (creating mappings as needed) to the value at `keys`
fn descend<'a>(value: &'a mut Value, keys: &[String]) -> &'a mut Value {
    if !value.is_mapping() {
        *value = Value::Mapping(Mapping::new());
    }
    let Some((first, rest)) = keys.split_first() else {
        return value;
    };
    let Value::Mapping(map) = value else {
        unreachable!("value was replaced by a mapping above");
    };
    let entry = map
        .entry(Value::String(first.clone()))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    descend(entry, rest)
}

/// Parse `key=value` arguments, keeping their order
pub fn parse_set_args(args: &[String]) -> Result<IndexMap<String, String>> {
    let mut parsed = IndexMap::new();
    for arg in args {
        let (key, value) = arg.split_once('=').ok_or_else(|| CoreError::Values {
            message: format!("Invalid --set format: '{}'. Expected key=value", arg),
        })?;
        if key.is_empty() {
            return Err(CoreError::Values {
                message: format!("Invalid --set format: '{}'. Key is empty", arg),
            });
        }
        parsed.insert(key.to_string(), value.to_string());
    }
    Ok(parsed)
}
