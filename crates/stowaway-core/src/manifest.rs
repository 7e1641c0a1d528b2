//! Chart reference manifests
//!
//! A manifest is an application-set document whose first cluster generator
//! carries the chart coordinates:
//!
//! ```yaml
//! spec:
//!   generators:
//!     - merge:
//!         generators:
//!           - clusters:
//!               values:
//!                 addonChart: karpenter
//!                 addonChartVersion: 1.0.1
//!                 addonChartRepository: public.ecr.aws
//!                 addonChartRepositoryNamespace: karpenter
//! ```
//!
//! Mirrored manifests are produced by editing the two rewritten lines in
//! place, so comments and formatting elsewhere survive untouched.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chart::ChartReference;
use crate::document::{PathSegment, get_path, parse_stream, scalar_to_string};
use crate::error::{CoreError, Result};

pub const CHART_KEY: &str = "addonChart";
pub const VERSION_KEY: &str = "addonChartVersion";
pub const REPOSITORY_KEY: &str = "addonChartRepository";
pub const NAMESPACE_KEY: &str = "addonChartRepositoryNamespace";
pub const RELEASE_NAME_KEY: &str = "addonChartReleaseName";

/// Block-style line: indentation, sequence dashes, then an optional `key:`
static YAML_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?P<indent>[ \t]*)(?P<items>(?:-(?:[ \t]+|$))*)(?:(?P<key>"[^"]*"|'[^']*'|[^\s#'"][^:#]*?)[ \t]*:(?:[ \t]+|$))?"#)
        .expect("valid regex")
});

/// `spec.generators[0].merge.generators[0].clusters.values`
fn values_path() -> Vec<PathSegment> {
    vec![
        PathSegment::Key("spec".to_string()),
        PathSegment::Key("generators".to_string()),
        PathSegment::Index(0),
        PathSegment::Key("merge".to_string()),
        PathSegment::Key("generators".to_string()),
        PathSegment::Index(0),
        PathSegment::Key("clusters".to_string()),
        PathSegment::Key("values".to_string()),
    ]
}

/// A manifest file and the chart it references
#[derive(Debug, Clone)]
pub struct AppManifest {
    /// Location on disk
    pub path: PathBuf,
    /// Path relative to the manifests directory
    pub relative: PathBuf,
    /// Raw file contents
    pub content: String,
    /// Chart coordinates read from the manifest
    pub chart: ChartReference,
}

impl AppManifest {
    /// Load a manifest
    ///
    /// Returns `Ok(None)` when the file is valid YAML but does not carry the
    /// chart coordinates (not every application set references a chart).
    pub fn load(path: &Path, root: &Path) -> Result<Option<Self>> {
        let content = std::fs::read_to_string(path)?;
        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();

        let chart = match Self::parse_chart(&content) {
            Ok(Some(chart)) => chart,
            Ok(None) => {
                tracing::info!(path = %path.display(), "manifest has no chart reference, skipping");
                return Ok(None);
            }
            Err(e) => {
                return Err(CoreError::InvalidManifest {
                    path: path.display().to_string(),
                    message: e.to_string(),
                });
            }
        };

        Ok(Some(Self {
            path: path.to_path_buf(),
            relative,
            content,
            chart,
        }))
    }

    /// Extract the chart reference from manifest text
    pub fn parse_chart(content: &str) -> Result<Option<ChartReference>> {
        let documents = parse_stream(content)?;
        let Some(document) = documents.first() else {
            return Ok(None);
        };
        let Some(values) = get_path(document, &values_path()) else {
            return Ok(None);
        };

        let field = |key: &str| values.get(key).and_then(scalar_to_string);

        let (Some(name), Some(version), Some(repository)) =
            (field(CHART_KEY), field(VERSION_KEY), field(REPOSITORY_KEY))
        else {
            return Ok(None);
        };

        Ok(Some(ChartReference {
            name,
            version,
            repository,
            namespace: field(NAMESPACE_KEY).unwrap_or_default(),
            release_name: field(RELEASE_NAME_KEY).unwrap_or_default(),
        }))
    }

    /// Manifest text pointing at the mirrored chart
    ///
    /// Only the version and repository values under the first generator are
    /// replaced in place. The result is parsed again to check the chart
    /// coordinates carry the new values.
    pub fn rewrite(&self, version: &str, repository: &str) -> Result<String> {
        let invalid = |message: String| CoreError::InvalidManifest {
            path: self.path.display().to_string(),
            message,
        };

        let spans = locate_scalars(&self.content, &values_path(), &[VERSION_KEY, REPOSITORY_KEY]);
        let [Some(version_span), Some(repository_span)] = spans.as_slice() else {
            return Err(invalid("chart version and repository must be block-style lines".to_string()));
        };

        let mut edits = vec![
            (version_span.clone(), quote(version)),
            (repository_span.clone(), quote(repository)),
        ];
        edits.sort_by_key(|(range, _)| std::cmp::Reverse(range.start));

        let mut replaced = self.content.clone();
        for (range, text) in edits {
            let text = if range.is_empty() && !replaced[..range.start].ends_with([' ', '\t']) {
                format!(" {}", text)
            } else {
                text
            };
            replaced.replace_range(range, &text);
        }

        let output = if replaced.trim_start().starts_with("---") {
            replaced
        } else {
            format!("---\n{}", replaced)
        };

        let reparsed = Self::parse_chart(&output)
            .map_err(|e| invalid(format!("rewritten manifest does not parse: {}", e)))?
            .ok_or_else(|| invalid("rewritten manifest lost its chart reference".to_string()))?;

        if reparsed.version != version || reparsed.repository != repository {
            return Err(invalid(format!(
                "rewritten manifest carries {}@{} instead of {}@{}",
                reparsed.repository, reparsed.version, repository, version
            )));
        }

        Ok(output)
    }

    /// Write the rewritten manifest under `output_root`, mirroring its
    /// location below the manifests directory
    pub fn write_mirrored(&self, output_root: &Path, version: &str, repository: &str) -> Result<PathBuf> {
        let content = self.rewrite(version, repository)?;
        let target = output_root.join(&self.relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, content)?;
        tracing::info!(path = %target.display(), "wrote mirrored manifest");
        Ok(target)
    }
}

/// Position of a node while following block indentation
struct Frame {
    column: usize,
    segment: PathSegment,
}

/// Byte ranges of the scalar values of `keys` sitting directly under `path`
/// in the first document, first occurrence each
///
/// Lines are followed by their indentation, so only block-style nodes are
/// found; a key written in flow style yields `None`.
fn locate_scalars(content: &str, path: &[PathSegment], keys: &[&str]) -> Vec<Option<Range<usize>>> {
    let mut found = vec![None; keys.len()];
    let mut stack: Vec<Frame> = Vec::new();
    let mut block_scalar: Option<usize> = None;
    let mut seen_content = false;
    let mut offset = 0;

    for raw in content.split_inclusive('\n') {
        let line_start = offset;
        offset += raw.len();
        let line = raw.trim_end_matches(['\n', '\r']);
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();

        if let Some(column) = block_scalar {
            if trimmed.is_empty() || indent > column {
                continue;
            }
            block_scalar = None;
        }
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if indent == 0 && (line == "---" || line.starts_with("--- ") || line == "...") {
            if seen_content {
                break;
            }
            continue;
        }
        seen_content = true;

        let Some(caps) = YAML_LINE.captures(line) else {
            continue;
        };
        if let Some(items) = caps.name("items") {
            for (i, _) in items.as_str().match_indices('-') {
                push_item(&mut stack, items.start() + i);
            }
        }
        let Some(key) = caps.name("key") else {
            continue;
        };

        let column = key.start();
        while stack.last().is_some_and(|frame| frame.column >= column) {
            stack.pop();
        }
        let name = key.as_str().trim_matches(['"', '\'']);
        let value_start = caps.get(0).map_or(line.len(), |m| m.end());
        let value = &line[value_start..];

        if let Some(i) = keys.iter().position(|k| *k == name) {
            let at_path = stack.len() == path.len() && stack.iter().zip(path).all(|(f, p)| &f.segment == p);
            if found[i].is_none() && at_path {
                let span = scalar_span(value);
                let base = line_start + value_start;
                found[i] = Some(base + span.start..base + span.end);
            }
        }

        if value.trim_start().starts_with(['|', '>']) {
            block_scalar = Some(column);
        }
        stack.push(Frame {
            column,
            segment: PathSegment::Key(name.to_string()),
        });
    }

    found
}

/// Enter a sequence item whose dash is at `column`
fn push_item(stack: &mut Vec<Frame>, column: usize) {
    let mut index = 0;
    while let Some(frame) = stack.last() {
        if frame.column > column {
            stack.pop();
        } else if frame.column == column {
            if let PathSegment::Index(previous) = frame.segment {
                index = previous + 1;
                stack.pop();
            }
            break;
        } else {
            break;
        }
    }
    stack.push(Frame {
        column,
        segment: PathSegment::Index(index),
    });
}

/// Range of the scalar token in the text following `key:`, trailing
/// comment excluded; empty at the token position when there is no value
fn scalar_span(value: &str) -> Range<usize> {
    let start = value.len() - value.trim_start().len();
    let rest = &value[start..];
    let len = match rest.chars().next() {
        None | Some('#') => 0,
        Some('"') => closing_quote(rest, b'"'),
        Some('\'') => closing_quote(rest, b'\''),
        Some(_) => {
            let cut = rest.find(" #").or_else(|| rest.find("\t#")).unwrap_or(rest.len());
            rest[..cut].trim_end().len()
        }
    };
    start..start + len
}

/// Length of a quoted scalar including both quotes
fn closing_quote(rest: &str, quote: u8) -> usize {
    let bytes = rest.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if quote == b'"' => i += 2,
            b if b == quote => {
                // '' is an escaped quote inside single quotes
                if quote == b'\'' && bytes.get(i + 1) == Some(&b'\'') {
                    i += 2;
                } else {
                    return i + 1;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Double-quoted YAML scalar
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Find manifest files below `dir` whose path contains `selector`
///
/// Only `.yaml` and `.yml` files are considered. Results are sorted so runs
/// are reproducible.
pub fn discover_manifests(dir: &Path, selector: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(CoreError::ManifestDirNotFound {
            path: dir.display().to_string(),
        });
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|e| CoreError::Io(std::io::Error::other(e.to_string())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if is_yaml && path.to_string_lossy().contains(selector) {
            found.push(path.to_path_buf());
        }
    }

    found.sort();
    Ok(found)
}

/// Load every manifest matching `selector`, skipping the ones without a
/// chart reference
pub fn load_manifests(dir: &Path, selector: &str) -> Result<Vec<AppManifest>> {
    let mut manifests = Vec::new();
    for path in discover_manifests(dir, selector)? {
        match AppManifest::load(&path, dir) {
            Ok(Some(manifest)) => manifests.push(manifest),
            Ok(None) => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "unable to read manifest, skipping"),
        }
    }
    Ok(manifests)
}
