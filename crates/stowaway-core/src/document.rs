//! Structural walks over parsed YAML documents
//!
//! Documents are kept as [`serde_yaml::Value`], a tagged variant of scalars,
//! mappings and sequences. Walks are plain recursion carrying the path from
//! the root explicitly.

use serde::Deserialize;
use serde_yaml::Value;
use std::fmt;

use crate::error::Result;

/// One step in a path from the document root
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => f.write_str(k),
            PathSegment::Index(i) => write!(f, "[{}]", i),
        }
    }
}

/// Render a path as `a.b[0].c`
pub fn display_path(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            PathSegment::Key(k) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(k);
            }
            PathSegment::Index(i) => out.push_str(&format!("[{}]", i)),
        }
    }
    out
}

/// Parse a multi-document YAML stream (such as rendered templates)
pub fn parse_stream(stream: &str) -> Result<Vec<Value>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(stream) {
        let value = Value::deserialize(document)?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// Text of a scalar, if the value is one
///
/// Numbers and booleans are rendered, so `version: 1.2` yields `"1.2"`.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        _ => None,
    }
}

/// Collect every string scalar stored under `key`, at any depth
///
/// Mappings and sequences are searched uniformly. Values under `key` that are
/// not strings (nested mappings, numbers) are ignored.
pub fn collect_strings_under_key(document: &Value, key: &str) -> Vec<String> {
    let mut found = Vec::new();
    collect_into(document, key, &mut found);
    found
}

fn collect_into(value: &Value, key: &str, found: &mut Vec<String>) {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                if k.as_str() == Some(key) {
                    if let Some(s) = v.as_str() {
                        found.push(s.to_string());
                    }
                }
                collect_into(v, key, found);
            }
        }
        Value::Sequence(items) => {
            for item in items {
                collect_into(item, key, found);
            }
        }
        Value::Tagged(tagged) => collect_into(&tagged.value, key, found),
        _ => {}
    }
}

/// Visit every string value stored in a mapping entry, with its full path
///
/// The last segment of the path passed to `visit` is always the entry's key.
pub fn walk_mapping_strings<F>(document: &Value, visit: &mut F)
where
    F: FnMut(&[PathSegment], &str),
{
    let mut path = Vec::new();
    walk(document, &mut path, visit);
}

fn walk<F>(value: &Value, path: &mut Vec<PathSegment>, visit: &mut F)
where
    F: FnMut(&[PathSegment], &str),
{
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let Some(key) = scalar_to_string(k) else {
                    continue;
                };
                path.push(PathSegment::Key(key));
                match v {
                    Value::String(s) => visit(path, s),
                    other => walk(other, path, visit),
                }
                path.pop();
            }
        }
        Value::Sequence(items) => {
            for (index, item) in items.iter().enumerate() {
                path.push(PathSegment::Index(index));
                walk(item, path, visit);
                path.pop();
            }
        }
        Value::Tagged(tagged) => walk(&tagged.value, path, visit),
        _ => {}
    }
}

/// Follow a path of mapping keys and sequence indices
pub fn get_path<'a>(document: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    let Some((first, rest)) = path.split_first() else {
        return Some(document);
    };
    let next = match (first, document) {
        (PathSegment::Key(k), Value::Mapping(map)) => map.get(k.as_str())?,
        (PathSegment::Index(i), Value::Sequence(items)) => items.get(*i)?,
        _ => return None,
    };
    get_path(next, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_skips_empty_documents() {
        let stream = "---\n# Source: chart/templates/empty.yaml\n---\na: 1\n---\nb: 2\n";
        let docs = parse_stream(stream).unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_collect_strings_under_key_at_any_depth() {
        let doc: Value = serde_yaml::from_str(
            r#"
spec:
  template:
    spec:
      initContainers:
        - name: init
          image: busybox:1.36
      containers:
        - name: app
          image: nginx:1.25
        - name: sidecar
          image:
            repository: ignored
settings:
  image: 42
"#,
        )
        .unwrap();

        let images = collect_strings_under_key(&doc, "image");
        assert_eq!(images, vec!["busybox:1.36", "nginx:1.25"]);
    }

    #[test]
    fn test_walk_mapping_strings_paths() {
        let doc: Value = serde_yaml::from_str(
            r#"
controller:
  image:
    repository: app
list:
  - name: first
"#,
        )
        .unwrap();

        let mut seen = Vec::new();
        walk_mapping_strings(&doc, &mut |path, value| {
            seen.push((display_path(path), value.to_string()));
        });

        assert_eq!(
            seen,
            vec![
                ("controller.image.repository".to_string(), "app".to_string()),
                ("list[0].name".to_string(), "first".to_string()),
            ]
        );
    }

    #[test]
    fn test_get_path_and_scalars() {
        let doc: Value = serde_yaml::from_str("a:\n  - b: 1.5\n").unwrap();
        let path = vec![
            PathSegment::Key("a".to_string()),
            PathSegment::Index(0),
            PathSegment::Key("b".to_string()),
        ];
        let value = get_path(&doc, &path).unwrap();
        assert_eq!(scalar_to_string(value).as_deref(), Some("1.5"));
        assert!(get_path(&doc, &[PathSegment::Key("missing".to_string())]).is_none());
    }
}
