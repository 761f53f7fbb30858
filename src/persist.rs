//! Static configuration-file management for the media server.
//!
//! The media server's YAML parser predates YAML 1.2: booleans must be the
//! literal tokens `yes`/`no`, except for the encryption toggles, which are
//! string enums and must stay quoted when set to `no`. All of that jank is
//! isolated in [`render`]; everything else works on structured documents.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use serde_yaml::{Mapping, Value};

use crate::{media::PathConfig, Error, Result};

/// Fields whose `no` value is a string enum, not a boolean.
const FORCE_QUOTED: [&str; 2] = ["rtspEncryption", "rtmpEncryption"];

pub fn read_document(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::ConfigFile(format!("read {}: {}", path.display(), e)))?;
    serde_yaml::from_str(&raw).map_err(|e| Error::ConfigFile(e.to_string()))
}

/// Build the full desired configuration document: the currently loaded
/// document with the base overrides applied and the `paths` mapping
/// replaced wholesale.
pub fn desired_document(
    current: &Value,
    auth_http_address: &str,
    paths: &[PathConfig],
) -> Result<Value> {
    let mut doc = match current {
        Value::Mapping(m) => m.clone(),
        _ => Mapping::new(),
    };

    doc.insert("authMethod".into(), "http".into());
    doc.insert("authHTTPAddress".into(), auth_http_address.into());
    doc.insert("authHTTPExclude".into(), Value::Sequence(vec![]));
    doc.insert("authInternalUsers".into(), Value::Sequence(vec![]));
    doc.insert("readTimeout".into(), "10s".into());
    doc.insert("writeTimeout".into(), "10s".into());

    // BTreeMap keeps the rendered paths section in a stable order.
    let sorted: BTreeMap<&str, &PathConfig> =
        paths.iter().map(|p| (p.name.as_str(), p)).collect();
    let mut mapping = Mapping::new();
    for (name, path) in sorted {
        let value = serde_yaml::to_value(path).map_err(|e| Error::ConfigFile(e.to_string()))?;
        mapping.insert(name.into(), value);
    }
    doc.insert("paths".into(), Value::Mapping(mapping));

    Ok(Value::Mapping(doc))
}

/// Extract the `paths` mapping back into typed configs. `yes`/`no` tokens
/// read from disk become booleans again before deserialization.
pub fn parse_paths(doc: &Value) -> Result<HashMap<String, PathConfig>> {
    let mut out = HashMap::new();

    if let Some(Value::Mapping(paths)) = doc.get("paths") {
        for (name, value) in paths {
            let name = name
                .as_str()
                .ok_or_else(|| Error::ConfigFile("non-string path name".to_string()))?;
            let config: PathConfig = serde_yaml::from_value(booleanize(value))
                .map_err(|e| Error::ConfigFile(format!("path {}: {}", name, e)))?;
            out.insert(name.to_string(), config);
        }
    }

    Ok(out)
}

fn booleanize(value: &Value) -> Value {
    match value {
        Value::String(s) if s == "yes" => Value::Bool(true),
        Value::String(s) if s == "no" => Value::Bool(false),
        Value::Sequence(seq) => Value::Sequence(seq.iter().map(booleanize).collect()),
        Value::Mapping(map) => Value::Mapping(
            map.iter()
                .map(|(k, v)| (k.clone(), booleanize(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Canonical form for structural comparison: booleans collapse to their
/// `yes`/`no` string representation so a document read back from disk
/// compares equal to the one that produced it.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Bool(b) => Value::String(if *b { "yes" } else { "no" }.to_string()),
        Value::Sequence(seq) => Value::Sequence(seq.iter().map(normalize).collect()),
        Value::Mapping(map) => Value::Mapping(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

pub fn structurally_equal(a: &Value, b: &Value) -> bool {
    normalize(a) == normalize(b)
}

/// Serialize a document the way the media server expects to read it.
pub fn render(doc: &Value) -> Result<String> {
    let text = serde_yaml::to_string(doc).map_err(|e| Error::ConfigFile(e.to_string()))?;

    let lines: Vec<String> = text
        .lines()
        .map(|line| {
            let line = if let Some(head) = line.strip_suffix(": true") {
                format!("{}: yes", head)
            } else if let Some(head) = line.strip_suffix(": false") {
                format!("{}: no", head)
            } else {
                line.to_string()
            };

            for field in FORCE_QUOTED {
                if line == format!("{}: no", field) {
                    return format!("{}: \"no\"", field);
                }
            }
            line
        })
        .collect();

    Ok(format!("{}\n", lines.join("\n")))
}

/// Crash-safe write: the rendered document lands in a sibling temporary
/// file first and is renamed over the live path, so the media server never
/// observes a partially-written file.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("yml.new");
    fs::write(&tmp, content)
        .map_err(|e| Error::ConfigFile(format!("write {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path)
        .map_err(|e| Error::ConfigFile(format!("rename {}: {}", path.display(), e)))
}
