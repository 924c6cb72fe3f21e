// Copyright 2018-2025 the Deno authors. MIT license.

//! Loading and caching of `package.json` manifests.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BinField {
  /// A single script, published under the package name.
  Path(String),
  Map(IndexMap<String, String>),
}

#[derive(Debug, Deserialize)]
struct RawManifest {
  name: String,
  #[serde(default)]
  version: Option<String>,
  #[serde(default)]
  scripts: IndexMap<String, String>,
  #[serde(default)]
  dependencies: IndexMap<String, String>,
  #[serde(default, rename = "devDependencies")]
  dev_dependencies: IndexMap<String, String>,
  #[serde(default, rename = "peerDependencies")]
  peer_dependencies: IndexMap<String, String>,
  #[serde(default)]
  bin: Option<BinField>,
  #[serde(default)]
  files: Option<Vec<String>>,
}

/// Immutable view of a package manifest. The `raw` value keeps every field
/// of the original file so a rewrite loses nothing the tool doesn't know
/// about.
#[derive(Debug)]
pub struct Manifest {
  pub name: String,
  pub version: Option<String>,
  pub scripts: IndexMap<String, String>,
  pub dependencies: IndexMap<String, String>,
  pub dev_dependencies: IndexMap<String, String>,
  pub peer_dependencies: IndexMap<String, String>,
  pub bin: Option<BinField>,
  pub files: Option<Vec<String>>,
  /// dependencies ∪ devDependencies ∪ peerDependencies, later maps
  /// overriding earlier ones on key collision.
  pub all_dependencies: IndexMap<String, String>,
  pub raw: serde_json::Value,
}

impl Manifest {
  fn from_value(raw: serde_json::Value) -> Option<Self> {
    let parsed: RawManifest =
      serde_json::from_value(raw.clone()).ok().filter(|manifest| {
        // an unnamed package can't be linked or installed
        !manifest.name.is_empty()
      })?;
    let mut all_dependencies = parsed.dependencies.clone();
    all_dependencies.extend(parsed.dev_dependencies.clone());
    all_dependencies.extend(parsed.peer_dependencies.clone());
    Some(Self {
      name: parsed.name,
      version: parsed.version,
      scripts: parsed.scripts,
      dependencies: parsed.dependencies,
      dev_dependencies: parsed.dev_dependencies,
      peer_dependencies: parsed.peer_dependencies,
      bin: parsed.bin,
      files: parsed.files,
      all_dependencies,
      raw,
    })
  }

  /// The `bin` field with a bare string normalized to a single command
  /// named after the package.
  pub fn bin_entries(&self) -> IndexMap<String, String> {
    match &self.bin {
      None => IndexMap::new(),
      Some(BinField::Path(path)) => {
        let mut map = IndexMap::new();
        // scoped packages expose the unscoped part as the command name
        let command = self
          .name
          .rsplit_once('/')
          .map(|(_, name)| name)
          .unwrap_or(&self.name);
        map.insert(command.to_string(), path.clone());
        map
      }
      Some(BinField::Map(map)) => map.clone(),
    }
  }
}

/// Process-wide manifest cache. Entries are loaded once per directory and
/// assumed immutable for the rest of the run; a missing or unparsable
/// manifest caches as `None` and is never retried.
#[derive(Debug, Default)]
pub struct ManifestCache {
  entries: Mutex<HashMap<PathBuf, Option<Arc<Manifest>>>>,
}

impl ManifestCache {
  pub fn load(&self, dir: &Path) -> Option<Arc<Manifest>> {
    let mut entries = self.entries.lock();
    if let Some(entry) = entries.get(dir) {
      return entry.clone();
    }
    let loaded = load_manifest(&dir.join("package.json"));
    entries.insert(dir.to_path_buf(), loaded.clone());
    loaded
  }
}

fn load_manifest(file: &Path) -> Option<Arc<Manifest>> {
  let text = std::fs::read_to_string(file).ok()?;
  let raw: serde_json::Value = serde_json::from_str(&text).ok()?;
  Manifest::from_value(raw).map(Arc::new)
}
