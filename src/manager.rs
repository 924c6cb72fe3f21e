// Copyright 2018-2025 the Deno authors. MIT license.

//! Discovery of link declarations across a workspace and sequential
//! installation of the discovered roots.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use anyhow::Context;
use walkdir::WalkDir;

use crate::colors;
use crate::context::RunContext;
use crate::errors::AnyError;
use crate::util::glob::expand_dirs;

/// File name of a link declaration: a JSON object mapping dependency
/// names to (usually relative) paths of local packages.
pub const LINK_FILE_NAME: &str = ".npmlinkrc";

#[derive(Debug, Clone)]
pub struct DiscoveredRoot {
  pub path: PathBuf,
  pub overrides: HashMap<String, PathBuf>,
}

pub struct Manager {
  ctx: Arc<RunContext>,
  items: Vec<DiscoveredRoot>,
  items_index: HashMap<PathBuf, usize>,
}

impl Manager {
  pub fn new(ctx: Arc<RunContext>) -> Self {
    Self {
      ctx,
      items: Vec::new(),
      items_index: HashMap::new(),
    }
  }

  pub fn items(&self) -> &[DiscoveredRoot] {
    &self.items
  }

  /// Registers a single link without a declaration file, as if `cwd`
  /// declared `{name: to}`.
  pub fn set_link(&mut self, name: &str, to: &Path, cwd: &Path) {
    let target = absolute(cwd, to);
    self.ctx.mark_observable(&target);
    let overrides = HashMap::from([(name.to_string(), target)]);
    self.ctx.register_overrides(cwd, overrides.clone());
    self.add_item(cwd.to_path_buf(), overrides);
  }

  /// Walks `root` for link declaration files and registers one root entry
  /// per declaring directory. Declarations merge along the walk with later
  /// files overriding earlier keys, so a declaration close to a package
  /// refines what the workspace root declared. With `include`, directories
  /// matching the glob that contain a manifest also become roots, inheriting
  /// the root's merged map (minus self-links) refined by their own local
  /// declaration file.
  pub fn scan(
    &mut self,
    root: &Path,
    include: Option<&str>,
  ) -> Result<Vec<DiscoveredRoot>, AnyError> {
    let mut discovered = Vec::new();
    let mut merged: HashMap<String, PathBuf> = HashMap::new();

    let mut link_files: Vec<PathBuf> = WalkDir::new(root)
      .follow_links(false)
      .into_iter()
      .filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        name != "node_modules" && name != ".git"
      })
      .filter_map(|entry| entry.ok())
      .filter(|entry| {
        entry.file_type().is_file() && entry.file_name() == LINK_FILE_NAME
      })
      .map(|entry| entry.into_path())
      .collect();
    link_files.sort();

    for link_file in link_files {
      let dir = link_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.to_path_buf());
      let declared = read_link_file(&link_file)?;
      for (name, target) in declared {
        let target = absolute(&dir, &target);
        self.ctx.mark_observable(&target);
        merged.insert(name, target);
      }
      self.ctx.register_overrides(&dir, merged.clone());
      if let Some(item) = self.add_item(dir, merged.clone()) {
        discovered.push(item);
      }
    }

    if let Some(include) = include {
      let root_overrides = self
        .items_index
        .get(root)
        .map(|i| self.items[*i].overrides.clone())
        .unwrap_or_default();
      let pattern = root.join(include).to_string_lossy().into_owned();
      for dir in expand_dirs(&pattern)? {
        if !dir.join("package.json").exists()
          || self.items_index.contains_key(&dir)
        {
          continue;
        }
        let mut overrides = root_overrides.clone();
        let local_link_file = dir.join(LINK_FILE_NAME);
        if local_link_file.exists() {
          for (name, target) in read_link_file(&local_link_file)? {
            overrides.insert(name, absolute(&dir, &target));
          }
        }
        // a package must not end up linked to itself
        overrides.retain(|_, target| target != &dir);
        for target in overrides.values() {
          self.ctx.mark_observable(target);
        }
        self.ctx.register_overrides(&dir, overrides.clone());
        if let Some(item) = self.add_item(dir, overrides) {
          discovered.push(item);
        }
      }
    }

    Ok(discovered)
  }

  /// Installs every discovered root in discovery order. Roots install
  /// strictly one after another so registry tool output never interleaves
  /// and overlapping install directories are never mutated concurrently.
  pub async fn run(&self) -> Result<(), AnyError> {
    let mut failures = 0usize;
    for item in &self.items {
      log::info!("{} {}", colors::gray("installing"), item.path.display());
      let result = match self.ctx.root_package(&item.path) {
        Ok(package) => package.install(&self.ctx, true).await,
        Err(err) => Err(err),
      };
      if let Err(err) = result {
        log::error!(
          "{} {}: {err:#}",
          colors::red_bold("error"),
          item.path.display()
        );
        failures += 1;
      }
    }
    if failures > 0 {
      bail!("{failures} root package(s) failed to install");
    }
    log::info!(
      "{}",
      colors::green("ready, local changes now rebuild automatically")
    );
    Ok(())
  }

  fn add_item(
    &mut self,
    path: PathBuf,
    overrides: HashMap<String, PathBuf>,
  ) -> Option<DiscoveredRoot> {
    if self.items_index.contains_key(&path) {
      return None;
    }
    let item = DiscoveredRoot { path: path.clone(), overrides };
    self.items_index.insert(path, self.items.len());
    self.items.push(item.clone());
    Some(item)
  }
}

fn read_link_file(
  file: &Path,
) -> Result<Vec<(String, PathBuf)>, AnyError> {
  let text = std::fs::read_to_string(file)
    .with_context(|| format!("Reading {}", file.display()))?;
  let declared: indexmap::IndexMap<String, String> =
    serde_json::from_str(&text)
      .with_context(|| format!("Parsing {}", file.display()))?;
  Ok(
    declared
      .into_iter()
      .map(|(name, target)| (name, PathBuf::from(target)))
      .collect(),
  )
}

fn absolute(base: &Path, path: &Path) -> PathBuf {
  if path.is_absolute() {
    path.to_path_buf()
  } else {
    normalize(&base.join(path))
  }
}

/// Lexically resolves `.` and `..` components without touching the
/// filesystem, so declared targets don't have to exist yet.
fn normalize(path: &Path) -> PathBuf {
  let mut result = PathBuf::new();
  for component in path.components() {
    match component {
      std::path::Component::CurDir => {}
      std::path::Component::ParentDir => {
        result.pop();
      }
      component => result.push(component),
    }
  }
  result
}

/// Discovers packages matching `pattern` and appends `{name: path}`
/// records for them to each root's link declaration file.
pub fn append_link_records(
  ctx: &RunContext,
  pattern: &str,
  roots: &[PathBuf],
) -> Result<usize, AnyError> {
  let mut records: indexmap::IndexMap<String, String> =
    indexmap::IndexMap::new();
  for dir in expand_dirs(pattern)? {
    let dir = absolute(&std::env::current_dir()?, &dir);
    if let Some(manifest) = ctx.manifests.load(&dir) {
      records
        .insert(manifest.name.clone(), dir.to_string_lossy().into_owned());
    }
  }

  for root in roots {
    let file = root.join(LINK_FILE_NAME);
    let mut existing: indexmap::IndexMap<String, String> = if file.exists() {
      serde_json::from_str(&std::fs::read_to_string(&file)?)
        .with_context(|| format!("Parsing {}", file.display()))?
    } else {
      indexmap::IndexMap::new()
    };
    existing.extend(records.clone());
    std::fs::write(&file, serde_json::to_string_pretty(&existing)?)
      .with_context(|| format!("Writing {}", file.display()))?;
  }
  Ok(records.len())
}

#[cfg(test)]
mod test {
  use std::fs;

  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  use crate::npm::test_util::TestNpmRunner;

  use super::*;

  fn test_manager(temp: &TempDir) -> Manager {
    let ctx = RunContext::new(
      Arc::new(TestNpmRunner::default()),
      temp.path().join("ghosts"),
    );
    Manager::new(ctx)
  }

  fn write_json(path: &Path, value: serde_json::Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
  }

  #[test]
  fn scan_merges_declarations_and_resolves_targets() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("workspace");
    write_json(
      &root.join(LINK_FILE_NAME),
      serde_json::json!({ "lib": "../lib", "util": "../util" }),
    );
    write_json(
      &root.join("apps/web").join(LINK_FILE_NAME),
      serde_json::json!({ "lib": "../../../lib-next" }),
    );

    let mut manager = test_manager(&temp);
    let discovered = manager.scan(&root, None).unwrap();

    assert_eq!(discovered.len(), 2);
    assert_eq!(discovered[0].path, root);
    assert_eq!(
      discovered[0].overrides.get("lib").unwrap(),
      &temp.path().join("lib")
    );

    // the nested declaration overrides the inherited `lib` entry and
    // keeps the inherited `util` one
    let nested = &discovered[1];
    assert_eq!(nested.path, root.join("apps/web"));
    assert_eq!(
      nested.overrides.get("lib").unwrap(),
      &temp.path().join("lib-next")
    );
    assert_eq!(
      nested.overrides.get("util").unwrap(),
      &temp.path().join("util")
    );

    // every target is observable now
    assert!(manager.ctx.is_observable(&temp.path().join("lib")));
    assert!(manager.ctx.is_observable(&temp.path().join("lib-next")));
    assert!(manager.ctx.is_observable(&temp.path().join("util")));
  }

  #[test]
  fn scan_skips_node_modules_and_indexed_paths() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("workspace");
    write_json(
      &root.join(LINK_FILE_NAME),
      serde_json::json!({ "lib": "../lib" }),
    );
    write_json(
      &root.join("node_modules/dep").join(LINK_FILE_NAME),
      serde_json::json!({ "sneaky": "../../../sneaky" }),
    );

    let mut manager = test_manager(&temp);
    let first = manager.scan(&root, None).unwrap();
    assert_eq!(first.len(), 1);
    assert!(!manager.ctx.is_observable(&temp.path().join("sneaky")));

    // a second scan re-adds nothing
    let second = manager.scan(&root, None).unwrap();
    assert!(second.is_empty());
    assert_eq!(manager.items().len(), 1);
  }

  #[test]
  fn include_glob_inherits_root_map_without_self_links() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("workspace");
    let lib = root.join("packages/lib");
    let app = root.join("packages/app");
    write_json(
      &root.join(LINK_FILE_NAME),
      serde_json::json!({ "lib": "./packages/lib" }),
    );
    write_json(
      &lib.join("package.json"),
      serde_json::json!({ "name": "lib", "version": "1.0.0" }),
    );
    write_json(
      &app.join("package.json"),
      serde_json::json!({ "name": "app", "version": "1.0.0" }),
    );

    let mut manager = test_manager(&temp);
    let discovered = manager.scan(&root, Some("packages/*")).unwrap();

    // root entry plus both packages
    assert_eq!(discovered.len(), 3);
    let by_path: HashMap<_, _> = discovered
      .iter()
      .map(|item| (item.path.clone(), item.overrides.clone()))
      .collect();

    // the app inherits the root's lib link
    assert_eq!(by_path.get(&app).unwrap().get("lib").unwrap(), &lib);
    // lib itself must not link to itself
    assert!(by_path.get(&lib).unwrap().is_empty());
  }

  #[test]
  fn include_glob_refined_by_local_declaration() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("workspace");
    let app = root.join("packages/app");
    write_json(
      &root.join(LINK_FILE_NAME),
      serde_json::json!({ "lib": "../lib" }),
    );
    write_json(
      &app.join("package.json"),
      serde_json::json!({ "name": "app", "version": "1.0.0" }),
    );
    write_json(
      &app.join(LINK_FILE_NAME),
      serde_json::json!({ "util": "../../../util" }),
    );

    let mut manager = test_manager(&temp);
    let discovered = manager.scan(&root, Some("packages/*")).unwrap();
    let app_item = discovered.iter().find(|i| i.path == app).unwrap();
    assert_eq!(
      app_item.overrides.get("lib").unwrap(),
      &temp.path().join("lib")
    );
    assert_eq!(
      app_item.overrides.get("util").unwrap(),
      &temp.path().join("util")
    );
  }

  #[test]
  fn set_link_registers_an_observable_target() {
    let temp = TempDir::new().unwrap();
    let cwd = temp.path().join("app");
    fs::create_dir_all(&cwd).unwrap();
    let mut manager = test_manager(&temp);
    manager.set_link("lib", Path::new("../lib"), &cwd);

    assert_eq!(manager.items().len(), 1);
    assert_eq!(
      manager.items()[0].overrides.get("lib").unwrap(),
      &temp.path().join("lib")
    );
    assert!(manager.ctx.is_observable(&temp.path().join("lib")));
  }

  #[test]
  fn append_link_records_merges_into_existing_file() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("app");
    let lib = temp.path().join("lib");
    fs::create_dir_all(&root).unwrap();
    write_json(
      &lib.join("package.json"),
      serde_json::json!({ "name": "lib", "version": "1.0.0" }),
    );
    write_json(
      &root.join(LINK_FILE_NAME),
      serde_json::json!({ "kept": "../kept" }),
    );

    let ctx = RunContext::new(
      Arc::new(TestNpmRunner::default()),
      temp.path().join("ghosts"),
    );
    let pattern = temp.path().join("lib").to_string_lossy().into_owned();
    let added =
      append_link_records(&ctx, &pattern, &[root.clone()]).unwrap();
    assert_eq!(added, 1);

    let written: indexmap::IndexMap<String, String> = serde_json::from_str(
      &fs::read_to_string(root.join(LINK_FILE_NAME)).unwrap(),
    )
    .unwrap();
    assert_eq!(written.get("kept").unwrap(), "../kept");
    assert_eq!(
      written.get("lib").unwrap(),
      &lib.to_string_lossy().into_owned()
    );
  }
}
