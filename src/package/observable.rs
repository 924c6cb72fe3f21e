// Copyright 2018-2025 the Deno authors. MIT license.

//! Packages that are linked into consumers and watched for changes. Each
//! one publishes through a sandboxed "ghost" mirror of its source tree so
//! consumers never see unpublished or VCS-internal files.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::colors;
use crate::context::RunContext;
use crate::errors::AnyError;
use crate::task_queue::TaskQueue;
use crate::util::fs::sync_dir;
use crate::util::glob::GlobSet;
use crate::util::ignore::IgnorePatterns;
use crate::watcher;

use super::Package;

const PUBLISH_HOOKS: [&str; 4] =
  ["prepare", "prepublishOnly", "prepublish", "publish"];

pub struct ObservablePackage {
  pkg: Package,
  /// Mirror of the source tree under a temp directory derived from the
  /// package name. Never shared between packages.
  ghost_dir: PathBuf,
  queue: TaskQueue,
  ignore: Mutex<IgnorePatterns>,
  installed: tokio::sync::OnceCell<()>,
}

impl ObservablePackage {
  pub fn new(pkg: Package, ghost_base: &Path) -> Self {
    let ghost_dir = ghost_base.join(sanitize_name(pkg.name())).join(
      pkg
        .path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "package".into()),
    );
    Self {
      pkg,
      ghost_dir,
      queue: TaskQueue::default(),
      ignore: Mutex::new(IgnorePatterns::default()),
      installed: tokio::sync::OnceCell::new(),
    }
  }

  pub fn name(&self) -> &str {
    self.pkg.name()
  }

  pub fn path(&self) -> &Path {
    &self.pkg.path
  }

  pub fn ghost_dir(&self) -> &Path {
    &self.ghost_dir
  }

  pub(crate) fn inner(&self) -> &Package {
    &self.pkg
  }

  pub fn install_runs(&self) -> usize {
    self.pkg.install_runs()
  }

  /// Base install plus the observable machinery: mirror the source tree
  /// into the ghost, load ignore patterns, run one publish cycle before
  /// anything is watching, then start the watcher.
  pub async fn install(
    self: &Arc<Self>,
    ctx: &Arc<RunContext>,
    create_bin_scripts: bool,
  ) -> Result<(), AnyError> {
    let this = self.clone();
    let ctx = ctx.clone();
    self
      .installed
      .get_or_try_init(|| async move {
        this.pkg.run_install(&ctx, create_bin_scripts).await?;
        this.sync_ghost(false)?;
        this.load_ignore_patterns()?;

        this.queue.clear();
        this.enqueue_publish(&ctx);
        this.queue.drain().await.with_context(|| {
          format!("Publishing {} failed", this.name())
        })?;

        watcher::spawn(this.clone(), ctx.clone())?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Invalidates pending rebuild work and queues a fresh publish cycle.
  /// The drain runs in the background; a rebuild that still fails after
  /// retries is reported here so the watcher stays alive.
  pub fn expire(self: &Arc<Self>, ctx: &Arc<RunContext>, resync: bool) {
    self.queue.clear();
    if resync {
      let this = self.clone();
      self.queue.push(
        "resync",
        Arc::new(move || {
          let this = this.clone();
          async move { this.sync_ghost(true) }.boxed()
        }),
      );
    }
    self.enqueue_publish(ctx);

    let this = self.clone();
    tokio::spawn(async move {
      if let Err(err) = this.queue.drain().await {
        log::error!(
          "[{}] {} {err:#}",
          this.name(),
          colors::red_bold("rebuild failed:")
        );
      }
    });
  }

  fn enqueue_publish(self: &Arc<Self>, ctx: &Arc<RunContext>) {
    for hook in PUBLISH_HOOKS {
      let this = self.clone();
      let ctx = ctx.clone();
      self.queue.push(
        hook,
        Arc::new(move || {
          let this = this.clone();
          let ctx = ctx.clone();
          async move { this.run_hook(&ctx, hook).await }.boxed()
        }),
      );
    }
    let this = self.clone();
    self.queue.push(
      "prune",
      Arc::new(move || {
        let this = this.clone();
        async move { this.clean_ghost_after_publish() }.boxed()
      }),
    );
    let this = self.clone();
    self.queue.push(
      "report",
      Arc::new(move || {
        let this = this.clone();
        async move {
          log::info!("[{}] {}", this.name(), colors::green("published"));
          Ok(())
        }
        .boxed()
      }),
    );
  }

  async fn run_hook(
    &self,
    ctx: &Arc<RunContext>,
    name: &str,
  ) -> Result<(), AnyError> {
    if !self.pkg.manifest.scripts.contains_key(name) {
      return Ok(());
    }
    log::debug!("[{}] running hook \"{name}\"", self.name());
    ctx.npm.run_script(&self.ghost_dir, name).await
  }

  /// Mirrors the source tree into the ghost and rewrites its manifest so
  /// a simulated publish can never run the real test suite.
  fn sync_ghost(&self, exclude_node_modules: bool) -> Result<(), AnyError> {
    log::debug!(
      "[{}] syncing ghost at {}",
      self.name(),
      self.ghost_dir.display()
    );
    sync_dir(&self.pkg.path, &self.ghost_dir, exclude_node_modules)
      .with_context(|| format!("Syncing ghost for {}", self.name()))?;
    self.rewrite_ghost_manifest()
  }

  fn rewrite_ghost_manifest(&self) -> Result<(), AnyError> {
    let mut raw = self.pkg.manifest.raw.clone();
    if !raw["scripts"].is_object() {
      raw["scripts"] = serde_json::json!({});
    }
    raw["scripts"]["test"] = serde_json::Value::from("echo \"SKIPPED\"");
    let file = self.ghost_dir.join("package.json");
    std::fs::write(&file, serde_json::to_string_pretty(&raw)?)
      .with_context(|| format!("Writing {}", file.display()))?;
    Ok(())
  }

  pub(crate) fn load_ignore_patterns(&self) -> Result<(), AnyError> {
    let file = self.pkg.path.join(".gitignore");
    if file.exists() {
      let text = std::fs::read_to_string(&file)
        .with_context(|| format!("Reading {}", file.display()))?;
      *self.ignore.lock() = IgnorePatterns::parse(&text);
    }
    Ok(())
  }

  pub fn is_ignored(&self, relative_path: &Path) -> bool {
    self.ignore.lock().is_ignored(relative_path)
  }

  /// Deletes ghost entries a real publish would not include: everything
  /// not matching the `files` allow-list, deepest entries first. The
  /// manifest itself and the dependency install tree always survive; an
  /// absent or empty allow-list prunes nothing.
  fn clean_ghost_after_publish(&self) -> Result<(), AnyError> {
    let Some(files) = &self.pkg.manifest.files else {
      return Ok(());
    };
    if files.is_empty() {
      return Ok(());
    }
    let allow_list =
      GlobSet::from_patterns(files.iter().map(|s| s.as_str()))?;

    let mut to_remove = Vec::new();
    let walker = walkdir::WalkDir::new(&self.ghost_dir)
      .follow_links(false)
      .into_iter()
      .filter_entry(|entry| {
        entry.file_name().to_string_lossy() != "node_modules"
      });
    for entry in walker {
      let entry = entry?;
      let relative = entry.path().strip_prefix(&self.ghost_dir)?;
      if relative.as_os_str().is_empty()
        || relative == Path::new("package.json")
      {
        continue;
      }
      if !allow_list.matches_path(relative) {
        to_remove.push(entry.path().to_path_buf());
      }
    }

    // children before parents, so emptied directories can be removed
    for path in to_remove.iter().rev() {
      if std::fs::remove_file(path).is_err() {
        let _ = std::fs::remove_dir(path);
      }
    }
    Ok(())
  }
}

fn sanitize_name(name: &str) -> String {
  name
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
        c
      } else {
        '_'
      }
    })
    .collect()
}

#[cfg(test)]
mod test {
  use std::collections::HashMap;
  use std::fs;

  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  use crate::npm::test_util::TestNpmRunner;
  use crate::package::PackageRef;

  use super::*;

  fn write_manifest(dir: &Path, json: serde_json::Value) {
    fs::create_dir_all(dir).unwrap();
    fs::write(
      dir.join("package.json"),
      serde_json::to_string_pretty(&json).unwrap(),
    )
    .unwrap();
  }

  fn observable(
    temp: &TempDir,
    dir: &Path,
  ) -> (Arc<RunContext>, Arc<TestNpmRunner>, Arc<ObservablePackage>) {
    let npm = Arc::new(TestNpmRunner::default());
    let ctx = RunContext::new(npm.clone(), temp.path().join("ghosts"));
    ctx.mark_observable(dir);
    let package = match ctx.linked_package(dir, &HashMap::new()).unwrap() {
      PackageRef::Observable(package) => package,
      _ => panic!("expected observable package"),
    };
    (ctx, npm, package)
  }

  #[test]
  fn sanitize_name_makes_filesystem_safe_tokens() {
    assert_eq!(sanitize_name("@scope/pkg"), "_scope_pkg");
    assert_eq!(sanitize_name("plain-name_2"), "plain-name_2");
  }

  #[test]
  fn ghost_manifest_rewrite_forces_test_and_keeps_unknown_fields() {
    let temp = TempDir::new().unwrap();
    let lib = temp.path().join("lib");
    write_manifest(
      &lib,
      serde_json::json!({
        "name": "lib",
        "version": "1.0.0",
        "scripts": { "test": "jest", "build": "tsc" },
        "sideEffects": false,
      }),
    );

    let (_ctx, _npm, package) = observable(&temp, &lib);
    package.sync_ghost(false).unwrap();

    let ghost_manifest: serde_json::Value = serde_json::from_str(
      &fs::read_to_string(package.ghost_dir().join("package.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(ghost_manifest["scripts"]["test"], "echo \"SKIPPED\"");
    assert_eq!(ghost_manifest["scripts"]["build"], "tsc");
    assert_eq!(ghost_manifest["sideEffects"], serde_json::json!(false));
  }

  #[test]
  fn prune_respects_allow_list_and_preserved_paths() {
    let temp = TempDir::new().unwrap();
    let lib = temp.path().join("lib");
    write_manifest(
      &lib,
      serde_json::json!({
        "name": "lib",
        "version": "1.0.0",
        "files": ["lib/**", "*.md"],
      }),
    );
    fs::create_dir_all(lib.join("lib")).unwrap();
    fs::create_dir_all(lib.join("src")).unwrap();
    fs::create_dir_all(lib.join("node_modules/dep")).unwrap();
    fs::write(lib.join("lib/index.js"), "x").unwrap();
    fs::write(lib.join("src/index.ts"), "x").unwrap();
    fs::write(lib.join("README.md"), "x").unwrap();
    fs::write(lib.join("node_modules/dep/index.js"), "x").unwrap();

    let (_ctx, _npm, package) = observable(&temp, &lib);
    package.sync_ghost(false).unwrap();
    package.clean_ghost_after_publish().unwrap();

    let ghost = package.ghost_dir();
    assert!(ghost.join("package.json").exists());
    assert!(ghost.join("lib/index.js").exists());
    assert!(ghost.join("README.md").exists());
    assert!(ghost.join("node_modules/dep/index.js").exists());
    assert!(!ghost.join("src/index.ts").exists());
    assert!(!ghost.join("src").exists());
  }

  #[test]
  fn prune_without_allow_list_removes_nothing() {
    let temp = TempDir::new().unwrap();
    let lib = temp.path().join("lib");
    write_manifest(
      &lib,
      serde_json::json!({ "name": "lib", "version": "1.0.0" }),
    );
    fs::write(lib.join("anything.txt"), "x").unwrap();

    let (_ctx, _npm, package) = observable(&temp, &lib);
    package.sync_ghost(false).unwrap();
    package.clean_ghost_after_publish().unwrap();
    assert!(package.ghost_dir().join("anything.txt").exists());

    // an explicitly empty list behaves the same
    let lib2 = temp.path().join("lib2");
    write_manifest(
      &lib2,
      serde_json::json!({ "name": "lib2", "version": "1.0.0", "files": [] }),
    );
    fs::write(lib2.join("anything.txt"), "x").unwrap();
    let (_ctx, _npm, package) = observable(&temp, &lib2);
    package.sync_ghost(false).unwrap();
    package.clean_ghost_after_publish().unwrap();
    assert!(package.ghost_dir().join("anything.txt").exists());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn install_publishes_ghost_and_runs_hooks_there() {
    let temp = TempDir::new().unwrap();
    let lib = temp.path().join("lib");
    write_manifest(
      &lib,
      serde_json::json!({
        "name": "lib",
        "version": "1.0.0",
        "scripts": { "prepare": "tsc", "test": "jest" },
      }),
    );
    fs::write(lib.join("index.js"), "module.exports = 1;").unwrap();

    let (ctx, npm, package) = observable(&temp, &lib);
    package.install(&ctx, false).await.unwrap();

    assert!(package.ghost_dir().join("index.js").exists());
    let hooks = npm.scripts.lock().clone();
    assert_eq!(
      hooks,
      vec![(package.ghost_dir().to_path_buf(), "prepare".to_string())]
    );
    assert_eq!(package.install_runs(), 1);
  }

  #[cfg(unix)]
  #[tokio::test(start_paused = true)]
  async fn failing_hook_is_retried_through_the_queue() {
    use std::sync::atomic::Ordering;

    let temp = TempDir::new().unwrap();
    let lib = temp.path().join("lib");
    write_manifest(
      &lib,
      serde_json::json!({
        "name": "lib",
        "version": "1.0.0",
        "scripts": { "prepare": "tsc" },
      }),
    );

    let (ctx, npm, package) = observable(&temp, &lib);
    npm.fail_scripts.store(2, Ordering::SeqCst);
    package.install(&ctx, false).await.unwrap();

    // two failures, two retries, then success
    let runs = npm
      .scripts
      .lock()
      .iter()
      .filter(|(_, name)| name == "prepare")
      .count();
    assert_eq!(runs, 3);
  }

  #[tokio::test(start_paused = true)]
  async fn expire_supersedes_pending_work() {
    let temp = TempDir::new().unwrap();
    let lib = temp.path().join("lib");
    write_manifest(
      &lib,
      serde_json::json!({ "name": "lib", "version": "1.0.0" }),
    );

    let (ctx, _npm, package) = observable(&temp, &lib);
    package.sync_ghost(false).unwrap();

    // queue stale work, then expire; the stale task must be dropped
    let stale: crate::task_queue::TaskFn =
      Arc::new(|| async { panic!("superseded task ran") }.boxed());
    package.queue.push("stale", stale);
    package.expire(&ctx, true);
    // hooks (4) + resync + prune + report
    tokio::task::yield_now().await;
    package.queue.drain().await.unwrap();
    assert!(package.queue.is_empty());
  }
}
