// Copyright 2018-2025 the Deno authors. MIT license.

//! Dependency resolution and install for packages that consume local
//! link overrides.

pub mod bin_entries;
pub mod observable;

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;

use crate::colors;
use crate::context::RunContext;
use crate::errors::AnyError;
use crate::manifest::Manifest;
use crate::util::fs::join_package_name;
use crate::util::fs::remove_path_if_exists;
use crate::util::fs::symlink_dir;

use self::observable::ObservablePackage;

/// A package node, either installed in place (plain) or published through
/// a ghost mirror and watched (observable). One node exists per path.
#[derive(Clone)]
pub enum PackageRef {
  Plain(Arc<Package>),
  Observable(Arc<ObservablePackage>),
}

impl PackageRef {
  pub fn name(&self) -> &str {
    &self.inner().manifest.name
  }

  pub fn path(&self) -> &Path {
    &self.inner().path
  }

  pub fn manifest(&self) -> &Arc<Manifest> {
    &self.inner().manifest
  }

  /// The directory a consumer's symlink should point at: the source tree
  /// for a plain package, the ghost mirror for an observable one.
  pub fn path_to_published(&self) -> &Path {
    match self {
      PackageRef::Plain(package) => &package.path,
      PackageRef::Observable(package) => package.ghost_dir(),
    }
  }

  pub fn install(
    &self,
    ctx: &Arc<RunContext>,
    create_bin_scripts: bool,
  ) -> BoxFuture<'static, Result<(), AnyError>> {
    let this = self.clone();
    let ctx = ctx.clone();
    async move {
      match &this {
        PackageRef::Plain(package) => {
          package.install(&ctx, create_bin_scripts).await
        }
        PackageRef::Observable(package) => {
          package.install(&ctx, create_bin_scripts).await
        }
      }
    }
    .boxed()
  }

  pub(crate) fn inner(&self) -> &Package {
    match self {
      PackageRef::Plain(package) => package,
      PackageRef::Observable(package) => package.inner(),
    }
  }
}

/// The split of a dependency walk into entries to fetch from the registry
/// and local packages to symlink, deduplicated by name across the whole
/// walk with the highest version winning.
#[derive(Default)]
pub(crate) struct InstallPlan {
  pub to_install: IndexMap<String, String>,
  pub sym_links: Vec<PackageRef>,
}

pub struct Package {
  pub path: PathBuf,
  pub manifest: Arc<Manifest>,
  /// The full merged override map in scope at this package, used to
  /// resolve the override maps of linked children.
  overrides: HashMap<String, PathBuf>,
  /// Overrides narrowed to names this package actually declares.
  links: HashMap<String, PathBuf>,
  installed: tokio::sync::OnceCell<()>,
  install_runs: AtomicUsize,
}

impl Package {
  pub fn new(
    path: PathBuf,
    manifest: Arc<Manifest>,
    overrides: HashMap<String, PathBuf>,
  ) -> Self {
    let links = overrides
      .iter()
      .filter(|(name, _)| manifest.all_dependencies.contains_key(*name))
      .map(|(name, target)| (name.clone(), target.clone()))
      .collect();
    Self {
      path,
      manifest,
      overrides,
      links,
      installed: tokio::sync::OnceCell::new(),
      install_runs: AtomicUsize::new(0),
    }
  }

  pub fn name(&self) -> &str {
    &self.manifest.name
  }

  pub(crate) fn links(&self) -> &HashMap<String, PathBuf> {
    &self.links
  }

  pub(crate) fn overrides(&self) -> &HashMap<String, PathBuf> {
    &self.overrides
  }

  /// How many times the install routine actually ran; stays at one no
  /// matter how often `install()` is awaited.
  pub fn install_runs(&self) -> usize {
    self.install_runs.load(Ordering::SeqCst)
  }

  /// Installs this package: local overrides become symlinks, everything
  /// else goes through the registry tool. Idempotent; concurrent callers
  /// share one underlying run and the flag of the first caller wins.
  pub async fn install(
    &self,
    ctx: &Arc<RunContext>,
    create_bin_scripts: bool,
  ) -> Result<(), AnyError> {
    self
      .installed
      .get_or_try_init(|| self.run_install(ctx, create_bin_scripts))
      .await?;
    Ok(())
  }

  pub(crate) async fn run_install(
    &self,
    ctx: &Arc<RunContext>,
    create_bin_scripts: bool,
  ) -> Result<(), AnyError> {
    self.install_runs.fetch_add(1, Ordering::SeqCst);
    log::debug!("[{}] resolving dependencies", self.name());

    let mut plan = InstallPlan::default();
    let mut seen = HashMap::new();
    collect_dependencies(
      ctx,
      &self.manifest.all_dependencies,
      &self.links,
      &self.overrides,
      &mut plan,
      &mut seen,
    )?;

    // wire local links first so the registry tool sees them in place
    for child in &plan.sym_links {
      let link_path =
        join_package_name(&self.path.join("node_modules"), child.name());
      if let Some(parent) = link_path.parent() {
        std::fs::create_dir_all(parent)
          .with_context(|| format!("Creating {}", parent.display()))?;
      }
      child.install(ctx, false).await?;
      remove_path_if_exists(&link_path)
        .with_context(|| format!("Removing {}", link_path.display()))?;
      let published = child.path_to_published();
      symlink_dir(published, &link_path).with_context(|| {
        format!("Linking {} -> {}", link_path.display(), published.display())
      })?;
      log::info!(
        "[{}] {} {} -> {}",
        self.name(),
        colors::cyan("local"),
        child.name(),
        published.display()
      );
      if create_bin_scripts {
        bin_entries::create_bin_scripts(ctx, &self.path, child.manifest())?;
      }
    }

    let specs = self.filter_installed(ctx, &plan.to_install);
    if !specs.is_empty() {
      log::info!(
        "[{}] {} {}",
        self.name(),
        colors::magenta("npm install"),
        specs.join(" ")
      );
      ctx.npm.install(&self.path, &specs).await.with_context(|| {
        format!("Installing registry packages for {}", self.name())
      })?;
    }
    Ok(())
  }

  /// Drops entries whose on-disk install already satisfies the requested
  /// range. Any failure to read or parse counts as "needs install".
  fn filter_installed(
    &self,
    ctx: &Arc<RunContext>,
    to_install: &IndexMap<String, String>,
  ) -> Vec<String> {
    let node_modules = self.path.join("node_modules");
    to_install
      .iter()
      .filter(|(name, range)| {
        let installed_dir = join_package_name(&node_modules, name);
        !version_satisfies(ctx, &installed_dir, range)
      })
      .map(|(name, range)| format!("{name}@{range}"))
      .collect()
  }
}

fn version_satisfies(
  ctx: &Arc<RunContext>,
  installed_dir: &Path,
  range: &str,
) -> bool {
  let Some(manifest) = ctx.manifests.load(installed_dir) else {
    return false;
  };
  let Some(version) = manifest
    .version
    .as_deref()
    .and_then(|v| semver::Version::parse(v).ok())
  else {
    return false;
  };
  let Ok(req) = semver::VersionReq::parse(range) else {
    return false;
  };
  req.matches(&version)
}

/// Depth-first walk over `all_dependencies`, recursing into locally
/// linked children. `seen` deduplicates names across the whole walk; a
/// recurring name only wins when its cleaned version parses as strictly
/// greater than the recorded one.
fn collect_dependencies(
  ctx: &Arc<RunContext>,
  deps: &IndexMap<String, String>,
  links: &HashMap<String, PathBuf>,
  overrides: &HashMap<String, PathBuf>,
  plan: &mut InstallPlan,
  seen: &mut HashMap<String, String>,
) -> Result<(), AnyError> {
  for (name, range) in deps {
    let clean = clean_version(range);
    if let Some(existing) = seen.get(name) {
      let newer = match (
        semver::Version::parse(existing),
        semver::Version::parse(&clean),
      ) {
        (Ok(old), Ok(new)) => new > old,
        _ => {
          log::warn!(
            "cannot compare versions for {name}: \"{existing}\" vs \"{clean}\" ({range})"
          );
          false
        }
      };
      if !newer {
        continue;
      }
      log::debug!("{name} \"{existing}\" -> \"{clean}\" ({range})");
    }
    seen.insert(name.clone(), clean);

    if let Some(target) = links.get(name) {
      let child = ctx.linked_package(target, overrides)?;
      if !plan.sym_links.iter().any(|c| c.path() == child.path()) {
        plan.sym_links.push(child.clone());
      }
      collect_dependencies(
        ctx,
        &child.manifest().all_dependencies,
        child.inner().links(),
        child.inner().overrides(),
        plan,
        seen,
      )?;
    } else {
      plan.to_install.insert(name.clone(), range.clone());
    }
  }
  Ok(())
}

/// Strips the first character that is neither a digit nor a dot, which
/// handles single-character range prefixes like `^` and `~`. Multi
/// character prefixes such as `>=` survive partially and fail semver
/// parsing; the walk then keeps the already recorded version, so this
/// leniency only affects tie-breaking, never correctness of installs.
fn clean_version(version: &str) -> String {
  let mut out = String::with_capacity(version.len());
  let mut stripped = false;
  for c in version.chars() {
    if !stripped && !c.is_ascii_digit() && c != '.' {
      stripped = true;
      continue;
    }
    out.push(c);
  }
  out
}
