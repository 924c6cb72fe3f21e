// Copyright 2018-2025 the Deno authors. MIT license.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::AnyError;
use crate::errors::InvalidPackageError;
use crate::manifest::ManifestCache;
use crate::npm::NpmRunner;
use crate::package::observable::ObservablePackage;
use crate::package::Package;
use crate::package::PackageRef;

/// State scoped to one invocation of the tool: the manifest cache, the
/// override declarations discovered by scanning, and the two package
/// registries. Keeping this off process-wide statics keeps the engine
/// testable.
pub struct RunContext {
  pub manifests: ManifestCache,
  pub npm: Arc<dyn NpmRunner>,
  ghost_base: PathBuf,
  observable_paths: Mutex<HashSet<PathBuf>>,
  declared_overrides: Mutex<HashMap<PathBuf, HashMap<String, PathBuf>>>,
  // a path is memoized in exactly one registry, chosen at construction
  // by whether it was marked observable
  packages: Mutex<HashMap<PathBuf, Arc<Package>>>,
  observables: Mutex<HashMap<PathBuf, Arc<ObservablePackage>>>,
}

impl RunContext {
  pub fn new(npm: Arc<dyn NpmRunner>, ghost_base: PathBuf) -> Arc<Self> {
    Arc::new(Self {
      manifests: ManifestCache::default(),
      npm,
      ghost_base,
      observable_paths: Default::default(),
      declared_overrides: Default::default(),
      packages: Default::default(),
      observables: Default::default(),
    })
  }

  pub fn ghost_base(&self) -> &Path {
    &self.ghost_base
  }

  /// Flags a path as a link target that should be published through a
  /// ghost mirror and watched for changes.
  pub fn mark_observable(&self, path: &Path) {
    self.observable_paths.lock().insert(path.to_path_buf());
  }

  pub fn is_observable(&self, path: &Path) -> bool {
    self.observable_paths.lock().contains(path)
  }

  /// Records the override map declared at `dir`. Later declarations for
  /// the same directory override earlier keys.
  pub fn register_overrides(
    &self,
    dir: &Path,
    overrides: HashMap<String, PathBuf>,
  ) {
    self
      .declared_overrides
      .lock()
      .entry(dir.to_path_buf())
      .or_default()
      .extend(overrides);
  }

  pub fn declared_overrides_for(
    &self,
    dir: &Path,
  ) -> HashMap<String, PathBuf> {
    self
      .declared_overrides
      .lock()
      .get(dir)
      .cloned()
      .unwrap_or_default()
  }

  pub fn has_observables(&self) -> bool {
    !self.observables.lock().is_empty()
  }

  /// Returns the node for a discovered root. A root that is itself the
  /// target of some other root's link resolves to its observable node, so
  /// the same path never lives in both registries.
  pub fn root_package(
    self: &Arc<Self>,
    path: &Path,
  ) -> Result<PackageRef, AnyError> {
    self.linked_package(path, &HashMap::new())
  }

  /// Returns the node for a path, observable when the scan marked it so.
  /// One node exists per path, kept in exactly one of the two registries,
  /// chosen at first construction. The inherited override map comes from
  /// the declaring consumer and is refined by declarations found at the
  /// target itself.
  pub fn linked_package(
    self: &Arc<Self>,
    path: &Path,
    inherited: &HashMap<String, PathBuf>,
  ) -> Result<PackageRef, AnyError> {
    let mut overrides = inherited.clone();
    overrides.extend(self.declared_overrides_for(path));

    if self.is_observable(path) {
      if let Some(package) = self.observables.lock().get(path) {
        return Ok(PackageRef::Observable(package.clone()));
      }
      let package = Arc::new(ObservablePackage::new(
        self.build_package(path, overrides)?,
        &self.ghost_base,
      ));
      Ok(PackageRef::Observable(
        self
          .observables
          .lock()
          .entry(path.to_path_buf())
          .or_insert(package)
          .clone(),
      ))
    } else {
      if let Some(package) = self.packages.lock().get(path) {
        return Ok(PackageRef::Plain(package.clone()));
      }
      let package = Arc::new(self.build_package(path, overrides)?);
      Ok(PackageRef::Plain(
        self
          .packages
          .lock()
          .entry(path.to_path_buf())
          .or_insert(package)
          .clone(),
      ))
    }
  }

  fn build_package(
    &self,
    path: &Path,
    overrides: HashMap<String, PathBuf>,
  ) -> Result<Package, AnyError> {
    let manifest = self.manifests.load(path).ok_or_else(|| {
      InvalidPackageError {
        path: path.to_path_buf(),
      }
    })?;
    Ok(Package::new(path.to_path_buf(), manifest, overrides))
  }
}
