// Copyright 2018-2025 the Deno authors. MIT license.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::context::RunContext;
use crate::errors::AnyError;
use crate::manifest::Manifest;
use crate::util::fs::join_package_name;
use crate::util::fs::remove_path_if_exists;

/// Regenerates `node_modules/.bin` entries in the consuming package for a
/// just-linked child and everything reachable from it on disk. A visited
/// set keeps cyclic dependency graphs bounded.
pub fn create_bin_scripts(
  ctx: &RunContext,
  consumer_path: &Path,
  child: &Manifest,
) -> Result<(), AnyError> {
  let node_modules = consumer_path.join("node_modules");
  let bin_root = node_modules.join(".bin");
  fs::create_dir_all(&bin_root)
    .with_context(|| format!("Creating {}", bin_root.display()))?;

  set_up_package_bins(child, &join_package_name(&node_modules, &child.name), &bin_root);

  let mut pending: Vec<String> =
    child.all_dependencies.keys().cloned().collect();
  let mut visited = HashSet::new();
  while let Some(name) = pending.pop() {
    if !visited.insert(name.clone()) {
      continue;
    }
    let package_path = join_package_name(&node_modules, &name);
    if let Some(manifest) = ctx.manifests.load(&package_path) {
      set_up_package_bins(&manifest, &package_path, &bin_root);
      pending.extend(manifest.all_dependencies.keys().cloned());
    }
  }
  Ok(())
}

fn set_up_package_bins(
  manifest: &Manifest,
  package_path: &Path,
  bin_root: &Path,
) {
  let bins = manifest.bin_entries();
  if bins.is_empty() {
    return;
  }
  log::debug!(
    "(bin) {} {}",
    manifest.name,
    bins
      .iter()
      .map(|(name, script)| format!("[{name} -> {script}]"))
      .collect::<Vec<_>>()
      .join(", ")
  );
  for (bin_name, bin_script) in &bins {
    let link = bin_root.join(bin_name);
    let original = package_path.join(bin_script);
    // treat a removal failure as nothing to remove
    let _ = remove_path_if_exists(&link);
    if let Err(err) = set_up_bin_entry(&original, &link) {
      log::warn!(
        "{} can't set up '{}' bin at {}: {}",
        crate::colors::yellow("Warning"),
        bin_name,
        link.display(),
        err
      );
    }
  }
}

#[cfg(unix)]
fn set_up_bin_entry(original: &Path, link: &Path) -> Result<(), AnyError> {
  use std::os::unix::fs::symlink;
  use std::os::unix::fs::PermissionsExt;

  if let Ok(metadata) = fs::metadata(original) {
    let mut perms = metadata.permissions();
    if perms.mode() & 0o111 == 0 {
      // if the original file is not executable, make it executable
      perms.set_mode(perms.mode() | 0o111);
      fs::set_permissions(original, perms).with_context(|| {
        format!("Setting permissions on '{}'", original.display())
      })?;
    }
  }
  symlink(original, link)?;
  Ok(())
}

#[cfg(windows)]
fn set_up_bin_entry(original: &Path, link: &Path) -> Result<(), AnyError> {
  std::os::windows::fs::symlink_file(original, link)?;
  Ok(())
}
