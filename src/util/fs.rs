// Copyright 2018-2025 the Deno authors. MIT license.

use std::fs;
use std::io::Error;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use walkdir::WalkDir;

use crate::errors::AnyError;

pub fn canonicalize_path(path: &Path) -> Result<PathBuf, Error> {
  let path = path.canonicalize()?;
  #[cfg(windows)]
  return Ok(strip_unc_prefix(path));
  #[cfg(not(windows))]
  return Ok(path);
}

#[cfg(windows)]
fn strip_unc_prefix(path: PathBuf) -> PathBuf {
  use std::path::Component;
  use std::path::Prefix;

  let mut components = path.components();
  match components.next() {
    Some(Component::Prefix(prefix)) => {
      match prefix.kind() {
        // \\?\device
        Prefix::Verbatim(device) => {
          let mut path = PathBuf::new();
          path.push(format!(r"\\{}\", device.to_string_lossy()));
          path.extend(components.filter(|c| !matches!(c, Component::RootDir)));
          path
        }
        // \\?\c:\path
        Prefix::VerbatimDisk(_) => {
          let mut path = PathBuf::new();
          path.push(prefix.as_os_str().to_string_lossy().replace(r"\\?\", ""));
          path.extend(components);
          path
        }
        // \\?\UNC\hostname\share_name\path
        Prefix::VerbatimUNC(hostname, share_name) => {
          let mut path = PathBuf::new();
          path.push(format!(
            r"\\{}\{}\",
            hostname.to_string_lossy(),
            share_name.to_string_lossy()
          ));
          path.extend(components.filter(|c| !matches!(c, Component::RootDir)));
          path
        }
        _ => path,
      }
    }
    _ => path,
  }
}

/// Joins an npm package name to a path, splitting scoped names
/// into their own path segments.
pub fn join_package_name(path: &Path, package_name: &str) -> PathBuf {
  let mut path = path.to_path_buf();
  // ensure backslashes are used on windows
  for part in package_name.split('/') {
    path = path.join(part);
  }
  path
}

/// Removes whatever lives at `path`, whether it is a file, a symlink
/// or a directory tree. A missing path is not an error.
pub fn remove_path_if_exists(path: &Path) -> Result<(), Error> {
  let metadata = match fs::symlink_metadata(path) {
    Ok(metadata) => metadata,
    Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
    Err(err) => return Err(err),
  };
  if metadata.is_dir() {
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  }
}

pub fn symlink_dir(original: &Path, link: &Path) -> Result<(), Error> {
  #[cfg(unix)]
  {
    std::os::unix::fs::symlink(original, link)
  }
  #[cfg(windows)]
  {
    std::os::windows::fs::symlink_dir(original, link)
  }
}

/// Mirrors `src` into `dst`, always skipping VCS metadata and optionally
/// the dependency install directory. Existing destination files are only
/// rewritten when their size or modification time differs; nothing is
/// deleted from the destination.
pub fn sync_dir(
  src: &Path,
  dst: &Path,
  exclude_node_modules: bool,
) -> Result<(), AnyError> {
  fs::create_dir_all(dst)
    .with_context(|| format!("Creating {}", dst.display()))?;

  let walker = WalkDir::new(src)
    .follow_links(false)
    .into_iter()
    .filter_entry(move |entry| {
      let name = entry.file_name().to_string_lossy();
      name != ".git" && (!exclude_node_modules || name != "node_modules")
    });

  for entry in walker {
    let entry = entry?;
    let relative = entry.path().strip_prefix(src)?;
    if relative.as_os_str().is_empty() {
      continue;
    }
    let target = dst.join(relative);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      if target.is_file() || target.is_symlink() {
        remove_path_if_exists(&target)?;
      }
      fs::create_dir_all(&target)
        .with_context(|| format!("Creating {}", target.display()))?;
    } else if file_type.is_symlink() {
      let original = fs::read_link(entry.path())?;
      remove_path_if_exists(&target)?;
      #[cfg(unix)]
      std::os::unix::fs::symlink(&original, &target)
        .with_context(|| format!("Linking {}", target.display()))?;
      #[cfg(windows)]
      {
        let _ = std::os::windows::fs::symlink_dir(&original, &target);
      }
    } else if !is_up_to_date(entry.path(), &target) {
      remove_path_if_exists(&target)?;
      fs::copy(entry.path(), &target).with_context(|| {
        format!(
          "Copying {} to {}",
          entry.path().display(),
          target.display()
        )
      })?;
    }
  }
  Ok(())
}

fn is_up_to_date(src: &Path, dst: &Path) -> bool {
  let Ok(src_metadata) = fs::metadata(src) else {
    return false;
  };
  let Ok(dst_metadata) = fs::metadata(dst) else {
    return false;
  };
  if src_metadata.len() != dst_metadata.len() {
    return false;
  }
  match (src_metadata.modified(), dst_metadata.modified()) {
    (Ok(src_time), Ok(dst_time)) => src_time <= dst_time,
    _ => false,
  }
}

#[cfg(test)]
mod test {
  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  use super::*;

  #[test]
  fn join_package_name_splits_scopes() {
    let base = Path::new("/proj/node_modules");
    assert_eq!(
      join_package_name(base, "@scope/pkg"),
      base.join("@scope").join("pkg")
    );
    assert_eq!(join_package_name(base, "pkg"), base.join("pkg"));
  }

  #[test]
  fn remove_path_handles_missing_files_and_dirs() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("missing");
    remove_path_if_exists(&missing).unwrap();

    let file = temp.path().join("file.txt");
    fs::write(&file, "x").unwrap();
    remove_path_if_exists(&file).unwrap();
    assert!(!file.exists());

    let dir = temp.path().join("dir");
    fs::create_dir_all(dir.join("nested")).unwrap();
    fs::write(dir.join("nested/file.txt"), "x").unwrap();
    remove_path_if_exists(&dir).unwrap();
    assert!(!dir.exists());
  }

  #[test]
  fn sync_dir_excludes_git_metadata() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let dst = temp.path().join("dst");
    fs::create_dir_all(src.join(".git")).unwrap();
    fs::create_dir_all(src.join("lib")).unwrap();
    fs::write(src.join(".git/HEAD"), "ref").unwrap();
    fs::write(src.join("lib/index.js"), "module.exports = 1;").unwrap();

    sync_dir(&src, &dst, false).unwrap();

    assert!(!dst.join(".git").exists());
    assert_eq!(
      fs::read_to_string(dst.join("lib/index.js")).unwrap(),
      "module.exports = 1;"
    );
  }

  #[test]
  fn sync_dir_node_modules_modes() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let dst = temp.path().join("dst");
    fs::create_dir_all(src.join("node_modules/dep")).unwrap();
    fs::write(src.join("node_modules/dep/index.js"), "x").unwrap();
    fs::write(src.join("main.js"), "y").unwrap();

    sync_dir(&src, &dst, true).unwrap();
    assert!(!dst.join("node_modules").exists());
    assert!(dst.join("main.js").exists());

    sync_dir(&src, &dst, false).unwrap();
    assert!(dst.join("node_modules/dep/index.js").exists());
  }

  #[test]
  fn sync_dir_overwrites_changed_files() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let dst = temp.path().join("dst");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("a.txt"), "one").unwrap();
    sync_dir(&src, &dst, false).unwrap();

    fs::write(src.join("a.txt"), "two!").unwrap();
    sync_dir(&src, &dst, false).unwrap();
    assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "two!");
  }
}
