// Copyright 2018-2025 the Deno authors. MIT license.

use std::path::PathBuf;

pub use anyhow::Error as AnyError;

/// The directory does not contain a loadable manifest with a `name` field.
#[derive(Debug, thiserror::Error)]
#[error("invalid package at {}", .path.display())]
pub struct InvalidPackageError {
  pub path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
  #[error("failed to spawn hook \"{name}\"")]
  Spawn {
    name: String,
    #[source]
    source: std::io::Error,
  },
  #[error("hook \"{name}\" exited with {status}")]
  Exited {
    name: String,
    status: std::process::ExitStatus,
  },
}
