// Copyright 2018-2025 the Deno authors. MIT license.

//! Boundary to the npm executable: registry installs and lifecycle scripts.

use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use async_trait::async_trait;

use crate::errors::AnyError;
use crate::errors::HookError;

#[async_trait]
pub trait NpmRunner: Send + Sync {
  /// Runs one registry install for the given `name@range` specs with the
  /// consuming package as the working directory.
  async fn install(&self, cwd: &Path, specs: &[String])
    -> Result<(), AnyError>;

  /// Runs a lifecycle script by name. The caller is responsible for only
  /// invoking scripts the manifest declares.
  async fn run_script(&self, cwd: &Path, name: &str) -> Result<(), AnyError>;
}

/// Shells out to the real npm binary, inheriting stdio so its output
/// interleaves with ours on the terminal.
pub struct RealNpmRunner {
  registry_url: Option<String>,
}

impl RealNpmRunner {
  pub fn new(registry_url: Option<String>) -> Self {
    Self { registry_url }
  }

  fn command(&self, cwd: &Path) -> tokio::process::Command {
    let mut command = tokio::process::Command::new("npm");
    command.current_dir(cwd);
    if let Some(registry_url) = &self.registry_url {
      command.env("npm_config_registry", registry_url);
    }
    command
  }
}

#[async_trait]
impl NpmRunner for RealNpmRunner {
  async fn install(
    &self,
    cwd: &Path,
    specs: &[String],
  ) -> Result<(), AnyError> {
    let mut command = self.command(cwd);
    command
      .arg("i")
      .arg("--no-shrinkwrap")
      .arg("--no-package-lock")
      .args(specs);
    let status = command
      .status()
      .await
      .with_context(|| format!("Failed to spawn npm in {}", cwd.display()))?;
    if !status.success() {
      bail!("npm install exited with {} in {}", status, cwd.display());
    }
    Ok(())
  }

  async fn run_script(&self, cwd: &Path, name: &str) -> Result<(), AnyError> {
    let mut command = self.command(cwd);
    command.arg("run").arg(name);
    let status =
      command.status().await.map_err(|source| HookError::Spawn {
        name: name.to_string(),
        source,
      })?;
    if !status.success() {
      return Err(
        HookError::Exited {
          name: name.to_string(),
          status,
        }
        .into(),
      );
    }
    Ok(())
  }
}
