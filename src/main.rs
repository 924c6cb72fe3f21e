// Copyright 2018-2025 the Deno authors. MIT license.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use npmlink::args::Flags;
use npmlink::colors;
use npmlink::context::RunContext;
use npmlink::errors::AnyError;
use npmlink::manager;
use npmlink::manager::Manager;
use npmlink::npm::RealNpmRunner;
use npmlink::util;

fn main() {
  let flags = Flags::parse();
  util::logger::init(flags.resolve_log_level());

  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
    .unwrap();
  if let Err(err) = runtime.block_on(run(flags)) {
    log::error!("{}: {err:?}", colors::red_bold("error"));
    std::process::exit(1);
  }
}

async fn run(flags: Flags) -> Result<(), AnyError> {
  let ghost_base = std::env::temp_dir().join("npmlink");
  std::fs::create_dir_all(&ghost_base)
    .with_context(|| format!("Creating {}", ghost_base.display()))?;

  let npm = Arc::new(RealNpmRunner::new(flags.registry.clone()));
  let ctx = RunContext::new(npm, ghost_base.clone());
  let mut manager = Manager::new(ctx.clone());

  log::info!("{} (ctrl+c -> exit)", colors::green("npmlink"));
  log::info!(" - tmp: {}", ghost_base.display());

  let mut roots = Vec::new();
  for path in if flags.paths.is_empty() {
    vec![PathBuf::from(".")]
  } else {
    flags.paths.clone()
  } {
    let root = util::fs::canonicalize_path(&path)
      .with_context(|| format!("Resolving {}", path.display()))?;
    roots.push(root);
  }

  if let Some(pattern) = &flags.add {
    let added = manager::append_link_records(&ctx, pattern, &roots)?;
    log::info!(" - added {added} package(s) to link declarations");
  }

  if let (Some(pkg), Some(to)) = (&flags.pkg, &flags.to) {
    let cwd = std::env::current_dir()?;
    log::info!(" - link: '{pkg}' -> '{}'", to.display());
    manager.set_link(pkg, to, &cwd);
  }

  for root in &roots {
    let discovered = manager.scan(root, flags.include.as_deref())?;
    log::info!(" {}", root.display());
    for item in &discovered {
      let Some(manifest) = ctx.manifests.load(&item.path) else {
        log::warn!(
          "   {} has no loadable manifest",
          item.path.display()
        );
        continue;
      };
      log::info!(
        "   /{}",
        item.path.strip_prefix(root).unwrap_or(&item.path).display()
      );
      for (name, target) in &item.overrides {
        if manifest.all_dependencies.contains_key(name) {
          log::info!(
            "     [{}] -> {}",
            colors::cyan(name),
            target.display()
          );
        }
      }
    }
  }

  log::info!("");
  manager.run().await?;

  // watchers keep rebuilding until the process is interrupted
  if ctx.has_observables() {
    futures::future::pending::<()>().await;
  }
  Ok(())
}
