// Copyright 2018-2025 the Deno authors. MIT license.

//! Debounced recursive filesystem watching for observable packages.

use std::collections::HashSet;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::event::EventKind;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use tokio::select;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;

use crate::colors;
use crate::context::RunContext;
use crate::errors::AnyError;
use crate::package::observable::ObservablePackage;

const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(500);

pub(crate) struct DebouncedReceiver {
  // The `recv()` call could be used in a tokio `select!` macro,
  // and so we store this state on the struct to ensure we don't
  // lose items if a `recv()` never completes
  received_items: HashSet<PathBuf>,
  receiver: UnboundedReceiver<Vec<PathBuf>>,
}

impl DebouncedReceiver {
  pub fn new(receiver: UnboundedReceiver<Vec<PathBuf>>) -> Self {
    Self {
      received_items: HashSet::new(),
      receiver,
    }
  }

  pub async fn recv(&mut self) -> Option<Vec<PathBuf>> {
    if self.received_items.is_empty() {
      self
        .received_items
        .extend(self.receiver.recv().await?.into_iter());
    }

    loop {
      select! {
        items = self.receiver.recv() => {
          self.received_items.extend(items?);
        }
        _ = sleep(DEBOUNCE_INTERVAL) => {
          return Some(self.received_items.drain().collect());
        }
      }
    }
  }
}

/// True for paths inside a dependency install directory or VCS metadata;
/// churn there never warrants a republish.
fn is_internal_path(path: &Path) -> bool {
  path.components().any(|component| {
    matches!(
      component,
      Component::Normal(name) if name == "node_modules" || name == ".git"
    )
  })
}

fn new_watcher(
  sender: mpsc::UnboundedSender<Vec<PathBuf>>,
) -> Result<RecommendedWatcher, AnyError> {
  Ok(Watcher::new(
    move |res: Result<notify::Event, notify::Error>| {
      let Ok(event) = res else {
        return;
      };

      if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
      ) {
        return;
      }

      let paths: Vec<PathBuf> = event
        .paths
        .iter()
        .filter(|path| !is_internal_path(path))
        .cloned()
        .collect();
      if !paths.is_empty() {
        let _ = sender.send(paths);
      }
    },
    Default::default(),
  )?)
}

/// Starts watching an observable package's source tree. Change batches
/// that survive the ignore patterns collapse into one `expire` each; the
/// watcher itself outlives any failed rebuild.
pub fn spawn(
  package: Arc<ObservablePackage>,
  ctx: Arc<RunContext>,
) -> Result<(), AnyError> {
  let (sender, receiver) = mpsc::unbounded_channel();
  let mut watcher = new_watcher(sender)?;
  watcher.watch(package.path(), RecursiveMode::Recursive)?;
  log::info!(
    "[{}] {}",
    package.name(),
    colors::intense_blue("watching for changes")
  );

  tokio::spawn(async move {
    // the watcher lives as long as this task
    let _watcher = watcher;
    let mut receiver = DebouncedReceiver::new(receiver);
    while let Some(paths) = receiver.recv().await {
      let changed = relevant_paths(&package, &paths);
      let Some(first) = changed.first() else {
        continue;
      };
      log::info!(
        "[{}] {} {}",
        package.name(),
        colors::gray("change detected:"),
        first.display()
      );
      package.expire(&ctx, true);
    }
  });
  Ok(())
}

/// Applies the package's ignore patterns to a debounced batch; only the
/// survivors justify a rebuild.
fn relevant_paths<'a>(
  package: &ObservablePackage,
  paths: &'a [PathBuf],
) -> Vec<&'a PathBuf> {
  paths
    .iter()
    .filter(|path| {
      let relative =
        path.strip_prefix(package.path()).unwrap_or(path.as_path());
      !package.is_ignored(relative)
    })
    .collect()
}
