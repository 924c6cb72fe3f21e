// Copyright 2018-2025 the Deno authors. MIT license.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
  name = "npmlink",
  version,
  about = "Links local npm packages into consumers and rebuilds them on change"
)]
pub struct Flags {
  /// Workspace roots to scan for link declarations
  #[arg(value_name = "DIR")]
  pub paths: Vec<PathBuf>,

  /// Also treat directories matching this glob (relative to each root)
  /// as roots when they contain a manifest
  #[arg(long, value_name = "GLOB")]
  pub include: Option<String>,

  /// Discover packages matching this glob and record them in each root's
  /// link declaration file
  #[arg(long, value_name = "GLOB")]
  pub add: Option<String>,

  /// Link a single dependency by name (requires --to)
  #[arg(long, value_name = "NAME", requires = "to")]
  pub pkg: Option<String>,

  /// Path of the local package --pkg should resolve to
  #[arg(long, value_name = "DIR", requires = "pkg")]
  pub to: Option<PathBuf>,

  /// npm registry URL, exported as npm_config_registry
  #[arg(long, value_name = "URL")]
  pub registry: Option<String>,

  /// One of: error, warn, info, debug, trace
  #[arg(long, short = 'L', value_name = "LEVEL")]
  pub log_level: Option<String>,

  /// Shorthand for --log-level debug
  #[arg(long, short = 'v')]
  pub verbose: bool,
}

impl Flags {
  pub fn resolve_log_level(&self) -> Option<log::Level> {
    if self.verbose {
      return Some(log::Level::Debug);
    }
    match self.log_level.as_deref() {
      Some("error") => Some(log::Level::Error),
      Some("warn") => Some(log::Level::Warn),
      Some("info") => Some(log::Level::Info),
      Some("debug") => Some(log::Level::Debug),
      Some("trace") => Some(log::Level::Trace),
      _ => None,
    }
  }
}
