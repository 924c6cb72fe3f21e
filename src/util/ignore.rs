// Copyright 2018-2025 the Deno authors. MIT license.

use std::path::Path;

use super::glob::GlobPattern;

struct IgnorePattern {
  raw: String,
  glob: Option<GlobPattern>,
}

/// Patterns loaded from an ignore file. A path is ignored when any line
/// occurs in it as a substring or matches it as a glob.
#[derive(Default)]
pub struct IgnorePatterns(Vec<IgnorePattern>);

impl IgnorePatterns {
  pub fn parse(text: &str) -> Self {
    let patterns = text
      .lines()
      .map(|line| line.trim())
      .filter(|line| !line.is_empty() && !line.starts_with('#'))
      .map(|line| IgnorePattern {
        raw: line.to_string(),
        glob: GlobPattern::new(line).ok(),
      })
      .collect();
    Self(patterns)
  }

  pub fn is_ignored(&self, path: &Path) -> bool {
    let text = path.to_string_lossy();
    self.0.iter().any(|pattern| {
      text.contains(&pattern.raw)
        || pattern
          .glob
          .as_ref()
          .is_some_and(|glob| glob.matches_path(path))
    })
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}
