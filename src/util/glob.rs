// Copyright 2018-2025 the Deno authors. MIT license.

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;

use crate::errors::AnyError;

/// Expands a glob pattern into the directories it matches.
pub fn expand_dirs(pattern: &str) -> Result<Vec<PathBuf>, AnyError> {
  let mut dirs = Vec::new();
  let paths = glob::glob_with(&escape_brackets(pattern), match_options())
    .with_context(|| format!("Failed to expand glob: \"{}\"", pattern))?;
  for path in paths {
    let path = path?;
    if path.is_dir() {
      dirs.push(path);
    }
  }
  Ok(dirs)
}

pub struct GlobPattern(glob::Pattern);

impl GlobPattern {
  pub fn new(pattern: &str) -> Result<Self, AnyError> {
    let pattern = glob::Pattern::new(pattern)
      .with_context(|| format!("Failed to parse glob: \"{}\"", pattern))?;
    Ok(Self(pattern))
  }

  pub fn matches_path(&self, path: &Path) -> bool {
    self.0.matches_path(path)
  }
}

pub struct GlobSet(Vec<GlobPattern>);

impl GlobSet {
  pub fn new(matchers: Vec<GlobPattern>) -> Self {
    Self(matchers)
  }

  pub fn from_patterns<'a>(
    patterns: impl IntoIterator<Item = &'a str>,
  ) -> Result<Self, AnyError> {
    let mut matchers = Vec::new();
    for pattern in patterns {
      matchers.push(GlobPattern::new(pattern)?);
    }
    Ok(Self::new(matchers))
  }

  pub fn matches_path(&self, path: &Path) -> bool {
    for pattern in &self.0 {
      if pattern.matches_path(path) {
        return true;
      }
    }
    false
  }
}

fn escape_brackets(pattern: &str) -> String {
  // Escape brackets - we currently don't support them, because with introduction
  // of glob expansion paths like "pages/[id]" would suddenly start giving
  // wrong results. We might want to revisit that in the future.
  pattern.replace('[', "[[]").replace(']', "[]]")
}

fn match_options() -> glob::MatchOptions {
  glob::MatchOptions {
    // false because it should work the same way on case insensitive file systems
    case_sensitive: false,
    // true because it copies what sh does
    require_literal_separator: true,
    // true because it copies with sh does—these files are considered "hidden"
    require_literal_leading_dot: true,
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  pub fn glob_set_matches_path() {
    let glob_set = GlobSet::new(vec![
      GlobPattern::new("foo/bar").unwrap(),
      GlobPattern::new("foo/baz").unwrap(),
    ]);

    assert!(glob_set.matches_path(Path::new("foo/bar")));
    assert!(glob_set.matches_path(Path::new("foo/baz")));
    assert!(!glob_set.matches_path(Path::new("foo/qux")));
  }

  #[test]
  pub fn glob_set_matches_subtree_pattern() {
    let glob_set = GlobSet::from_patterns(["lib/**", "*.md"]).unwrap();

    assert!(glob_set.matches_path(Path::new("lib/index.js")));
    assert!(glob_set.matches_path(Path::new("lib/nested/util.js")));
    assert!(glob_set.matches_path(Path::new("README.md")));
    assert!(!glob_set.matches_path(Path::new("src/index.js")));
  }
}
