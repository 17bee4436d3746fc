//! Script source discovery
//!
//! Expands configured sources (individual files and directories) into an
//! ordered, de-duplicated list of script files.

use regex::Regex;
use runhost_core::{Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};
use walkdir::WalkDir;

/// Compile a file name glob (`*`, `?`) into a case-insensitive matcher
pub fn glob_matcher(pattern: &str) -> Result<Regex> {
    if pattern.is_empty() {
        return Err(Error::validation("Script pattern cannot be empty"));
    }

    let mut expr = String::from("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');

    Regex::new(&expr).map_err(|e| Error::validation(format!("Invalid script pattern '{pattern}': {e}")))
}

/// Resolve sources into script files
///
/// Files are taken as-is. Directories are walked down to `depth` levels
/// (1 = top level only) and contribute files whose name matches `pattern`,
/// sorted by name. Missing sources are skipped with a warning. The first
/// occurrence of each file wins.
pub fn resolve_script_sources(
    sources: &[PathBuf],
    pattern: &str,
    depth: usize,
) -> Result<Vec<PathBuf>> {
    let matcher = glob_matcher(pattern)?;
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for source in sources {
        if source.is_file() {
            push_unique(&mut files, &mut seen, source.clone());
        } else if source.is_dir() {
            let walker = WalkDir::new(source)
                .min_depth(1)
                .max_depth(depth.max(1))
                .sort_by_file_name();

            for entry in walker {
                let entry = entry.map_err(std::io::Error::from)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let matches = entry
                    .file_name()
                    .to_str()
                    .map(|name| matcher.is_match(name))
                    .unwrap_or(false);
                if matches {
                    push_unique(&mut files, &mut seen, entry.into_path());
                }
            }
        } else {
            warn!(source = %source.display(), "Script source not found, skipping");
        }
    }

    Ok(files)
}

/// Directories searched when importing modules by name
///
/// Directory sources are used directly; file sources contribute their parent.
pub fn module_search_paths(sources: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut dirs = Vec::new();

    for source in sources {
        let dir = if source.is_dir() {
            Some(source.as_path())
        } else {
            source.parent().filter(|p| !p.as_os_str().is_empty())
        };
        if let Some(dir) = dir {
            push_unique(&mut dirs, &mut seen, dir.to_path_buf());
        }
    }

    dirs
}

fn push_unique(list: &mut Vec<PathBuf>, seen: &mut HashSet<PathBuf>, path: PathBuf) {
    if seen.insert(canonical(&path)) {
        trace!(path = %path.display(), "Script source resolved");
        list.push(path);
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
