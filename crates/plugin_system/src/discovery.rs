//! Finding plugin files in the search paths.
//!
//! Plugin files are named `plugin_<name>-<major>-<minor>-<patch>.<ext>`.

use hearth_core::{parse_version, VersionCriteria, VersionTriple};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A plugin file found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginCandidate {
    pub name: String,
    pub version: VersionTriple,
    pub path: PathBuf,
}

/// Splits a plugin file name into plugin name and version.
pub fn parse_plugin_file_name(file_name: &str, extension: &str) -> Option<(String, VersionTriple)> {
    let stem = file_name
        .strip_suffix(extension)?
        .strip_suffix('.')?;
    let (name, version) = stem.strip_prefix("plugin_")?.split_once('-')?;
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), parse_version(version)?))
}

/// Lists every plugin file in `search_paths`, directory by directory in the
/// given order and by file name within a directory. Missing or unreadable
/// directories are skipped with a warning.
pub fn discover(search_paths: &[PathBuf], extension: &str) -> Vec<PluginCandidate> {
    let mut candidates = Vec::new();
    for dir in search_paths {
        candidates.extend(scan_directory(dir, extension));
    }
    candidates
}

fn scan_directory(dir: &Path, extension: &str) -> Vec<PluginCandidate> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Plugin directory {} is not readable: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut found: Vec<PluginCandidate> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter_map(|path| {
            let file_name = path.file_name()?.to_str()?;
            match parse_plugin_file_name(file_name, extension) {
                Some((name, version)) => Some(PluginCandidate {
                    name,
                    version,
                    path: path.clone(),
                }),
                None => {
                    debug!("Skipping non-plugin file: {}", path.display());
                    None
                }
            }
        })
        .collect();

    found.sort_by(|a, b| a.path.cmp(&b.path));
    found
}

/// Picks the candidate for `name` with the highest version satisfying the
/// request. On equal versions the earliest candidate wins, so earlier search
/// paths take precedence.
pub fn select_candidate<'a>(
    candidates: &'a [PluginCandidate],
    name: &str,
    requested: VersionTriple,
    criteria: VersionCriteria,
) -> Option<&'a PluginCandidate> {
    candidates
        .iter()
        .filter(|c| c.name == name && criteria.accepts(requested, c.version))
        .fold(None, |best: Option<&PluginCandidate>, candidate| match best {
            Some(best) if best.version >= candidate.version => Some(best),
            _ => Some(candidate),
        })
}
