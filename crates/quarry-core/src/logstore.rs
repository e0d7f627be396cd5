//! Persisted build-state logs
//!
//! Two independent logs per artifact live under `<home>/.quarry/.logs`: an
//! items log mapping tracked paths to their last-seen modification time
//! (one `"<path> <mtime>"` line per item) and an attributes log holding a
//! JSON snapshot of tracked attribute values. Log files are named from the
//! artifact kind and a hash of its name, unless the artifact assigns an
//! explicit log id. Both are rewritten after a successful build and deleted
//! by a clean.

use crate::error::{BuildError, BuildResult};
use crate::report;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-project metadata directory.
pub const META_DIR: &str = ".quarry";

/// Log directory under the metadata directory.
pub const LOGS_DIR: &str = ".logs";

const ATTRS_SUFFIX: &str = ".attrs";

/// Modification time of a path in whole seconds, `-1` when unavailable.
pub fn file_mtime(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(-1, |d| d.as_secs() as i64)
}

/// Handle to a project's log directory.
#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    /// Open the log store for a project home. A home without the metadata
    /// directory cannot track state: that is a warning, not an error, and
    /// disables logging for the artifact.
    pub fn open(home: &Path) -> BuildResult<Option<LogStore>> {
        let meta = home.join(META_DIR);
        if !meta.is_dir() {
            report::warn(format!(
                "Artifact state cannot be tracked since '{}' does not exist",
                meta.display()
            ));
            return Ok(None);
        }
        let dir = meta.join(LOGS_DIR);
        if !dir.is_dir() {
            fs::create_dir_all(&dir).map_err(|e| BuildError::log_io(&dir, e))?;
        }
        Ok(Some(Self { dir }))
    }

    /// Deterministic log file stem for an artifact.
    pub fn stem(kind: &str, name: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("{kind}_{}", &digest[..32])
    }

    pub fn items_path(&self, stem: &str) -> PathBuf {
        self.dir.join(stem)
    }

    pub fn attrs_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}{ATTRS_SUFFIX}"))
    }

    /// Read the items log back as a path → mtime map.
    pub fn load_items(&self, stem: &str) -> BuildResult<HashMap<String, i64>> {
        let path = self.items_path(stem);
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let text = fs::read_to_string(&path).map_err(|e| BuildError::log_io(&path, e))?;
        let mut items = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(split) = line.rfind(' ') else {
                continue;
            };
            let (name, time) = (line[..split].to_string(), &line[split + 1..]);
            items.insert(name, time.parse::<i64>().unwrap_or(-1));
        }
        Ok(items)
    }

    /// Rewrite the items log from the currently listed items. No items
    /// means no log; an unchanged listing is not rewritten. The file mtime
    /// is refreshed either way so it reflects the just-completed build.
    pub fn update_items(&self, stem: &str, current: &[(String, i64)]) -> BuildResult<()> {
        let path = self.items_path(stem);
        if current.is_empty() {
            return remove_if_exists(&path);
        }
        let previous = self.load_items(stem)?;
        let changed = current.len() != previous.len()
            || current.iter().any(|(n, t)| previous.get(n) != Some(t));
        if changed {
            let mut text = String::new();
            for (name, time) in current {
                text.push_str(name);
                text.push(' ');
                text.push_str(&time.to_string());
                text.push('\n');
            }
            fs::write(&path, text).map_err(|e| BuildError::log_io(&path, e))?;
        }
        touch(&path)
    }

    /// Read the attribute snapshot back, `None` when no log exists. A
    /// snapshot that cannot be parsed is removed and surfaced.
    pub fn load_attrs(&self, stem: &str) -> BuildResult<Option<BTreeMap<String, Value>>> {
        let path = self.attrs_path(stem);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| BuildError::log_io(&path, e))?;
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                remove_if_exists(&path)?;
                Err(BuildError::log_io(
                    &path,
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                ))
            }
        }
    }

    /// Rewrite the attribute snapshot. No tracked attributes means no log.
    pub fn update_attrs(&self, stem: &str, attrs: &BTreeMap<String, Value>) -> BuildResult<()> {
        let path = self.attrs_path(stem);
        if attrs.is_empty() {
            return remove_if_exists(&path);
        }
        let bytes = serde_json::to_vec(attrs).map_err(|e| {
            BuildError::log_io(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        fs::write(&path, bytes).map_err(|e| BuildError::log_io(&path, e))?;
        touch(&path)
    }

    /// Delete the logs, expiring the artifact.
    pub fn expire(&self, stem: &str, items: bool, attrs: bool) -> BuildResult<()> {
        if items {
            remove_if_exists(&self.items_path(stem))?;
        }
        if attrs {
            remove_if_exists(&self.attrs_path(stem))?;
        }
        Ok(())
    }

    /// The most recent of the enabled log files' modification times.
    pub fn mtime(&self, stem: &str, items: bool, attrs: bool) -> i64 {
        let t1 = if items {
            file_mtime(&self.items_path(stem))
        } else {
            -1
        };
        let t2 = if attrs {
            file_mtime(&self.attrs_path(stem))
        } else {
            -1
        };
        t1.max(t2)
    }
}

/// Whether the current items differ from the logged snapshot: an item is
/// new, timeless, newer than logged, or was deleted since the log was
/// written.
pub fn items_expired(current: &[(String, i64)], logged: &HashMap<String, i64>) -> bool {
    let mut seen = std::collections::HashSet::new();
    for (name, time) in current {
        match logged.get(name) {
            None => return true,
            Some(&lt) if *time == -1 || lt == -1 || lt < *time => return true,
            Some(_) => {}
        }
        seen.insert(name.as_str());
    }
    logged.keys().any(|name| !seen.contains(name.as_str()))
}

/// Whether the current attribute values differ from the snapshot: a value
/// changed, an attribute is new, or a logged attribute no longer exists.
pub fn attrs_expired(current: &BTreeMap<String, Value>, snapshot: &BTreeMap<String, Value>) -> bool {
    for (name, value) in current {
        match snapshot.get(name) {
            None => return true,
            Some(logged) if logged != value => return true,
            Some(_) => {}
        }
    }
    snapshot.keys().any(|name| !current.contains_key(name))
}

fn remove_if_exists(path: &Path) -> BuildResult<()> {
    if path.exists() {
        fs::remove_file(path).map_err(|e| BuildError::log_io(path, e))?;
    }
    Ok(())
}

fn touch(path: &Path) -> BuildResult<()> {
    let file = fs::File::options()
        .write(true)
        .open(path)
        .map_err(|e| BuildError::log_io(path, e))?;
    file.set_modified(SystemTime::now())
        .map_err(|e| BuildError::log_io(path, e))
}
