use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use super::interfaces::{ManagedProcess, ProcessRecord};
use crate::prelude::*;

/// Write the registry as a JSON object keyed by process name.
///
/// The file is replaced atomically so a concurrent reader never sees a partial registry.
pub(super) fn save<'a>(
    path: &Path,
    processes: impl IntoIterator<Item = &'a ManagedProcess>,
) -> Result<()> {
    let records: BTreeMap<&str, ProcessRecord> = processes
        .into_iter()
        .map(|process| (process.name.as_str(), ProcessRecord::from(process)))
        .collect();
    let content = serde_json::to_string_pretty(&records)?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create state directory {}", parent.display()))?;

    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(content.as_bytes())?;
    file.persist(path)
        .with_context(|| format!("Failed to write state file {}", path.display()))?;
    Ok(())
}

/// Read the processes of a previous invocation. Only terminal entries come back: a process that
/// was running is owned by the invocation that launched it.
pub(super) fn load(path: &Path) -> Result<Vec<ManagedProcess>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read state file {}", path.display()));
        }
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let records: BTreeMap<String, ProcessRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse state file {}", path.display()))?;

    Ok(records
        .into_values()
        .filter(|record| record.status.is_terminal())
        .map(ManagedProcess::from)
        .collect())
}

pub(super) fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to delete state file {}", path.display()))
        }
    }
}
