// Legacy single-profile sync-state file. The profile store supersedes it;
// it is still honored when a profile sets `state_file_override` so
// pre-multi-tenant deployments keep their incremental cursors.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::AbsHardcoverResult;

pub const STATE_FILE_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStateFile {
    pub version: String,
    pub last_sync_timestamp: i64,
    pub last_full_sync: i64,
    pub last_sync_success: bool,
    pub last_sync_duration_ms: i64,
}

impl Default for SyncStateFile {
    fn default() -> Self {
        SyncStateFile {
            version: STATE_FILE_VERSION.to_string(),
            last_sync_timestamp: 0,
            last_full_sync: 0,
            last_sync_success: false,
            last_sync_duration_ms: 0,
        }
    }
}

impl SyncStateFile {
    /// Missing file is a fresh start, not an error. An unreadable file is
    /// reported so a typoed override path does not silently force full syncs.
    pub fn load(path: &Path) -> AbsHardcoverResult<Option<Self>> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let state: SyncStateFile =
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(state))
    }

    /// Write via temp file + rename so a crash never leaves a torn file.
    pub fn save(&self, path: &Path) -> AbsHardcoverResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            SyncStateFile::load(&dir.path().join("state.json")).unwrap(),
            None
        );
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = SyncStateFile {
            version: STATE_FILE_VERSION.to_string(),
            last_sync_timestamp: 1_700_000_000_000,
            last_full_sync: 1_699_000_000_000,
            last_sync_success: true,
            last_sync_duration_ms: 45_000,
        };
        state.save(&path).unwrap();
        assert_eq!(SyncStateFile::load(&path).unwrap(), Some(state));
        // No temp file left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_silent_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(SyncStateFile::load(&path).is_err());
    }

    #[test]
    fn versioned_wire_format() {
        let state = SyncStateFile::default();
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["version"], "1.0");
        assert!(value.get("last_sync_timestamp").is_some());
        assert!(value.get("last_full_sync").is_some());
        assert!(value.get("last_sync_success").is_some());
        assert!(value.get("last_sync_duration_ms").is_some());
    }
}
