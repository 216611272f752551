use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const MANIFEST_FILE: &str = "manifest";
pub const MANIFEST_VERSION: u32 = 1;

/// Per-file state: the mtime observed when the owning shard was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub mtime: u64,
    pub shard: String,
}

/// The committed view of the store: which files are indexed, where their
/// records live, and when they were last seen. Entries are a `BTreeMap` so
/// serialization is deterministic; an unchanged run re-serializes to the
/// identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_dir: Option<String>,
    pub entries: BTreeMap<String, FileState>,
}

impl Manifest {
    pub fn new() -> Self {
        Manifest {
            version: MANIFEST_VERSION,
            binary_dir: None,
            entries: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read manifest {}", path.display()))?;
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse manifest {}", path.display()))?;
        Ok(manifest)
    }

    /// Write to a temporary sibling and rename into place, so readers only
    /// ever see a complete manifest.
    pub fn save_atomic(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(self).context("serialize manifest")?;
        std::fs::write(&tmp, &bytes)
            .with_context(|| format!("write manifest {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("commit manifest {}", path.display()))?;
        Ok(())
    }

    /// Shard ids referenced by at least one entry.
    pub fn shards_in_use(&self) -> BTreeSet<String> {
        self.entries.values().map(|s| s.shard.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_roundtrip_is_byte_stable() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join(MANIFEST_FILE);
        let mut m = Manifest::new();
        m.entries.insert(
            "/b.o".into(),
            FileState { mtime: 2, shard: "shard-x".into() },
        );
        m.entries.insert(
            "/a.o".into(),
            FileState { mtime: 1, shard: "shard-x".into() },
        );
        m.save_atomic(&path).unwrap();
        let first = std::fs::read(&path).unwrap();

        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded, m);
        loaded.save_atomic(&path).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }
}
