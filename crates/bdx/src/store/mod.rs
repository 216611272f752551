// Copyright 2025 BDX Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The shard store: a directory of write-once shards plus a manifest.
//!
//! Single writer, many readers. Readers see only committed manifests; the
//! writer commits by renaming a fresh manifest into place, after which
//! fully superseded shard directories are garbage-collected.

use anyhow::Context;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

use crate::schema::SCHEMA_VERSION;
use crate::shard::{ShardReader, ShardWriter};

mod lock;
mod manifest;

pub use lock::WriterLock;
pub use manifest::{FileState, Manifest, MANIFEST_FILE};

pub const SCHEMA_VERSION_FILE: &str = "schema.version";

/// The default store location for a binary directory, under the user's
/// cache directory. The directory's components become the store basename.
pub fn default_store_path(directory: &Path) -> PathBuf {
    let cache_dir = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".cache")
        });
    let basename: Vec<String> = directory
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    cache_dir.join("bdx").join("index").join(basename.join("!"))
}

/// Typed errors for store operations.
#[derive(Debug)]
pub enum StoreError {
    /// The on-disk schema version differs; the store must be rebuilt.
    SchemaVersionMismatch { found: u32, expected: u32 },
    /// Another writer holds the lock.
    LockContention(String),
    /// The store directory has never been indexed.
    DoesNotExist(String),
    /// The run was cancelled; nothing was committed.
    Cancelled,
    /// Shard write or manifest commit failure; the run aborts.
    Index(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::SchemaVersionMismatch { found, expected } => write!(
                f,
                "index schema version is {} but this build expects {}; delete the store and re-run `bdx index`",
                found, expected
            ),
            StoreError::LockContention(s) => write!(f, "lock contention: {}", s),
            StoreError::DoesNotExist(s) => write!(f, "index does not exist: {}", s),
            StoreError::Cancelled => write!(f, "cancelled"),
            StoreError::Index(s) => write!(f, "index error: {}", s),
        }
    }
}

impl Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Index(e.to_string())
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(e: anyhow::Error) -> Self {
        StoreError::Index(format!("{:#}", e))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Index(e.to_string())
    }
}

fn read_schema_version(dir: &Path) -> Result<Option<u32>, StoreError> {
    let path = dir.join(SCHEMA_VERSION_FILE);
    match std::fs::read_to_string(&path) {
        Ok(s) => {
            let v = s.trim().parse::<u32>().map_err(|_| {
                StoreError::Index(format!("unreadable schema version in {}", path.display()))
            })?;
            Ok(Some(v))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn check_schema_version(dir: &Path) -> Result<(), StoreError> {
    match read_schema_version(dir)? {
        Some(found) if found != SCHEMA_VERSION => {
            Err(StoreError::SchemaVersionMismatch { found, expected: SCHEMA_VERSION })
        }
        _ => Ok(()),
    }
}

/// Read-only view of a store: the committed manifest plus one reader per
/// referenced shard.
pub struct Store {
    dir: PathBuf,
    manifest: Manifest,
    shards: Vec<ShardReader>,
}

impl Store {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(StoreError::DoesNotExist(format!(
                "{} (run `bdx index` first)",
                dir.display()
            )));
        }
        check_schema_version(&dir)?;
        let manifest = Manifest::load(&manifest_path)?;
        let mut shards = Vec::new();
        for shard_id in manifest.shards_in_use() {
            let shard = ShardReader::open(dir.join(&shard_id))
                .with_context(|| format!("open shard {}", shard_id))?;
            debug!("opened shard {} ({} docs)", shard.id(), shard.doc_count());
            shards.push(shard);
        }
        Ok(Store { dir, manifest, shards })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn shards(&self) -> &[ShardReader] {
        &self.shards
    }

    /// All indexed file paths, in manifest (sorted) order.
    pub fn all_files(&self) -> impl Iterator<Item = &str> {
        self.manifest.entries.keys().map(|s| s.as_str())
    }

    /// True when `shard_id` is the committed owner of `path`'s records.
    pub fn owns(&self, path: &str, shard_id: &str) -> bool {
        self.manifest
            .entries
            .get(path)
            .map(|state| state.shard == shard_id)
            .unwrap_or(false)
    }
}

/// Exclusive writer handle. Holds the store lock for its lifetime; commit
/// replaces the manifest atomically and garbage-collects superseded shards.
pub struct StoreWriter {
    dir: PathBuf,
    manifest: Manifest,
    _lock: WriterLock,
}

impl StoreWriter {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        check_schema_version(&dir)?;
        let lock = WriterLock::acquire(&dir)
            .map_err(|e| StoreError::LockContention(e.to_string()))?;
        if read_schema_version(&dir)?.is_none() {
            std::fs::write(dir.join(SCHEMA_VERSION_FILE), format!("{}\n", SCHEMA_VERSION))?;
        }
        let manifest_path = dir.join(MANIFEST_FILE);
        let mut manifest = if manifest_path.exists() {
            Manifest::load(&manifest_path)?
        } else {
            Manifest::new()
        };
        // Entries whose shard vanished (crash, manual tampering) are
        // dropped so their files count as unindexed and get re-read.
        let missing: BTreeSet<String> = manifest
            .shards_in_use()
            .into_iter()
            .filter(|shard| !dir.join(shard).join(crate::shard::RECORDS_FILE).exists())
            .collect();
        if !missing.is_empty() {
            warn!(
                "{} shard(s) missing from the store; affected files will be re-indexed",
                missing.len()
            );
            manifest.entries.retain(|_, state| !missing.contains(&state.shard));
        }
        let writer = StoreWriter { dir, manifest, _lock: lock };
        writer.collect_garbage(&writer.manifest.shards_in_use());
        Ok(writer)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Claim a fresh shard id and open it for writing.
    pub fn new_shard(&self) -> Result<ShardWriter, StoreError> {
        let shard_id = format!("shard-{}", uuid::Uuid::new_v4());
        debug!("claimed shard {}", shard_id);
        Ok(ShardWriter::create(self.dir.join(shard_id))?)
    }

    /// Atomically replace the manifest, then delete shards no longer
    /// referenced by it.
    pub fn commit(&mut self, manifest: Manifest) -> Result<(), StoreError> {
        let old_shards = self.manifest.shards_in_use();
        manifest.save_atomic(&self.dir.join(MANIFEST_FILE))?;
        self.manifest = manifest;
        let live = self.manifest.shards_in_use();
        for stale in old_shards.difference(&live) {
            info!("removing superseded shard {}", stale);
            if let Err(e) = std::fs::remove_dir_all(self.dir.join(stale)) {
                warn!("could not remove shard {}: {}", stale, e);
            }
        }
        Ok(())
    }

    /// Delete shard directories the manifest does not reference: leftovers
    /// of interrupted runs.
    fn collect_garbage(&self, live: &BTreeSet<String>) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("shard-") || live.contains(&name) {
                continue;
            }
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                info!("removing orphan shard {}", name);
                if let Err(e) = std::fs::remove_dir_all(entry.path()) {
                    warn!("could not remove orphan shard {}: {}", name, e);
                }
            }
        }
        // a crashed commit may also leave manifest.tmp behind
        let _ = std::fs::remove_file(self.dir.join("manifest.tmp"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_store_fails() {
        let td = tempfile::tempdir().unwrap();
        match Store::open(td.path().join("nope")) {
            Err(StoreError::DoesNotExist(_)) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn schema_version_mismatch_is_refused() {
        let td = tempfile::tempdir().unwrap();
        std::fs::write(td.path().join(SCHEMA_VERSION_FILE), "999\n").unwrap();
        match StoreWriter::open(td.path()) {
            Err(StoreError::SchemaVersionMismatch { found: 999, .. }) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn orphan_shards_are_collected_on_open() {
        let td = tempfile::tempdir().unwrap();
        {
            let _w = StoreWriter::open(td.path()).unwrap();
        }
        let orphan = td.path().join("shard-orphan");
        std::fs::create_dir_all(&orphan).unwrap();
        std::fs::write(orphan.join("records.bin"), b"junk").unwrap();
        let _w = StoreWriter::open(td.path()).unwrap();
        assert!(!orphan.exists());
    }

    #[test]
    fn commit_drops_superseded_shards() {
        let td = tempfile::tempdir().unwrap();
        let mut w = StoreWriter::open(td.path()).unwrap();

        let shard_a = w.new_shard().unwrap();
        let id_a = shard_a.dir().file_name().unwrap().to_string_lossy().into_owned();
        shard_a.finish().unwrap();
        let mut m = w.manifest().clone();
        m.entries.insert("/x.o".into(), FileState { mtime: 1, shard: id_a.clone() });
        w.commit(m).unwrap();
        assert!(td.path().join(&id_a).exists());

        let shard_b = w.new_shard().unwrap();
        let id_b = shard_b.dir().file_name().unwrap().to_string_lossy().into_owned();
        shard_b.finish().unwrap();
        let mut m = w.manifest().clone();
        m.entries.insert("/x.o".into(), FileState { mtime: 2, shard: id_b });
        w.commit(m).unwrap();
        assert!(!td.path().join(&id_a).exists());
    }
}
