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

//! The indexer pipeline: compute the work set against the committed
//! manifest, fan ELF parsing out over a thread pool, write one fresh shard
//! for the run, and commit the new manifest atomically.

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::discover::BinaryDirectory;
use crate::elf::{self, ElfOptions};
use crate::store::{FileState, StoreError, StoreWriter};
use crate::types::ParsedObject;

/// User settings for indexing, fed from `-o key=value` CLI options.
#[derive(Debug, Clone)]
pub struct IndexingOptions {
    pub num_processes: usize,
    pub index_relocations: bool,
    pub min_symbol_size: u64,
    pub use_dwarfdump: bool,
    /// Flush the shard write buffer once it holds this many bytes.
    pub write_buffer_bytes: usize,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        IndexingOptions {
            num_processes: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            index_relocations: true,
            min_symbol_size: 1,
            use_dwarfdump: false,
            write_buffer_bytes: 8 * 1024 * 1024,
        }
    }
}

impl IndexingOptions {
    /// Apply one `key=value` option.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        fn parse_bool(value: &str) -> Result<bool> {
            match value {
                "1" | "true" | "yes" => Ok(true),
                "0" | "false" | "no" => Ok(false),
                _ => Err(anyhow!("expected a boolean, got \"{}\"", value)),
            }
        }
        match key {
            "num_processes" => self.num_processes = value.parse::<usize>()?.max(1),
            "index_relocations" => self.index_relocations = parse_bool(value)?,
            "min_symbol_size" => self.min_symbol_size = value.parse()?,
            "use_dwarfdump" => self.use_dwarfdump = parse_bool(value)?,
            "write_buffer_bytes" => self.write_buffer_bytes = value.parse()?,
            _ => {
                return Err(anyhow!(
                    "unknown option \"{}\" (known: num_processes, index_relocations, \
                     min_symbol_size, use_dwarfdump, write_buffer_bytes)",
                    key
                ))
            }
        }
        Ok(())
    }

    fn elf_options(&self) -> ElfOptions {
        ElfOptions {
            index_relocations: self.index_relocations,
            min_symbol_size: self.min_symbol_size,
            use_dwarfdump: self.use_dwarfdump,
        }
    }
}

/// Counters reported after an indexing run.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexingStats {
    pub num_files_indexed: usize,
    pub num_files_changed: usize,
    pub num_files_deleted: usize,
    pub num_symbols_indexed: usize,
}

/// Cooperative cancellation for an indexing run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct WorkSet {
    /// Files to (re)parse: added and changed.
    parse: Vec<PathBuf>,
    /// Manifest entries to drop: removed or vanished files.
    drop: Vec<String>,
    num_changed: usize,
}

fn compute_work_set(writer: &StoreWriter, files: &[PathBuf]) -> WorkSet {
    let input: BTreeSet<String> = files
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();

    let mut parse = Vec::new();
    let mut drop = Vec::new();
    for file in files {
        let key = file.to_string_lossy().into_owned();
        match writer.manifest().entries.get(&key) {
            None => {
                debug!("file added: {}", key);
                parse.push(file.clone());
            }
            Some(state) => match elf::file_mtime_ns(file) {
                Ok(mtime) if mtime != state.mtime => {
                    debug!("file changed: {}", key);
                    parse.push(file.clone());
                }
                Ok(_) => {}
                Err(_) => {
                    // vanished between discovery and stat
                    debug!("file vanished: {}", key);
                    drop.push(key);
                }
            },
        }
    }
    for key in writer.manifest().entries.keys() {
        if !input.contains(key) {
            debug!("file removed: {}", key);
            drop.push(key.clone());
        }
    }
    let num_changed = parse.len();
    WorkSet { parse, drop, num_changed }
}

/// Index `directory` into the store at `store_dir`.
pub fn index_binary_directory(
    directory: &Path,
    store_dir: &Path,
    options: &IndexingOptions,
    use_compilation_database: bool,
    cancel: &CancelToken,
) -> Result<IndexingStats, StoreError> {
    debug!("indexing options: {:?}", options);

    let mut writer = StoreWriter::open(store_dir)?;

    let bindir = BinaryDirectory::new(directory).use_compilation_database(use_compilation_database);
    let compdb = bindir.compilation_database()?;
    let files = bindir.find_files(compdb.as_ref())?;
    info!("{}: {} object file(s)", directory.display(), files.len());

    let work = compute_work_set(&writer, &files);
    let mut stats = IndexingStats {
        num_files_changed: work.num_changed,
        num_files_deleted: work.drop.len(),
        ..Default::default()
    };

    if work.parse.is_empty() && work.drop.is_empty() {
        info!("index is up to date");
        return Ok(stats);
    }

    let mut manifest = writer.manifest().clone();
    if manifest.binary_dir.is_none() {
        manifest.binary_dir = Some(directory.to_string_lossy().into_owned());
    }
    for key in &work.drop {
        manifest.entries.remove(key);
    }

    let shard = writer.new_shard()?;
    let shard_id = shard
        .dir()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let pool = ThreadPoolBuilder::new()
        .num_threads(options.num_processes.max(1))
        .build()
        .map_err(|e| StoreError::Index(e.to_string()))?;
    let elf_options = options.elf_options();

    let mut shard = shard;
    let chunk_size = options.num_processes.max(1) * 4;
    let mut committed_any = false;

    for chunk in work.parse.chunks(chunk_size) {
        if cancel.is_cancelled() {
            shard.abort()?;
            return Err(StoreError::Cancelled);
        }

        let results: Vec<(PathBuf, Result<ParsedObject>)> = pool.install(|| {
            chunk
                .par_iter()
                .map(|path| {
                    let source_hint = compdb
                        .as_ref()
                        .and_then(|db| db.source_for_binary(path))
                        .map(|s| s.to_string_lossy().into_owned());
                    let parsed = catch_unwind(AssertUnwindSafe(|| {
                        elf::parse(path, &elf_options, source_hint.as_deref())
                    }))
                    .unwrap_or_else(|_| {
                        Err(anyhow!("parser panicked on {}", path.display()))
                    });
                    (path.clone(), parsed)
                })
                .collect()
        });

        for (path, parsed) in results {
            let key = path.to_string_lossy().into_owned();
            match parsed {
                Ok(object) => {
                    for record in &object.records {
                        shard.add_record(record)?;
                    }
                    stats.num_symbols_indexed += object.records.len();
                    stats.num_files_indexed += 1;
                    manifest
                        .entries
                        .insert(key, FileState { mtime: object.mtime, shard: shard_id.clone() });
                    committed_any = true;
                }
                Err(e) => {
                    // per-file failures do not abort the run; the file's
                    // stale records (if any) drop out of the manifest
                    warn!("{}: {:#}", path.display(), e);
                    manifest.entries.remove(&key);
                }
            }
        }

        if shard.buffered_bytes() > options.write_buffer_bytes {
            shard.flush()?;
        }
    }

    if cancel.is_cancelled() {
        shard.abort()?;
        return Err(StoreError::Cancelled);
    }

    if committed_any {
        let docs = shard.finish()?;
        debug!("shard {} finished with {} record(s)", shard_id, docs);
    } else {
        // nothing references the shard; do not leave an empty orphan
        shard.abort()?;
    }
    writer.commit(manifest)?;
    info!(
        "indexed {} file(s), {} symbol(s); removed {} file(s)",
        stats.num_files_indexed, stats.num_symbols_indexed, stats.num_files_deleted
    );
    Ok(stats)
}
