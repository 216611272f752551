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

//! Query execution across the whole store.
//!
//! A query is planned once, executed against every shard, and the per-shard
//! streams are merged by `(path, address, name)` so results come back in
//! the same order no matter how records are spread over shards. Records
//! whose path is owned by a different shard in the manifest are skipped;
//! that one rule implements both atomic replacement and deletion.

use anyhow::Result;
use log::debug;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::query::{execute, lower, ParseError, Plan, Query, QueryParser};
use crate::store::Store;
use crate::types::SymbolRecord;

pub struct Searcher<'a> {
    store: &'a Store,
    parser: QueryParser,
}

impl<'a> Searcher<'a> {
    pub fn new(store: &'a Store) -> Self {
        Searcher {
            store,
            parser: QueryParser::new().auto_wildcard(true),
        }
    }

    /// Parse a query string. The empty query matches everything, which is
    /// what the CLI exposes for `bdx search` with no arguments.
    pub fn parse(&self, query: &str) -> Result<Plan, ParseError> {
        let parsed = self.parser.parse(query)?;
        let parsed = match parsed {
            Query::Nothing => Query::MatchAll,
            other => other,
        };
        debug!("query {:?} -> {}", query, parsed);
        Ok(lower(&parsed))
    }

    /// Up to `limit` matching records in stable order.
    pub fn search(&self, plan: &Plan, limit: Option<usize>) -> Result<Vec<SymbolRecord>> {
        let mut out = Vec::new();
        for item in self.iterate(plan)? {
            out.push(item?);
            if limit.map(|n| out.len() >= n).unwrap_or(false) {
                break;
            }
        }
        Ok(out)
    }

    /// Total match count, without record hydration.
    pub fn count(&self, plan: &Plan) -> Result<usize> {
        let mut total = 0;
        for shard in self.store.shards() {
            for doc in execute(plan, shard)? {
                let path = shard.doc_path(doc)?;
                if self.store.owns(&path, shard.id()) {
                    total += 1;
                }
            }
        }
        Ok(total)
    }

    /// Lazily stream matching records in stable order. Restart by calling
    /// again with the same plan.
    pub fn iterate(&self, plan: &Plan) -> Result<SearchIter<'a>> {
        let mut streams = Vec::new();
        for (shard_idx, shard) in self.store.shards().iter().enumerate() {
            let docs = execute(plan, shard)?;
            streams.push(ShardStream { shard_idx, docs, next: 0, pending: None });
        }
        let mut iter = SearchIter {
            store: self.store,
            streams,
            heap: BinaryHeap::new(),
        };
        iter.prime()?;
        Ok(iter)
    }
}

struct ShardStream {
    shard_idx: usize,
    docs: Vec<u32>,
    next: usize,
    pending: Option<SymbolRecord>,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct HeapKey {
    path: String,
    address: u64,
    name: String,
    stream: usize,
}

/// Merged, lazily hydrated record stream over all shards.
pub struct SearchIter<'a> {
    store: &'a Store,
    streams: Vec<ShardStream>,
    heap: BinaryHeap<Reverse<HeapKey>>,
}

impl<'a> SearchIter<'a> {
    fn prime(&mut self) -> Result<()> {
        for idx in 0..self.streams.len() {
            self.advance(idx)?;
        }
        Ok(())
    }

    /// Pull the next visible record of stream `idx` into its pending slot
    /// and the heap, skipping records superseded by another shard.
    fn advance(&mut self, idx: usize) -> Result<()> {
        let stream = &mut self.streams[idx];
        let shard = &self.store.shards()[stream.shard_idx];
        while stream.next < stream.docs.len() {
            let doc = stream.docs[stream.next];
            stream.next += 1;
            let path = shard.doc_path(doc)?;
            if !self.store.owns(&path, shard.id()) {
                continue;
            }
            let record = shard.doc(doc)?;
            self.heap.push(Reverse(HeapKey {
                path: record.path.clone(),
                address: record.address,
                name: record.name.clone(),
                stream: idx,
            }));
            stream.pending = Some(record);
            return Ok(());
        }
        Ok(())
    }
}

impl<'a> Iterator for SearchIter<'a> {
    type Item = Result<SymbolRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse(key) = self.heap.pop()?;
        let record = self.streams[key.stream].pending.take()?;
        if let Err(e) = self.advance(key.stream) {
            return Some(Err(e));
        }
        Some(Ok(record))
    }
}
