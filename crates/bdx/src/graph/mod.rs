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

//! The reference-graph engine.
//!
//! Edges go forward: symbol `u` references symbol `v` when `v`'s name
//! appears in `u.relocations`. Because relocation targets are raw names,
//! a name multiply defined across files yields one edge per definition.
//! Paths are enumerated with a per-path visited set, so distinct routes
//! through shared nodes all surface.

use anyhow::Result;
use log::{debug, trace};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::index::CancelToken;
use crate::query::Plan;
use crate::search::Searcher;
use crate::types::SymbolRecord;

mod dot;
pub use dot::render_dot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphAlgorithm {
    Bfs,
    Dfs,
    Astar,
}

impl GraphAlgorithm {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "BFS" => GraphAlgorithm::Bfs,
            "DFS" => GraphAlgorithm::Dfs,
            "ASTAR" => GraphAlgorithm::Astar,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GraphOptions {
    pub algorithm: GraphAlgorithm,
    /// Stop after emitting this many paths.
    pub max_paths: usize,
    /// Maximum number of edges in a path, if bounded.
    pub max_depth: Option<usize>,
}

impl Default for GraphOptions {
    fn default() -> Self {
        GraphOptions {
            algorithm: GraphAlgorithm::Bfs,
            max_paths: 1,
            max_depth: None,
        }
    }
}

/// The result of a path enumeration, with the matched end sets kept so a
/// renderer can cluster them.
pub struct GraphResult {
    pub paths: Vec<Vec<SymbolRecord>>,
    pub sources: Vec<SymbolRecord>,
    pub sinks: Vec<SymbolRecord>,
}

type NodeKey = (String, u64, String);

#[derive(Default)]
struct EngineState {
    nodes: Vec<SymbolRecord>,
    ids: HashMap<NodeKey, u32>,
    neighbor_cache: HashMap<String, Arc<Vec<u32>>>,
}

impl EngineState {
    fn intern(&mut self, record: SymbolRecord) -> u32 {
        let key = (record.path.clone(), record.address, record.name.clone());
        if let Some(&id) = self.ids.get(&key) {
            return id;
        }
        let id = self.nodes.len() as u32;
        self.ids.insert(key, id);
        self.nodes.push(record);
        id
    }
}

pub struct GraphEngine<'a> {
    searcher: &'a Searcher<'a>,
    state: Mutex<EngineState>,
}

struct PathState {
    node: u32,
    path: Vec<u32>,
}

/// Search frontier; the algorithm choice is exactly the pop discipline.
enum Frontier {
    Bfs(VecDeque<PathState>),
    Dfs(Vec<PathState>),
    Astar {
        heap: BinaryHeap<Reverse<(usize, usize)>>,
        states: Vec<Option<PathState>>,
    },
}

impl Frontier {
    fn new(algorithm: GraphAlgorithm) -> Self {
        match algorithm {
            GraphAlgorithm::Bfs => Frontier::Bfs(VecDeque::new()),
            GraphAlgorithm::Dfs => Frontier::Dfs(Vec::new()),
            GraphAlgorithm::Astar => Frontier::Astar {
                heap: BinaryHeap::new(),
                states: Vec::new(),
            },
        }
    }

    fn push(&mut self, state: PathState, cost: usize) {
        match self {
            Frontier::Bfs(queue) => queue.push_back(state),
            Frontier::Dfs(stack) => stack.push(state),
            Frontier::Astar { heap, states } => {
                // seq breaks ties by insertion order
                let seq = states.len();
                states.push(Some(state));
                heap.push(Reverse((cost, seq)));
            }
        }
    }

    fn pop(&mut self) -> Option<PathState> {
        match self {
            Frontier::Bfs(queue) => queue.pop_front(),
            Frontier::Dfs(stack) => stack.pop(),
            Frontier::Astar { heap, states } => loop {
                let Reverse((_, seq)) = heap.pop()?;
                if let Some(state) = states[seq].take() {
                    return Some(state);
                }
            },
        }
    }
}

impl<'a> GraphEngine<'a> {
    pub fn new(searcher: &'a Searcher<'a>) -> Self {
        GraphEngine {
            searcher,
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Enumerate up to `options.max_paths` paths from records matching
    /// `source_plan` to records matching `sink_plan`.
    pub fn generate_paths(
        &self,
        source_plan: &Plan,
        sink_plan: &Plan,
        options: &GraphOptions,
        cancel: &CancelToken,
    ) -> Result<GraphResult> {
        let sources = self.searcher.search(source_plan, None)?;
        let sinks = self.searcher.search(sink_plan, None)?;
        debug!(
            "graph: {} source(s), {} sink(s), algorithm {:?}",
            sources.len(),
            sinks.len(),
            options.algorithm
        );

        let (source_ids, sink_ids, sink_names) = {
            let mut state = self.state.lock();
            let source_ids: Vec<u32> = sources.iter().cloned().map(|r| state.intern(r)).collect();
            let sink_ids: HashSet<u32> = sinks.iter().cloned().map(|r| state.intern(r)).collect();
            let sink_names: HashSet<String> = sinks.iter().map(|r| r.name.clone()).collect();
            (source_ids, sink_ids, sink_names)
        };

        let mut result = GraphResult { paths: Vec::new(), sources, sinks };
        if source_ids.is_empty() || sink_ids.is_empty() {
            return Ok(result);
        }

        let mut frontier = Frontier::new(options.algorithm);
        for &id in &source_ids {
            let state = PathState { node: id, path: vec![id] };
            let cost = self.astar_cost(&state, &sink_ids, &sink_names);
            frontier.push(state, cost);
        }

        while let Some(current) = frontier.pop() {
            if cancel.is_cancelled() {
                break;
            }
            trace!(
                "visit: {} (depth {})",
                self.node(current.node).name,
                current.path.len() - 1
            );

            // a sink reached over at least one edge completes a path
            if current.path.len() > 1 && sink_ids.contains(&current.node) {
                let path: Vec<SymbolRecord> =
                    current.path.iter().map(|&id| self.node(id)).collect();
                trace!(
                    "found path {} -> ... -> {} of length {}",
                    path[0].name,
                    path[path.len() - 1].name,
                    path.len()
                );
                result.paths.push(path);
                if result.paths.len() >= options.max_paths {
                    break;
                }
                continue;
            }

            if let Some(max_depth) = options.max_depth {
                if current.path.len() - 1 >= max_depth {
                    continue;
                }
            }

            let neighbors = self.neighbors(current.node)?;
            let mut successors: Vec<PathState> = Vec::new();
            for &next in neighbors.iter() {
                // visited set is per path, so other routes may reuse nodes
                if current.path.contains(&next) {
                    continue;
                }
                let mut path = current.path.clone();
                path.push(next);
                successors.push(PathState { node: next, path });
            }
            // DFS pops from the back; reverse so the first neighbor is
            // explored first
            if matches!(frontier, Frontier::Dfs(_)) {
                successors.reverse();
            }
            for state in successors {
                let cost = self.astar_cost(&state, &sink_ids, &sink_names);
                frontier.push(state, cost);
            }
        }

        Ok(result)
    }

    fn node(&self, id: u32) -> SymbolRecord {
        self.state.lock().nodes[id as usize].clone()
    }

    /// `g + h`: edges walked so far plus an admissible estimate (0 at a
    /// sink, 1 when a direct relocation names a sink, 2 otherwise).
    fn astar_cost(&self, state: &PathState, sinks: &HashSet<u32>, sink_names: &HashSet<String>) -> usize {
        let g = state.path.len() - 1;
        let record = self.node(state.node);
        let h = if sinks.contains(&state.node) {
            0
        } else if record.relocations.iter().any(|r| sink_names.contains(r)) {
            1
        } else {
            2
        };
        g + h
    }

    /// All nodes referenced by `id`'s relocations, resolved by full-name
    /// lookup and cached per target name.
    fn neighbors(&self, id: u32) -> Result<Vec<u32>> {
        let relocations = {
            let state = self.state.lock();
            state.nodes[id as usize].relocations.clone()
        };

        let mut out: Vec<u32> = Vec::new();
        let mut seen_names: HashSet<&str> = HashSet::new();
        let mut seen_ids: HashSet<u32> = HashSet::new();
        for name in &relocations {
            // section-only relocations carry no symbol name
            if name.is_empty() || !seen_names.insert(name.as_str()) {
                continue;
            }
            let ids = self.resolve_name(name)?;
            for &node in ids.iter() {
                if seen_ids.insert(node) {
                    out.push(node);
                }
            }
        }
        Ok(out)
    }

    fn resolve_name(&self, name: &str) -> Result<Arc<Vec<u32>>> {
        if let Some(cached) = self.state.lock().neighbor_cache.get(name) {
            return Ok(cached.clone());
        }
        let mut term = b"XFN".to_vec();
        term.extend_from_slice(name.as_bytes());
        term.truncate(crate::schema::MAX_TERM_SIZE);
        let plan = Plan::Term(term);
        let mut records = Vec::new();
        for item in self.searcher.iterate(&plan)? {
            records.push(item?);
        }
        let mut state = self.state.lock();
        let ids = Arc::new(
            records
                .into_iter()
                .map(|r| state.intern(r))
                .collect::<Vec<u32>>(),
        );
        state.neighbor_cache.insert(name.to_string(), ids.clone());
        Ok(ids)
    }
}
