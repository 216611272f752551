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

//! `bdx` indexes the ELF symbols of a binary build directory into a
//! sharded full-text store and answers structured queries about them,
//! including reference graphs derived from relocations.

pub mod demangle;
pub mod discover;
pub mod elf;
pub mod graph;
pub mod index;
pub mod output;
pub mod query;
pub mod schema;
pub mod search;
pub mod shard;
pub mod store;
pub mod types;

// Re-exports for downstream callers that prefer a flat import.
pub use crate::index::{index_binary_directory, CancelToken, IndexingOptions, IndexingStats};
pub use crate::query::{ParseError, Plan, Query, QueryParser};
pub use crate::search::{SearchIter, Searcher};
pub use crate::shard::{ShardReader, ShardWriter};
pub use crate::store::{default_store_path, Store, StoreError, StoreWriter};
pub use crate::types::{SymbolRecord, SymbolType};
