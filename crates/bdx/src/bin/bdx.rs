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

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use bdx::graph::{render_dot, GraphAlgorithm, GraphEngine, GraphOptions};
use bdx::index::{index_binary_directory, CancelToken, IndexingOptions};
use bdx::output::{render_record, OutputFormat, DEFAULT_TEMPLATE};
use bdx::search::Searcher;
use bdx::store::{default_store_path, Store};
use bdx::ParseError;

// Exit codes: 0 success, 1 query-parse error, 2 usage error (clap),
// 3 I/O or index error, 4 reserved.
const EXIT_PARSE: i32 = 1;
const EXIT_INDEX: i32 = 3;

const INDEX_DIR_ENV: &str = "BDX_INDEX_DIR";

#[derive(Parser, Debug)]
#[command(name = "bdx", about = "Index and query ELF symbols in a binary build directory")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index a binary directory
    Index(IndexArgs),
    /// Search the index for symbols
    Search(SearchArgs),
    /// Enumerate reference paths between two queries and emit DOT
    Graph(GraphArgs),
    /// List all indexed files
    Files(FilesArgs),
}

#[derive(Args, Debug)]
struct IndexArgs {
    /// Path to the binary directory (defaults to the working directory)
    #[arg(short = 'd', long)]
    directory: Option<PathBuf>,
    /// Discover object files from compile_commands.json
    #[arg(short = 'c', long)]
    use_compilation_database: bool,
    /// Path to the index store
    #[arg(long)]
    index_path: Option<PathBuf>,
    /// Indexing option, as key=value (num_processes, index_relocations,
    /// min_symbol_size, use_dwarfdump, write_buffer_bytes)
    #[arg(short = 'o', long = "opt", value_name = "KEY=VALUE")]
    options: Vec<String>,
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Path to the index store
    #[arg(long)]
    index_path: Option<PathBuf>,
    /// Limit the number of results
    #[arg(short = 'n', long = "num", value_name = "LIMIT")]
    num: Option<usize>,
    /// Demangle names in the output
    #[arg(long)]
    demangle_names: bool,
    /// Output format: json, sexp, or a {field} template
    #[arg(short = 'f', long = "format")]
    format: Option<String>,
    /// Query; multiple arguments are AND-joined
    query: Vec<String>,
}

#[derive(Args, Debug)]
struct GraphArgs {
    /// Path to the index store
    #[arg(long)]
    index_path: Option<PathBuf>,
    /// Stop after this many paths
    #[arg(short = 'n', long = "num", value_name = "N", default_value_t = 1)]
    num: usize,
    /// Path search algorithm
    #[arg(long, value_name = "BFS|DFS|ASTAR", default_value = "BFS")]
    algorithm: String,
    /// Bound the number of edges in a path
    #[arg(long)]
    max_depth: Option<usize>,
    /// Demangle node labels
    #[arg(long)]
    demangle_names: bool,
    /// Start from symbols matching this query
    src_query: String,
    /// Try to reach symbols matching this query
    sink_query: String,
}

#[derive(Args, Debug)]
struct FilesArgs {
    /// Path to the index store
    #[arg(long)]
    index_path: Option<PathBuf>,
}

struct CliError {
    code: i32,
    message: String,
}

impl CliError {
    fn index(message: impl std::fmt::Display) -> Self {
        CliError { code: EXIT_INDEX, message: message.to_string() }
    }

    fn parse(error: &ParseError, query: &str) -> Self {
        CliError {
            code: EXIT_PARSE,
            message: format!("invalid query: {}", error.render_caret(query)),
        }
    }
}

fn main() {
    let env = env_logger::Env::default().filter_or("RUST_LOG", "info");
    env_logger::Builder::from_env(env).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Index(args) => cmd_index(args),
        Command::Search(args) => cmd_search(args),
        Command::Graph(args) => cmd_graph(args),
        Command::Files(args) => cmd_files(args),
    };
    if let Err(e) = result {
        eprintln!("error: {}", e.message);
        std::process::exit(e.code);
    }
}

/// The store for a command that writes: `--index-path`, then
/// `BDX_INDEX_DIR`, then the per-directory default location.
fn store_path_for_index(args: &IndexArgs, directory: &Path) -> PathBuf {
    if let Some(path) = &args.index_path {
        return path.clone();
    }
    if let Some(path) = std::env::var_os(INDEX_DIR_ENV) {
        return PathBuf::from(path);
    }
    default_store_path(directory)
}

/// The store for a command that reads: `--index-path`, then
/// `BDX_INDEX_DIR`, then the default location of the working directory or
/// the nearest indexed parent.
fn store_path_for_query(index_path: Option<&PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = index_path {
        return Ok(path.clone());
    }
    if let Some(path) = std::env::var_os(INDEX_DIR_ENV) {
        return Ok(PathBuf::from(path));
    }
    let cwd = std::env::current_dir().map_err(CliError::index)?;
    let mut dir = Some(cwd.as_path());
    while let Some(d) = dir {
        let candidate = default_store_path(d);
        if candidate.join("manifest").exists() {
            return Ok(candidate);
        }
        dir = d.parent();
    }
    Err(CliError::index(format!(
        "no index found for {} (set {} or pass --index-path)",
        cwd.display(),
        INDEX_DIR_ENV
    )))
}

fn open_store(index_path: Option<&PathBuf>) -> Result<Store, CliError> {
    let path = store_path_for_query(index_path)?;
    Store::open(&path).map_err(CliError::index)
}

fn cmd_index(args: IndexArgs) -> Result<(), CliError> {
    let directory = args
        .directory
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let directory = std::fs::canonicalize(&directory)
        .map_err(|e| CliError::index(format!("{}: {}", directory.display(), e)))?;

    let mut options = IndexingOptions::default();
    for opt in &args.options {
        let (key, value) = opt.split_once('=').ok_or_else(|| {
            CliError::index(format!("invalid option \"{}\", expected key=value", opt))
        })?;
        options
            .set(key, value)
            .map_err(|e| CliError::index(format!("invalid option \"{}\": {}", opt, e)))?;
    }

    let store_path = store_path_for_index(&args, &directory);
    let cancel = CancelToken::new();
    let stats = index_binary_directory(
        &directory,
        &store_path,
        &options,
        args.use_compilation_database,
        &cancel,
    )
    .map_err(CliError::index)?;

    println!(
        "Files indexed: {} (out of {} changed files)",
        stats.num_files_indexed, stats.num_files_changed
    );
    println!("Files removed from index: {}", stats.num_files_deleted);
    println!("Symbols indexed: {}", stats.num_symbols_indexed);
    Ok(())
}

fn cmd_search(args: SearchArgs) -> Result<(), CliError> {
    let store = open_store(args.index_path.as_ref())?;
    let searcher = Searcher::new(&store);

    let query = args.query.join(" ");
    let plan = searcher
        .parse(&query)
        .map_err(|e| CliError::parse(&e, &query))?;

    let format = OutputFormat::parse(args.format.as_deref().unwrap_or(DEFAULT_TEMPLATE));
    let records = searcher.search(&plan, args.num).map_err(CliError::index)?;
    for record in &records {
        println!("{}", render_record(record, &format, args.demangle_names));
    }
    Ok(())
}

fn cmd_graph(args: GraphArgs) -> Result<(), CliError> {
    let store = open_store(args.index_path.as_ref())?;
    let searcher = Searcher::new(&store);

    let source_plan = searcher
        .parse(&args.src_query)
        .map_err(|e| CliError::parse(&e, &args.src_query))?;
    let sink_plan = searcher
        .parse(&args.sink_query)
        .map_err(|e| CliError::parse(&e, &args.sink_query))?;
    let algorithm = GraphAlgorithm::parse(&args.algorithm).ok_or_else(|| {
        CliError::index(format!(
            "unknown algorithm \"{}\" (expected BFS, DFS or ASTAR)",
            args.algorithm
        ))
    })?;

    let options = GraphOptions {
        algorithm,
        max_paths: args.num.max(1),
        max_depth: args.max_depth,
    };
    let engine = GraphEngine::new(&searcher);
    let cancel = CancelToken::new();
    let result = engine
        .generate_paths(&source_plan, &sink_plan, &options, &cancel)
        .map_err(CliError::index)?;

    print!(
        "{}",
        render_dot(&result, &args.src_query, &args.sink_query, args.demangle_names)
    );
    Ok(())
}

fn cmd_files(args: FilesArgs) -> Result<(), CliError> {
    let store = open_store(args.index_path.as_ref())?;
    for path in store.all_files() {
        println!("{}", path);
    }
    Ok(())
}
