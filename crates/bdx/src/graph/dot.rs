//! DOT rendering of an enumerated path set.
//!
//! Nodes are keyed by symbol name, like the original tool: two definitions
//! of the same static symbol collapse into one drawn node. Source- and
//! sink-matched nodes land in their own cluster subgraphs.

use std::collections::BTreeSet;
use std::fmt::Write;

use super::GraphResult;
use crate::demangle;
use crate::types::SymbolRecord;

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn node_line(record: &SymbolRecord, demangle_names: bool) -> String {
    let label = if demangle_names {
        demangle::demangle(&record.name).unwrap_or_else(|| record.name.clone())
    } else {
        record.name.clone()
    };
    format!(
        "    \"{}\" [label=\"{}\", \"bdx.path\"=\"{}\", \"bdx.section\"=\"{}\", \"bdx.address\"=\"{:#x}\", \"bdx.size\"=\"{}\"];\n",
        escape(&record.name),
        escape(&label),
        escape(&record.path),
        escape(&record.section),
        record.address,
        record.size,
    )
}

/// Render the paths of `result` as a DOT digraph.
pub fn render_dot(
    result: &GraphResult,
    source_query: &str,
    sink_query: &str,
    demangle_names: bool,
) -> String {
    let source_names: BTreeSet<&str> = result.sources.iter().map(|r| r.name.as_str()).collect();
    let sink_names: BTreeSet<&str> = result.sinks.iter().map(|r| r.name.as_str()).collect();

    let mut on_path: Vec<&SymbolRecord> = Vec::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut edges: BTreeSet<(String, String)> = BTreeSet::new();
    for path in &result.paths {
        for record in path {
            if seen.insert(record.name.as_str()) {
                on_path.push(record);
            }
        }
        for pair in path.windows(2) {
            edges.insert((escape(&pair[0].name), escape(&pair[1].name)));
        }
    }

    let mut out = String::new();
    out.push_str("digraph bdx {\n");
    out.push_str("  rankdir=LR;\n  overlap=false;\n  splines=true;\n");

    let _ = write!(
        out,
        "  subgraph cluster_start_query {{\n    label=\"Matching start query \\\"{}\\\"\";\n    style=filled;\n",
        escape(source_query)
    );
    for record in on_path.iter().filter(|r| source_names.contains(r.name.as_str())) {
        out.push_str(&node_line(record, demangle_names));
    }
    out.push_str("  }\n");

    let _ = write!(
        out,
        "  subgraph cluster_goal_query {{\n    label=\"Matching goal query \\\"{}\\\"\";\n    style=filled;\n",
        escape(sink_query)
    );
    for record in on_path.iter().filter(|r| {
        sink_names.contains(r.name.as_str()) && !source_names.contains(r.name.as_str())
    }) {
        out.push_str(&node_line(record, demangle_names));
    }
    out.push_str("  }\n");

    for record in on_path.iter().filter(|r| {
        !source_names.contains(r.name.as_str()) && !sink_names.contains(r.name.as_str())
    }) {
        out.push_str(&node_line(record, demangle_names));
    }

    for (from, to) in &edges {
        let _ = writeln!(out, "  \"{}\" -> \"{}\" [dir=forward];", from, to);
    }
    out.push_str("}\n");
    out
}
