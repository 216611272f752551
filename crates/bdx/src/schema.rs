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

//! The index schema: which record fields are searchable, under which term
//! prefix, and how their values are turned into terms.

use fnv::FnvHashSet;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::SymbolRecord;

/// Terms longer than this are truncated before indexing.
pub const MAX_TERM_SIZE: usize = 244;

/// Bump when the term layout or the record encoding changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Numeric value columns stored per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSlot {
    Address = 0,
    Size = 1,
    Mtime = 2,
}

pub const NUM_VALUE_SLOTS: usize = 3;

/// Closed set of indexing kinds; each carries its own parse and index rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Case-folded identifier tokens of the symbol name.
    NameTokens,
    /// The un-tokenized whole name, matched verbatim.
    FullName,
    /// Whole value plus every path component, matched verbatim.
    PathTerms,
    /// A single verbatim term.
    WholeTerm,
    /// A `u64` value column supporting range queries.
    Numeric(ValueSlot),
    /// One verbatim term per list element.
    RelocationList,
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub prefix: &'static str,
    pub kind: FieldKind,
}

/// All queryable fields. Prefixes keep the original tool's short forms.
pub const SCHEMA: &[Field] = &[
    Field { name: "name", prefix: "XN", kind: FieldKind::NameTokens },
    Field { name: "fullname", prefix: "XFN", kind: FieldKind::FullName },
    Field { name: "path", prefix: "XP", kind: FieldKind::PathTerms },
    Field { name: "section", prefix: "XSN", kind: FieldKind::WholeTerm },
    Field { name: "type", prefix: "XT", kind: FieldKind::WholeTerm },
    Field { name: "address", prefix: "XA", kind: FieldKind::Numeric(ValueSlot::Address) },
    Field { name: "size", prefix: "XSZ", kind: FieldKind::Numeric(ValueSlot::Size) },
    Field { name: "mtime", prefix: "XM", kind: FieldKind::Numeric(ValueSlot::Mtime) },
    Field { name: "relocations", prefix: "XR", kind: FieldKind::RelocationList },
    Field { name: "source", prefix: "XSRC", kind: FieldKind::PathTerms },
];

pub fn field(name: &str) -> Option<&'static Field> {
    SCHEMA.iter().find(|f| f.name == name)
}

pub fn field_names() -> Vec<&'static str> {
    SCHEMA.iter().map(|f| f.name).collect()
}

static LETTER_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new("[a-zA-Z]{2,}").unwrap());
static CAMEL_WORDS: Lazy<Regex> = Lazy::new(|| Regex::new("[A-Z][a-z]+").unwrap());
static UPPER_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new("[A-Z]{2,}").unwrap());
static DIGIT_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new("[0-9]+").unwrap());
static WORDS_WITH_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new("[a-zA-Z]+[0-9]+").unwrap());

/// Split an identifier-like name into searchable tokens.
///
/// `CppCamelCaseSymbol` yields `Cpp`, `Camel`, `Case`, `Symbol` (and the
/// letter run itself); `snake_case` splits at the underscore; digit runs
/// are tokens of their own and together with their preceding word.
pub fn tokenize_name(value: &str) -> FnvHashSet<String> {
    let mut tokens: FnvHashSet<String> = FnvHashSet::default();

    let letter_runs: Vec<&str> = LETTER_RUNS.find_iter(value).map(|m| m.as_str()).collect();
    for run in &letter_runs {
        tokens.insert((*run).to_string());
        for m in CAMEL_WORDS.find_iter(run) {
            tokens.insert(m.as_str().to_string());
        }
        for m in UPPER_RUNS.find_iter(run) {
            tokens.insert(m.as_str().to_string());
        }
    }
    for m in DIGIT_RUNS.find_iter(value) {
        tokens.insert(m.as_str().to_string());
    }
    for m in WORDS_WITH_DIGITS.find_iter(value) {
        tokens.insert(m.as_str().to_string());
    }

    tokens
}

fn push_term(out: &mut FnvHashSet<Vec<u8>>, prefix: &str, value: &str) {
    let mut term = Vec::with_capacity(prefix.len() + value.len());
    term.extend_from_slice(prefix.as_bytes());
    term.extend_from_slice(value.as_bytes());
    term.truncate(MAX_TERM_SIZE);
    out.insert(term);
}

fn push_path_terms(out: &mut FnvHashSet<Vec<u8>>, prefix: &str, value: &str) {
    push_term(out, prefix, value);
    for component in value.split('/').filter(|c| !c.is_empty()) {
        push_term(out, prefix, component);
    }
}

/// All index terms for one record, deduplicated.
pub fn record_terms(record: &SymbolRecord) -> Vec<Vec<u8>> {
    let mut terms: FnvHashSet<Vec<u8>> = FnvHashSet::default();

    for token in tokenize_name(&record.name) {
        push_term(&mut terms, "XN", &token.to_lowercase());
    }
    push_term(&mut terms, "XFN", &record.name);
    push_path_terms(&mut terms, "XP", &record.path);
    push_term(&mut terms, "XSN", &record.section);
    push_term(&mut terms, "XT", record.kind.as_str());
    for target in &record.relocations {
        push_term(&mut terms, "XR", target);
    }
    if let Some(source) = &record.source {
        push_path_terms(&mut terms, "XSRC", source);
    }

    terms.into_iter().collect()
}

/// The numeric value columns for one record, by [`ValueSlot`] order.
pub fn record_values(record: &SymbolRecord) -> [u64; NUM_VALUE_SLOTS] {
    [record.address, record.size, record.mtime]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SymbolType;

    fn has(tokens: &FnvHashSet<String>, t: &str) -> bool {
        tokens.contains(t)
    }

    #[test]
    fn tokenize_camel_case() {
        let tokens = tokenize_name("CppCamelCaseSymbol");
        assert!(has(&tokens, "Cpp"));
        assert!(has(&tokens, "Camel"));
        assert!(has(&tokens, "Case"));
        assert!(has(&tokens, "Symbol"));
        assert!(has(&tokens, "CppCamelCaseSymbol"));
    }

    #[test]
    fn tokenize_snake_case() {
        let tokens = tokenize_name("uses_c_function");
        assert!(has(&tokens, "uses"));
        assert!(has(&tokens, "function"));
        // single letters are not tokens
        assert!(!has(&tokens, "c"));
    }

    #[test]
    fn tokenize_digits() {
        let tokens = tokenize_name("sha256_update");
        assert!(has(&tokens, "sha"));
        assert!(has(&tokens, "256"));
        assert!(has(&tokens, "sha256"));
        assert!(has(&tokens, "update"));
    }

    #[test]
    fn tokenize_upper_runs() {
        let tokens = tokenize_name("ELFReader");
        assert!(has(&tokens, "ELFR"));
        assert!(has(&tokens, "Reader"));
    }

    #[test]
    fn record_terms_cover_all_fields() {
        let record = SymbolRecord {
            path: "/build/obj/foo.o".into(),
            name: "do_work".into(),
            section: ".text".into(),
            kind: SymbolType::Func,
            address: 0x10,
            size: 32,
            mtime: 1,
            source: Some("/src/foo.c".into()),
            relocations: vec!["helper".into(), String::new()],
        };
        let terms = record_terms(&record);
        let has_term = |t: &str| terms.iter().any(|x| x.as_slice() == t.as_bytes());
        assert!(has_term("XNwork"));
        assert!(has_term("XFNdo_work"));
        assert!(has_term("XP/build/obj/foo.o"));
        assert!(has_term("XPfoo.o"));
        assert!(has_term("XSN.text"));
        assert!(has_term("XTFUNC"));
        assert!(has_term("XRhelper"));
        // a section-only relocation indexes the bare prefix
        assert!(has_term("XR"));
        assert!(has_term("XSRC/src/foo.c"));
        assert!(has_term("XSRCfoo.c"));
    }
}
