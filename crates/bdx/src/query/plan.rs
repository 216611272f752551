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

//! Lowering of the parsed query tree into index operations.

use super::ast::Query;
use crate::schema::{self, FieldKind, ValueSlot};

/// A query lowered to shard operations. Leaves are posting-list or range
/// lookups; interior nodes combine sorted doc-id lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Nothing,
    All,
    /// Exact posting-list lookup for one term.
    Term(Vec<u8>),
    /// Union of posting lists over all terms with this prefix.
    Prefix(Vec<u8>),
    /// Inclusive range over a numeric value column.
    Range {
        slot: ValueSlot,
        lo: Option<u64>,
        hi: Option<u64>,
    },
    And(Vec<Plan>),
    Or(Vec<Plan>),
    Not(Box<Plan>),
}

fn term(prefix: &str, value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + value.len());
    out.extend_from_slice(prefix.as_bytes());
    out.extend_from_slice(value.as_bytes());
    out.truncate(schema::MAX_TERM_SIZE);
    out
}

fn leaf(prefix: &str, value: &str, wildcard: bool) -> Plan {
    if wildcard {
        Plan::Prefix(term(prefix, value))
    } else {
        Plan::Term(term(prefix, value))
    }
}

/// The original tool resolved relative `path:` values against the working
/// directory as an alternative; keep that affordance.
fn path_leaf(prefix: &str, value: &str, wildcard: bool) -> Plan {
    let direct = leaf(prefix, value, wildcard);
    if value.starts_with('/') || value.is_empty() {
        return direct;
    }
    let Ok(cwd) = std::env::current_dir() else {
        return direct;
    };
    let joined = cwd.join(value);
    let absolute = std::fs::canonicalize(&joined).unwrap_or(joined);
    let alternative = leaf(prefix, &absolute.to_string_lossy(), wildcard);
    Plan::Or(vec![direct, alternative])
}

fn lower_field(field: &schema::Field, value: &str, wildcard: bool) -> Plan {
    match field.kind {
        FieldKind::NameTokens => leaf(field.prefix, &value.to_lowercase(), wildcard),
        FieldKind::FullName => leaf(field.prefix, value, wildcard),
        FieldKind::PathTerms if field.name == "path" => path_leaf(field.prefix, value, wildcard),
        FieldKind::PathTerms => leaf(field.prefix, value, wildcard),
        FieldKind::WholeTerm if field.name == "type" => {
            leaf(field.prefix, &value.to_uppercase(), wildcard)
        }
        FieldKind::WholeTerm => leaf(field.prefix, value, wildcard),
        FieldKind::RelocationList => leaf(field.prefix, value, wildcard),
        // numeric fields arrive as Query::Range, never here
        FieldKind::Numeric(slot) => Plan::Range { slot, lo: None, hi: None },
    }
}

/// Lower a query tree into a [`Plan`], flattening nested AND/OR chains so
/// execution can fold them in one pass.
pub fn lower(query: &Query) -> Plan {
    match query {
        Query::Nothing => Plan::Nothing,
        Query::MatchAll => Plan::All,
        Query::Name { value, wildcard } => leaf("XN", &value.to_lowercase(), *wildcard),
        Query::Field { field, value, wildcard } => match schema::field(field) {
            Some(f) => lower_field(f, value, *wildcard),
            None => Plan::Nothing,
        },
        Query::Range { field, lo, hi } => match schema::field(field) {
            Some(schema::Field { kind: FieldKind::Numeric(slot), .. }) => {
                Plan::Range { slot: *slot, lo: *lo, hi: *hi }
            }
            _ => Plan::Nothing,
        },
        Query::And(a, b) => {
            let mut parts = Vec::new();
            flatten_and(a, &mut parts);
            flatten_and(b, &mut parts);
            Plan::And(parts)
        }
        Query::Or(a, b) => {
            let mut parts = Vec::new();
            flatten_or(a, &mut parts);
            flatten_or(b, &mut parts);
            Plan::Or(parts)
        }
        Query::Not(inner) => Plan::Not(Box::new(lower(inner))),
    }
}

fn flatten_and(query: &Query, out: &mut Vec<Plan>) {
    match query {
        Query::And(a, b) => {
            flatten_and(a, out);
            flatten_and(b, out);
        }
        other => out.push(lower(other)),
    }
}

fn flatten_or(query: &Query, out: &mut Vec<Plan>) {
    match query {
        Query::Or(a, b) => {
            flatten_or(a, out);
            flatten_or(b, out);
        }
        other => out.push(lower(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryParser;

    fn plan_of(input: &str) -> Plan {
        lower(&QueryParser::new().parse(input).unwrap())
    }

    #[test]
    fn name_terms_are_case_folded() {
        assert_eq!(plan_of("Camel"), Plan::Term(b"XNcamel".to_vec()));
        assert_eq!(plan_of("camel"), Plan::Term(b"XNcamel".to_vec()));
        assert_eq!(plan_of("Cam*"), Plan::Prefix(b"XNcam".to_vec()));
    }

    #[test]
    fn fullname_is_verbatim() {
        assert_eq!(plan_of("fullname:Bar"), Plan::Term(b"XFNBar".to_vec()));
    }

    #[test]
    fn type_is_upper_cased() {
        assert_eq!(plan_of("type:func"), Plan::Term(b"XTFUNC".to_vec()));
    }

    #[test]
    fn and_chains_flatten() {
        let plan = plan_of("a b c");
        match plan {
            Plan::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn ranges_lower_to_slots() {
        assert_eq!(
            plan_of("size:100..200"),
            Plan::Range { slot: ValueSlot::Size, lo: Some(100), hi: Some(200) }
        );
        assert_eq!(
            plan_of("mtime:..5"),
            Plan::Range { slot: ValueSlot::Mtime, lo: None, hi: Some(5) }
        );
    }

    #[test]
    fn relative_path_gets_cwd_alternative() {
        match plan_of("path:foo.o") {
            Plan::Or(parts) => {
                assert_eq!(parts[0], Plan::Term(b"XPfoo.o".to_vec()));
                assert_eq!(parts.len(), 2);
            }
            other => panic!("expected Or, got {:?}", other),
        }
        assert_eq!(plan_of("path:/abs/foo.o"), Plan::Term(b"XP/abs/foo.o".to_vec()));
    }
}
