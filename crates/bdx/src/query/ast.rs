use std::fmt;

/// Parsed query tree. Leaves reference schema fields by their canonical
/// name; field existence is validated during parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// The empty query; matches nothing.
    Nothing,
    /// `*:*`; matches every record.
    MatchAll,
    /// A bare term, matched against the tokenized symbol name.
    Name { value: String, wildcard: bool },
    /// `field:value` for a term-indexed field.
    Field {
        field: &'static str,
        value: String,
        wildcard: bool,
    },
    /// `field:N`, `field:A..B`, `field:A..`, `field:..B` for numeric fields.
    Range {
        field: &'static str,
        lo: Option<u64>,
        hi: Option<u64>,
    },
    And(Box<Query>, Box<Query>),
    Or(Box<Query>, Box<Query>),
    Not(Box<Query>),
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Nothing => write!(f, "NOTHING"),
            Query::MatchAll => write!(f, "ALL"),
            Query::Name { value, wildcard } => {
                write!(f, "N({}{})", value, if *wildcard { "*" } else { "" })
            }
            Query::Field { field, value, wildcard } => {
                write!(f, "F({}:{}{})", field, value, if *wildcard { "*" } else { "" })
            }
            Query::Range { field, lo, hi } => {
                let fmt_end = |v: &Option<u64>| v.map(|n| n.to_string()).unwrap_or_default();
                write!(f, "R({}:{}..{})", field, fmt_end(lo), fmt_end(hi))
            }
            Query::And(a, b) => write!(f, "(AND {} {})", a, b),
            Query::Or(a, b) => write!(f, "(OR {} {})", a, b),
            Query::Not(inner) => write!(f, "(NOT {})", inner),
        }
    }
}
