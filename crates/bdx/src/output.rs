//! Record output formats for the CLI: JSON lines, S-expressions, and
//! printf-style field templates.

use crate::demangle;
use crate::types::SymbolRecord;

#[derive(Debug, Clone)]
pub enum OutputFormat {
    Json,
    Sexp,
    /// A template where `{field}` interpolates a record field; unknown
    /// fields render as empty.
    Template(String),
}

pub const DEFAULT_TEMPLATE: &str = "{basename}: {name}";

impl OutputFormat {
    pub fn parse(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            "sexp" => OutputFormat::Sexp,
            other => OutputFormat::Template(other.to_string()),
        }
    }
}

fn field_value(record: &SymbolRecord, key: &str, demangled: Option<&str>) -> Option<String> {
    Some(match key {
        "path" => record.path.clone(),
        "basename" => record.basename().to_string(),
        "name" => record.name.clone(),
        "section" => record.section.clone(),
        "type" => record.kind.as_str().to_string(),
        "address" => record.address.to_string(),
        "size" => record.size.to_string(),
        "mtime" => record.mtime.to_string(),
        "source" => record.source.clone().unwrap_or_default(),
        "relocations" => record.relocations.join(","),
        "demangled" => demangled
            .map(|s| s.to_string())
            .unwrap_or_else(|| record.name.clone()),
        _ => return None,
    })
}

fn render_template(template: &str, record: &SymbolRecord, demangled: Option<&str>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        match rest[open..].find('}') {
            Some(close) => {
                let key = &rest[open + 1..open + close];
                if let Some(value) = field_value(record, key, demangled) {
                    out.push_str(&value);
                }
                rest = &rest[open + close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn sexp_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn render_sexp(record: &SymbolRecord, demangled: Option<&str>) -> String {
    let mut out = String::from("(");
    out.push_str(&format!(":path {}", sexp_string(&record.path)));
    out.push_str(&format!(" :name {}", sexp_string(&record.name)));
    out.push_str(&format!(" :section {}", sexp_string(&record.section)));
    out.push_str(&format!(" :type {}", record.kind.as_str()));
    out.push_str(&format!(" :address {}", record.address));
    out.push_str(&format!(" :size {}", record.size));
    out.push_str(&format!(" :mtime {}", record.mtime));
    match &record.source {
        Some(source) => out.push_str(&format!(" :source {}", sexp_string(source))),
        None => out.push_str(" :source nil"),
    }
    out.push_str(" :relocations (");
    for (i, target) in record.relocations.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&sexp_string(target));
    }
    out.push(')');
    if let Some(demangled) = demangled {
        out.push_str(&format!(" :demangled {}", sexp_string(demangled)));
    }
    out.push(')');
    out
}

fn render_json(record: &SymbolRecord, demangled: Option<&str>) -> String {
    let mut value = serde_json::to_value(record).unwrap_or(serde_json::Value::Null);
    if let (Some(demangled), Some(obj)) = (demangled, value.as_object_mut()) {
        obj.insert(
            "demangled".to_string(),
            serde_json::Value::String(demangled.to_string()),
        );
    }
    value.to_string()
}

/// Render one record in the requested format. When `demangle_names` is
/// set, the demangler collaborator is consulted (falling back to the raw
/// name on failure).
pub fn render_record(record: &SymbolRecord, format: &OutputFormat, demangle_names: bool) -> String {
    let demangled = if demangle_names {
        Some(demangle::demangle(&record.name).unwrap_or_else(|| record.name.clone()))
    } else {
        None
    };
    let demangled = demangled.as_deref();
    match format {
        OutputFormat::Json => render_json(record, demangled),
        OutputFormat::Sexp => render_sexp(record, demangled),
        OutputFormat::Template(template) => render_template(template, record, demangled),
    }
}
