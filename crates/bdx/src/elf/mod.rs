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

//! Extraction of symbol records from a single ELF object file: defined
//! symbols, the relocation targets patched into each symbol's bytes, and a
//! best-effort source file from debug info.

use anyhow::{Context, Result};
use log::trace;
use object::{Object, ObjectSection, ObjectSymbol, RelocationTarget, SymbolFlags, SymbolSection};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::types::{ParsedObject, SymbolRecord, SymbolType};

/// Per-file parsing options.
#[derive(Debug, Clone)]
pub struct ElfOptions {
    /// Populate `relocations` on each record. Turning this off speeds up
    /// parsing considerably.
    pub index_relocations: bool,
    /// Skip symbols smaller than this many bytes.
    pub min_symbol_size: u64,
    /// Fall back to a `dwarfdump -r` subprocess when the debug info yields
    /// no source file.
    pub use_dwarfdump: bool,
}

impl Default for ElfOptions {
    fn default() -> Self {
        ElfOptions {
            index_relocations: true,
            min_symbol_size: 1,
            use_dwarfdump: false,
        }
    }
}

pub fn file_mtime_ns(path: &Path) -> Result<u64> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?;
    let modified = meta
        .modified()
        .with_context(|| format!("mtime of {}", path.display()))?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0))
}

/// True if `path` names a readable file starting with the ELF magic.
pub fn is_readable_elf_file(path: &Path) -> bool {
    use std::io::Read;
    let mut magic = [0u8; 4];
    match std::fs::File::open(path) {
        Ok(mut f) => f.read_exact(&mut magic).is_ok() && magic == [0x7f, b'E', b'L', b'F'],
        Err(_) => false,
    }
}

/// Parse one object file into symbol records.
///
/// `source_hint` is the source file the compilation database associates
/// with this object, when discovery ran from one; it takes precedence over
/// debug-info lookups.
pub fn parse(path: &Path, options: &ElfOptions, source_hint: Option<&str>) -> Result<ParsedObject> {
    let mtime = file_mtime_ns(path)?;
    let data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let file = object::File::parse(&*data)
        .with_context(|| format!("parse ELF {}", path.display()))?;

    let source = match source_hint {
        Some(hint) => Some(hint.to_string()),
        None => find_source_file(path, &file, options.use_dwarfdump),
    };
    if let Some(src) = &source {
        trace!("{}: source file {}", path.display(), src);
    }

    let path_str = path.to_string_lossy().into_owned();
    let mut records: Vec<SymbolRecord> = Vec::new();
    // section index -> records in that section, for relocation attribution
    let mut by_section: HashMap<usize, Vec<usize>> = HashMap::new();

    for symbol in file.symbols() {
        let size = symbol.size();
        if size < options.min_symbol_size {
            continue;
        }
        let (section_name, section_index) = match symbol.section() {
            SymbolSection::Section(idx) => {
                let name = file
                    .section_by_index(idx)
                    .and_then(|s| s.name().map(|n| n.to_string()))
                    .unwrap_or_default();
                (name, Some(idx.0))
            }
            // COMMON and absolute symbols are defined but live in no section
            SymbolSection::Common | SymbolSection::Absolute => (String::new(), None),
            _ => continue,
        };
        let kind = match symbol.flags() {
            SymbolFlags::Elf { st_info, .. } => SymbolType::from_elf(st_info & 0xf),
            _ => SymbolType::Notype,
        };
        let record = SymbolRecord {
            path: path_str.clone(),
            name: symbol.name().unwrap_or("").to_string(),
            section: section_name,
            kind,
            address: symbol.address(),
            size,
            mtime,
            source: source.clone(),
            relocations: Vec::new(),
        };
        if let Some(idx) = section_index {
            by_section.entry(idx).or_default().push(records.len());
        }
        records.push(record);
    }

    if options.index_relocations {
        attribute_relocations(&file, &mut records, &by_section);
    }

    trace!("{}: {} symbol(s)", path.display(), records.len());
    Ok(ParsedObject { mtime, records })
}

/// Append each relocation's target name to the one defined symbol whose
/// `[address, address+size)` covers the patched offset. Targets keep their
/// file order; section-only relocations contribute empty strings.
fn attribute_relocations(
    file: &object::File,
    records: &mut [SymbolRecord],
    by_section: &HashMap<usize, Vec<usize>>,
) {
    for section in file.sections() {
        let Some(hosted) = by_section.get(&section.index().0) else {
            continue;
        };
        // symbols sorted by address for the bisection below
        let mut sorted: Vec<usize> = hosted.clone();
        sorted.sort_by_key(|&i| records[i].address);

        for (offset, relocation) in section.relocations() {
            let Some(target_idx) = find_covering(records, &sorted, offset) else {
                continue;
            };
            let name = match relocation.target() {
                RelocationTarget::Symbol(sym_idx) => file
                    .symbol_by_index(sym_idx)
                    .and_then(|s| s.name().map(|n| n.to_string()))
                    .unwrap_or_default(),
                _ => String::new(),
            };
            records[target_idx].relocations.push(name);
        }
    }
}

fn find_covering(records: &[SymbolRecord], sorted: &[usize], offset: u64) -> Option<usize> {
    let pos = sorted.partition_point(|&i| records[i].address <= offset);
    // candidates: the last symbol starting at or before the offset, and
    // (for zero-offset edge cases) its successor
    for &i in sorted[pos.saturating_sub(1)..(pos + 1).min(sorted.len())].iter() {
        let r = &records[i];
        if r.address <= offset && offset < r.address + r.size {
            return Some(i);
        }
    }
    None
}

fn find_source_file(path: &Path, file: &object::File, use_dwarfdump: bool) -> Option<String> {
    if let Some(found) = source_from_dwarf(file) {
        return Some(found);
    }
    if use_dwarfdump {
        return source_from_dwarfdump(path);
    }
    None
}

/// Read `DW_AT_name`/`DW_AT_comp_dir` from the root compilation unit.
fn source_from_dwarf(file: &object::File) -> Option<String> {
    let endian = if file.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };
    let load_section = |id: gimli::SectionId| -> Result<Cow<[u8]>, gimli::Error> {
        match file.section_by_name(id.name()) {
            Some(section) => Ok(section
                .uncompressed_data()
                .unwrap_or(Cow::Borrowed(&[][..]))),
            None => Ok(Cow::Borrowed(&[][..])),
        }
    };
    let dwarf_cow = gimli::Dwarf::load(load_section).ok()?;
    let dwarf = dwarf_cow.borrow(|section| gimli::EndianSlice::new(section, endian));

    let mut units = dwarf.units();
    let header = units.next().ok().flatten()?;
    let unit = dwarf.unit(header).ok()?;
    let mut entries = unit.entries();
    let (_, root) = entries.next_dfs().ok().flatten()?;

    let attr_str = |attr: gimli::DwAt| -> Option<String> {
        let value = root.attr_value(attr).ok().flatten()?;
        let s = dwarf.attr_string(&unit, value).ok()?;
        Some(s.to_string_lossy().into_owned())
    };

    let name = attr_str(gimli::DW_AT_name)?;
    if name.starts_with('/') {
        return Some(name);
    }
    let comp_dir = attr_str(gimli::DW_AT_comp_dir)?;
    Some(format!("{}/{}", comp_dir.trim_end_matches('/'), name))
}

/// External collaborator fallback: `dwarfdump -r <file>`.
fn source_from_dwarfdump(path: &Path) -> Option<String> {
    let output = std::process::Command::new("dwarfdump")
        .arg("-r")
        .arg(path)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let mut name = None;
    let mut comp_dir = None;
    for line in text.lines() {
        if let Some(rest) = line.split("DW_AT_name").nth(1) {
            name.get_or_insert_with(|| rest.trim().to_string());
        }
        if let Some(rest) = line.split("DW_AT_comp_dir").nth(1) {
            comp_dir.get_or_insert_with(|| rest.trim().to_string());
        }
    }
    let (name, comp_dir) = (name?, comp_dir?);
    let full = if name.starts_with('/') {
        std::path::PathBuf::from(name)
    } else {
        std::path::PathBuf::from(comp_dir).join(name)
    };
    if full.exists() {
        full.canonicalize()
            .ok()
            .map(|p| p.to_string_lossy().into_owned())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covering_symbol_lookup() {
        let mk = |address: u64, size: u64| SymbolRecord {
            path: "/x.o".into(),
            name: format!("s{}", address),
            section: ".text".into(),
            kind: SymbolType::Func,
            address,
            size,
            mtime: 0,
            source: None,
            relocations: Vec::new(),
        };
        let records = vec![mk(0, 8), mk(16, 8), mk(32, 0)];
        let sorted = vec![0usize, 1, 2];
        assert_eq!(find_covering(&records, &sorted, 0), Some(0));
        assert_eq!(find_covering(&records, &sorted, 7), Some(0));
        assert_eq!(find_covering(&records, &sorted, 8), None);
        assert_eq!(find_covering(&records, &sorted, 17), Some(1));
        // zero-sized symbols never cover anything
        assert_eq!(find_covering(&records, &sorted, 32), None);
    }
}
