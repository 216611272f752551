//! Shared helpers: build small relocatable ELF objects in a temp
//! directory, index them, and run queries, so the end-to-end tests need no
//! compiler toolchain.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use object::write::{Object, Relocation, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationEncoding, RelocationFlags, RelocationKind,
    SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};

use bdx::index::{index_binary_directory, CancelToken, IndexingOptions, IndexingStats};
use bdx::search::Searcher;
use bdx::store::Store;
use bdx::types::SymbolRecord;

/// One defined symbol to synthesize, with outgoing relocation targets.
pub struct SymSpec {
    pub name: &'static str,
    pub func: bool,
    pub size: u64,
    pub relocs: &'static [&'static str],
}

impl SymSpec {
    pub fn func(name: &'static str) -> Self {
        SymSpec { name, func: true, size: 16, relocs: &[] }
    }

    pub fn func_calling(name: &'static str, relocs: &'static [&'static str]) -> Self {
        SymSpec { name, func: true, size: 16, relocs }
    }

    pub fn object(name: &'static str, size: u64) -> Self {
        SymSpec { name, func: false, size, relocs: &[] }
    }
}

/// Write a relocatable ELF object defining `symbols` to `dir/<name>`.
/// Functions land in `.text`, objects in `.rodata`; relocation targets are
/// emitted as undefined externals, the way cross-unit references look in
/// real object files.
pub fn write_object(dir: &Path, name: &str, symbols: &[SymSpec]) -> PathBuf {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    let rodata = obj.add_section(Vec::new(), b".rodata".to_vec(), SectionKind::ReadOnlyData);

    for spec in symbols {
        let section = if spec.func { text } else { rodata };
        let size = spec.size.max(8 * spec.relocs.len() as u64);
        let offset = obj.append_section_data(section, &vec![0u8; size as usize], 8);
        obj.add_symbol(Symbol {
            name: spec.name.as_bytes().to_vec(),
            value: offset,
            size,
            kind: if spec.func { SymbolKind::Text } else { SymbolKind::Data },
            scope: SymbolScope::Dynamic,
            weak: false,
            section: SymbolSection::Section(section),
            flags: SymbolFlags::None,
        });
        for (i, target) in spec.relocs.iter().enumerate() {
            let target_id = obj.add_symbol(Symbol {
                name: target.as_bytes().to_vec(),
                value: 0,
                size: 0,
                kind: SymbolKind::Unknown,
                scope: SymbolScope::Dynamic,
                weak: false,
                section: SymbolSection::Undefined,
                flags: SymbolFlags::None,
            });
            obj.add_relocation(
                section,
                Relocation {
                    offset: offset + 8 * i as u64,
                    symbol: target_id,
                    addend: 0,
                    flags: RelocationFlags::Generic {
                        kind: RelocationKind::Absolute,
                        encoding: RelocationEncoding::Generic,
                        size: 64,
                    },
                },
            )
            .expect("add relocation");
        }
    }

    let bytes = obj.write().expect("serialize object file");
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write object file");
    path
}

/// The fixture the end-to-end scenarios are written against.
pub fn standard_fixture(dir: &Path) {
    write_object(
        dir,
        "a.o",
        &[
            SymSpec::func("cxx_function"),
            SymSpec::func("CppCamelCaseSymbol"),
            SymSpec::object("bar", 8),
        ],
    );
    write_object(
        dir,
        "b.o",
        &[SymSpec::func_calling("uses_c_function", &["c_function"])],
    );
    write_object(dir, "c.o", &[SymSpec::func("c_function")]);
}

pub fn index_options() -> IndexingOptions {
    IndexingOptions {
        num_processes: 2,
        ..IndexingOptions::default()
    }
}

pub fn index(dir: &Path, store: &Path) -> IndexingStats {
    index_binary_directory(dir, store, &index_options(), false, &CancelToken::new())
        .expect("indexing failed")
}

/// Run a query and return the matched records in output order.
pub fn search(store_dir: &Path, query: &str) -> Vec<SymbolRecord> {
    let store = Store::open(store_dir).expect("open store");
    let searcher = Searcher::new(&store);
    let plan = searcher.parse(query).expect("parse query");
    searcher.search(&plan, None).expect("search")
}

/// Matched symbol names, in output order.
pub fn search_names(store_dir: &Path, query: &str) -> Vec<String> {
    search(store_dir, query)
        .into_iter()
        .map(|r| r.name)
        .collect()
}
