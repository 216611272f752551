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

use serde::{Deserialize, Serialize};
use std::fmt;

/// Recognized ELF symbol types (the `STT_*` values we index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SymbolType {
    Notype,
    Object,
    Func,
    Section,
    File,
    Common,
    Tls,
    Ifunc,
}

impl SymbolType {
    /// Map an ELF `st_info & 0xf` value. Unrecognized values fall back to
    /// `Notype`, like unknown `STT_*` constants would.
    pub fn from_elf(st_type: u8) -> Self {
        match st_type {
            0 => SymbolType::Notype,
            1 => SymbolType::Object,
            2 => SymbolType::Func,
            3 => SymbolType::Section,
            4 => SymbolType::File,
            5 => SymbolType::Common,
            6 => SymbolType::Tls,
            10 => SymbolType::Ifunc,
            _ => SymbolType::Notype,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolType::Notype => "NOTYPE",
            SymbolType::Object => "OBJECT",
            SymbolType::Func => "FUNC",
            SymbolType::Section => "SECTION",
            SymbolType::File => "FILE",
            SymbolType::Common => "COMMON",
            SymbolType::Tls => "TLS",
            SymbolType::Ifunc => "IFUNC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "NOTYPE" => SymbolType::Notype,
            "OBJECT" => SymbolType::Object,
            "FUNC" => SymbolType::Func,
            "SECTION" => SymbolType::Section,
            "FILE" => SymbolType::File,
            "COMMON" => SymbolType::Common,
            "TLS" => SymbolType::Tls,
            "IFUNC" => SymbolType::Ifunc,
            _ => return None,
        })
    }
}

impl fmt::Display for SymbolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One defined symbol in one object file; the unit of indexing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolRecord {
    /// Absolute path of the owning object file.
    pub path: String,
    /// Raw (possibly mangled) symbol name.
    pub name: String,
    /// ELF section name, e.g. `.text`. Empty for COMMON/ABS symbols.
    pub section: String,
    #[serde(rename = "type")]
    pub kind: SymbolType,
    /// Section-relative address.
    pub address: u64,
    pub size: u64,
    /// Object file modification time, nanoseconds since the epoch.
    pub mtime: u64,
    /// Source file derived from debug info; best-effort.
    pub source: Option<String>,
    /// Relocation target names whose patched offsets fall inside
    /// `[address, address+size)`, in file order. Section-only relocations
    /// contribute empty strings; duplicates are preserved.
    pub relocations: Vec<String>,
}

impl SymbolRecord {
    /// The stable ordering key used for all query output.
    pub fn sort_key(&self) -> (&str, u64, &str) {
        (&self.path, self.address, &self.name)
    }

    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Result of parsing one object file.
#[derive(Debug, Clone)]
pub struct ParsedObject {
    pub mtime: u64,
    pub records: Vec<SymbolRecord>,
}
