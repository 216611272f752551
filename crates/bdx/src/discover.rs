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

//! Discovery of the object files to index: either a recursive walk of a
//! build directory or the outputs listed in a `compile_commands.json`.

use anyhow::{bail, Context, Result};
use log::{info, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::elf::is_readable_elf_file;

#[derive(Debug, Deserialize)]
struct CompileCommand {
    #[serde(default)]
    directory: Option<String>,
    file: String,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<String>>,
}

static OUTPUT_FLAG: Lazy<Regex> = Lazy::new(|| Regex::new(r" -o +([^ ]+)").unwrap());

/// The binary↔source mapping read from a `compile_commands.json` file.
pub struct CompilationDatabase {
    binary_to_source: HashMap<PathBuf, PathBuf>,
}

impl CompilationDatabase {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let commands: Vec<CompileCommand> = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse {}", path.display()))?;

        let default_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let mut binary_to_source = HashMap::new();
        for entry in commands {
            let directory = entry
                .directory
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(|| default_dir.clone());
            let source = PathBuf::from(&entry.file);
            trace!("compdb source file {}", source.display());

            let mut binary = if let Some(output) = &entry.output {
                Some(PathBuf::from(output))
            } else if let Some(command) = &entry.command {
                OUTPUT_FLAG
                    .captures(command)
                    .map(|c| PathBuf::from(c.get(1).unwrap().as_str()))
            } else if let Some(args) = &entry.arguments {
                args.windows(2)
                    .find(|pair| pair[0] == "-o")
                    .map(|pair| PathBuf::from(&pair[1]))
            } else {
                None
            };
            if binary.is_none() {
                let stem = source.file_stem().unwrap_or_default();
                let mut guessed = stem.to_os_string();
                guessed.push(".o");
                binary = Some(directory.join(guessed));
                trace!("compdb assuming binary {:?}", binary);
            }
            let mut binary = binary.unwrap();
            if !binary.is_absolute() {
                binary = directory.join(binary);
            }
            binary_to_source.insert(binary, source);
        }
        Ok(CompilationDatabase { binary_to_source })
    }

    pub fn source_for_binary(&self, binary: &Path) -> Option<&Path> {
        self.binary_to_source.get(binary).map(|p| p.as_path())
    }

    /// All known binary files, sorted.
    pub fn binary_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.binary_to_source.keys().cloned().collect();
        files.sort();
        files
    }
}

/// Find `compile_commands.json` in `path` or any of its parents.
pub fn find_compilation_database(path: &Path) -> Option<PathBuf> {
    let mut dir = Some(path);
    while let Some(d) = dir {
        let candidate = d.join("compile_commands.json");
        if candidate.exists() {
            return Some(candidate);
        }
        dir = d.parent();
    }
    None
}

/// A directory containing zero or more binary object files.
pub struct BinaryDirectory {
    path: PathBuf,
    use_compilation_database: bool,
}

impl BinaryDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        BinaryDirectory {
            path: path.into(),
            use_compilation_database: false,
        }
    }

    pub fn use_compilation_database(mut self, yes: bool) -> Self {
        self.use_compilation_database = yes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The compilation database serving this directory, when one exists
    /// and compilation-database discovery was requested.
    pub fn compilation_database(&self) -> Result<Option<CompilationDatabase>> {
        if !self.use_compilation_database {
            return Ok(None);
        }
        match find_compilation_database(&self.path) {
            Some(path) => {
                info!("found compilation database: {}", path.display());
                Ok(Some(CompilationDatabase::load(&path)?))
            }
            None => bail!(
                "compile_commands.json not found in {} or any parent directory",
                self.path.display()
            ),
        }
    }

    /// The sorted list of readable ELF object files to index.
    pub fn find_files(&self, compdb: Option<&CompilationDatabase>) -> Result<Vec<PathBuf>> {
        let mut files = if let Some(compdb) = compdb {
            compdb
                .binary_files()
                .into_iter()
                .filter(|f| is_readable_elf_file(f))
                .collect()
        } else {
            self.walk_object_files()
        };
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn walk_object_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        // build trees are routinely covered by .gitignore, so gitignore
        // handling stays off here
        let walker = ignore::WalkBuilder::new(&self.path)
            .hidden(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .follow_links(false)
            .build();
        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.into_path();
            if path.extension().and_then(|e| e.to_str()) != Some("o") {
                continue;
            }
            if is_readable_elf_file(&path) {
                files.push(path);
            } else {
                trace!("{}: ignoring, not a readable ELF file", path.display());
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compdb_output_resolution() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("compile_commands.json");
        let json = serde_json::json!([
            {
                "directory": "/build",
                "file": "/src/a.c",
                "output": "obj/a.o"
            },
            {
                "directory": "/build",
                "file": "/src/b.c",
                "command": "cc -c /src/b.c -o obj/b.o"
            },
            {
                "directory": "/build",
                "file": "/src/c.c",
                "arguments": ["cc", "-c", "/src/c.c", "-o", "obj/c.o"]
            },
            {
                "directory": "/build",
                "file": "/src/d.c"
            }
        ]);
        std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();
        let compdb = CompilationDatabase::load(&path).unwrap();
        let files = compdb.binary_files();
        assert_eq!(
            files,
            vec![
                PathBuf::from("/build/d.o"),
                PathBuf::from("/build/obj/a.o"),
                PathBuf::from("/build/obj/b.o"),
                PathBuf::from("/build/obj/c.o"),
            ]
        );
        assert_eq!(
            compdb.source_for_binary(Path::new("/build/obj/b.o")),
            Some(Path::new("/src/b.c"))
        );
    }

    #[test]
    fn walk_skips_non_elf_objects() {
        let td = tempfile::tempdir().unwrap();
        std::fs::write(td.path().join("real.o"), b"\x7fELFjunk").unwrap();
        std::fs::write(td.path().join("fake.o"), b"not elf").unwrap();
        std::fs::write(td.path().join("other.txt"), b"\x7fELF").unwrap();
        let files = BinaryDirectory::new(td.path()).find_files(None).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("real.o"));
    }

    #[test]
    fn find_compdb_in_parent() {
        let td = tempfile::tempdir().unwrap();
        let sub = td.path().join("a/b");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(td.path().join("compile_commands.json"), b"[]").unwrap();
        let found = find_compilation_database(&sub).unwrap();
        assert_eq!(found, td.path().join("compile_commands.json"));
    }
}
