use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

use super::utils::read_var_u32;
use super::{MAGIC, RECORDS_FILE, VERSION};
use crate::schema::{ValueSlot, NUM_VALUE_SLOTS};
use crate::types::{SymbolRecord, SymbolType};

#[derive(Clone, Copy, Debug)]
struct TermEntry {
    postings_off: usize,
    n_docs: u32,
}

/// Read-only view of one committed shard, backed by an mmap of its record
/// file. The term table is loaded eagerly (it is small relative to the
/// record payloads); postings and records are decoded on demand.
pub struct ShardReader {
    id: String,
    mmap: Mmap,
    doc_count: u32,
    doc_index_off: u64,
    values_off: u64,
    // sorted by term bytes; enables exact lookup and prefix scans
    terms: Vec<(Vec<u8>, TermEntry)>,
}

impl ShardReader {
    /// Open the shard directory `dir` (its basename becomes the shard id).
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = dir.join(RECORDS_FILE);
        let file = File::open(&path).with_context(|| format!("open {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < 44 {
            bail!("shard {} too small ({} bytes)", id, mmap.len());
        }
        let magic = u32::from_le_bytes(mmap[0..4].try_into().unwrap());
        let version = u32::from_le_bytes(mmap[4..8].try_into().unwrap());
        if magic != MAGIC {
            bail!("shard {}: bad magic", id);
        }
        if version != VERSION {
            bail!("shard {}: format version {} != {}", id, version, VERSION);
        }
        let doc_count = u32::from_le_bytes(mmap[8..12].try_into().unwrap());
        let _docs_off = u64::from_le_bytes(mmap[12..20].try_into().unwrap());
        let doc_index_off = u64::from_le_bytes(mmap[20..28].try_into().unwrap());
        let values_off = u64::from_le_bytes(mmap[28..36].try_into().unwrap());
        let terms_off = u64::from_le_bytes(mmap[36..44].try_into().unwrap());

        let expected_terms_off =
            doc_index_off + 8 * doc_count as u64 + (NUM_VALUE_SLOTS as u64) * 8 * doc_count as u64;
        if values_off != doc_index_off + 8 * doc_count as u64 || terms_off != expected_terms_off {
            bail!("shard {}: inconsistent section offsets", id);
        }

        let terms = Self::load_terms(&mmap, terms_off as usize, &id)?;
        Ok(Self {
            id,
            mmap,
            doc_count,
            doc_index_off,
            values_off,
            terms,
        })
    }

    fn load_terms(mmap: &Mmap, mut off: usize, id: &str) -> Result<Vec<(Vec<u8>, TermEntry)>> {
        let read_u16 = |off: &mut usize| -> Result<u16> {
            let b: [u8; 2] = mmap
                .get(*off..*off + 2)
                .with_context(|| format!("shard {} truncated in term table", id))?
                .try_into()
                .unwrap();
            *off += 2;
            Ok(u16::from_le_bytes(b))
        };
        let read_u32 = |off: &mut usize| -> Result<u32> {
            let b: [u8; 4] = mmap
                .get(*off..*off + 4)
                .with_context(|| format!("shard {} truncated in term table", id))?
                .try_into()
                .unwrap();
            *off += 4;
            Ok(u32::from_le_bytes(b))
        };

        let term_count = read_u32(&mut off)?;
        let mut terms = Vec::with_capacity(term_count as usize);
        for _ in 0..term_count {
            let len = read_u16(&mut off)? as usize;
            let term = mmap
                .get(off..off + len)
                .with_context(|| format!("shard {} truncated in term table", id))?
                .to_vec();
            off += len;
            let n_docs = read_u32(&mut off)?;
            let postings_off = off;
            // skip the delta varints to find the next entry
            for _ in 0..n_docs {
                read_var_u32(&mmap[..], &mut off)?;
            }
            terms.push((term, TermEntry { postings_off, n_docs }));
        }
        Ok(terms)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Sorted doc ids for one exact term.
    pub fn postings(&self, term: &[u8]) -> Result<Vec<u32>> {
        match self.terms.binary_search_by(|(t, _)| t.as_slice().cmp(term)) {
            Ok(idx) => self.decode_postings(self.terms[idx].1),
            Err(_) => Ok(Vec::new()),
        }
    }

    /// Sorted doc ids for every term starting with `prefix`.
    pub fn prefix_postings(&self, prefix: &[u8]) -> Result<Vec<u32>> {
        let start = self
            .terms
            .partition_point(|(t, _)| t.as_slice() < prefix);
        let mut out: Vec<u32> = Vec::new();
        for (term, entry) in &self.terms[start..] {
            if !term.starts_with(prefix) {
                break;
            }
            let docs = self.decode_postings(*entry)?;
            out = super::utils::union_sorted(&out, &docs);
        }
        Ok(out)
    }

    fn decode_postings(&self, entry: TermEntry) -> Result<Vec<u32>> {
        let mut off = entry.postings_off;
        let mut docs = Vec::with_capacity(entry.n_docs as usize);
        let mut prev: u32 = 0;
        for i in 0..entry.n_docs {
            let delta = read_var_u32(&self.mmap[..], &mut off)?;
            let doc = if i == 0 { delta } else { prev.wrapping_add(delta) };
            docs.push(doc);
            prev = doc;
        }
        Ok(docs)
    }

    /// One numeric value for one document.
    pub fn value(&self, slot: ValueSlot, doc: u32) -> Result<u64> {
        if doc >= self.doc_count {
            bail!("shard {}: doc {} out of range", self.id, doc);
        }
        let off =
            self.values_off as usize + (slot as usize) * 8 * self.doc_count as usize + 8 * doc as usize;
        let b: [u8; 8] = self
            .mmap
            .get(off..off + 8)
            .with_context(|| format!("shard {} truncated in value column", self.id))?
            .try_into()
            .unwrap();
        Ok(u64::from_le_bytes(b))
    }

    /// Sorted doc ids whose `slot` value lies in the inclusive range.
    pub fn range_postings(&self, slot: ValueSlot, lo: Option<u64>, hi: Option<u64>) -> Result<Vec<u32>> {
        let lo = lo.unwrap_or(0);
        let hi = hi.unwrap_or(u64::MAX);
        let mut out = Vec::new();
        for doc in 0..self.doc_count {
            let v = self.value(slot, doc)?;
            if v >= lo && v <= hi {
                out.push(doc);
            }
        }
        Ok(out)
    }

    fn doc_offset(&self, doc: u32) -> Result<usize> {
        if doc >= self.doc_count {
            bail!("shard {}: doc {} out of range", self.id, doc);
        }
        let off = self.doc_index_off as usize + 8 * doc as usize;
        let b: [u8; 8] = self
            .mmap
            .get(off..off + 8)
            .with_context(|| format!("shard {} truncated in doc index", self.id))?
            .try_into()
            .unwrap();
        Ok(u64::from_le_bytes(b) as usize)
    }

    fn read_str(&self, off: &mut usize) -> Result<String> {
        let b: [u8; 2] = self
            .mmap
            .get(*off..*off + 2)
            .with_context(|| format!("shard {} truncated in record", self.id))?
            .try_into()
            .unwrap();
        *off += 2;
        let len = u16::from_le_bytes(b) as usize;
        let s = std::str::from_utf8(
            self.mmap
                .get(*off..*off + len)
                .with_context(|| format!("shard {} truncated in record", self.id))?,
        )
        .with_context(|| format!("shard {}: record string not valid UTF-8", self.id))?
        .to_string();
        *off += len;
        Ok(s)
    }

    fn read_u64(&self, off: &mut usize) -> Result<u64> {
        let b: [u8; 8] = self
            .mmap
            .get(*off..*off + 8)
            .with_context(|| format!("shard {} truncated in record", self.id))?
            .try_into()
            .unwrap();
        *off += 8;
        Ok(u64::from_le_bytes(b))
    }

    /// Only the `path` field of a document; cheaper than full hydration and
    /// enough for the manifest staleness check.
    pub fn doc_path(&self, doc: u32) -> Result<String> {
        let mut off = self.doc_offset(doc)?;
        self.read_str(&mut off)
    }

    /// Decode a full record.
    pub fn doc(&self, doc: u32) -> Result<SymbolRecord> {
        let mut off = self.doc_offset(doc)?;
        let path = self.read_str(&mut off)?;
        let name = self.read_str(&mut off)?;
        let section = self.read_str(&mut off)?;
        let source = self.read_str(&mut off)?;
        let kind_byte = *self
            .mmap
            .get(off)
            .with_context(|| format!("shard {} truncated in record", self.id))?;
        off += 1;
        let address = self.read_u64(&mut off)?;
        let size = self.read_u64(&mut off)?;
        let mtime = self.read_u64(&mut off)?;
        let b: [u8; 4] = self
            .mmap
            .get(off..off + 4)
            .with_context(|| format!("shard {} truncated in record", self.id))?
            .try_into()
            .unwrap();
        off += 4;
        let reloc_count = u32::from_le_bytes(b);
        let mut relocations = Vec::with_capacity(reloc_count as usize);
        for _ in 0..reloc_count {
            relocations.push(self.read_str(&mut off)?);
        }
        Ok(SymbolRecord {
            path,
            name,
            section,
            kind: SymbolType::from_elf(kind_byte),
            address,
            size,
            mtime,
            source: if source.is_empty() { None } else { Some(source) },
            relocations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ShardWriter;
    use crate::types::{SymbolRecord, SymbolType};

    fn record(path: &str, name: &str, address: u64) -> SymbolRecord {
        SymbolRecord {
            path: path.into(),
            name: name.into(),
            section: ".text".into(),
            kind: SymbolType::Func,
            address,
            size: 16,
            mtime: 42,
            source: None,
            relocations: vec!["callee".into()],
        }
    }

    #[test]
    fn write_then_read_roundtrip() {
        let td = tempfile::tempdir().unwrap();
        let dir = td.path().join("shard-test");
        let mut w = ShardWriter::create(&dir).unwrap();
        // insertion order deliberately differs from the stable order
        w.add_record(&record("/b.o", "beta", 0x20)).unwrap();
        w.add_record(&record("/a.o", "alpha", 0x10)).unwrap();
        w.add_record(&record("/a.o", "aardvark", 0x00)).unwrap();
        assert_eq!(w.finish().unwrap(), 3);

        let r = ShardReader::open(&dir).unwrap();
        assert_eq!(r.doc_count(), 3);
        // docs come back ordered by (path, address, name)
        assert_eq!(r.doc(0).unwrap().name, "aardvark");
        assert_eq!(r.doc(1).unwrap().name, "alpha");
        assert_eq!(r.doc(2).unwrap().name, "beta");
        assert_eq!(r.doc_path(2).unwrap(), "/b.o");

        assert_eq!(r.postings(b"XFNalpha").unwrap(), vec![1]);
        assert_eq!(r.postings(b"XRcallee").unwrap(), vec![0, 1, 2]);
        assert_eq!(r.postings(b"XFNnothing").unwrap(), Vec::<u32>::new());
        // prefix scan over the name-token space
        assert_eq!(r.prefix_postings(b"XNa").unwrap(), vec![0, 1]);
        // numeric range over the address column
        assert_eq!(
            r.range_postings(ValueSlot::Address, Some(0x10), Some(0x20)).unwrap(),
            vec![1, 2]
        );
        assert_eq!(
            r.range_postings(ValueSlot::Size, None, Some(15)).unwrap(),
            Vec::<u32>::new()
        );
    }

    #[test]
    fn empty_shard_is_valid() {
        let td = tempfile::tempdir().unwrap();
        let dir = td.path().join("shard-empty");
        let w = ShardWriter::create(&dir).unwrap();
        assert_eq!(w.finish().unwrap(), 0);
        let r = ShardReader::open(&dir).unwrap();
        assert_eq!(r.doc_count(), 0);
        assert_eq!(r.postings(b"XFNx").unwrap(), Vec::<u32>::new());
    }
}
