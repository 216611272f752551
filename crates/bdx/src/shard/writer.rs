use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::utils::write_var_u32;
use super::{MAGIC, RECORDS_FILE, VERSION};
use crate::schema::{record_terms, record_values, NUM_VALUE_SLOTS};
use crate::types::SymbolRecord;

/// Fixed header: magic, version, doc_count, then four section offsets.
const HEADER_LEN: u64 = 4 + 4 + 4 + 8 * 4;

struct DocEntry {
    path: String,
    address: u64,
    name: String,
    offset: u64,
    values: [u64; NUM_VALUE_SLOTS],
}

/// Streams encoded records into a fresh shard directory and finalizes the
/// term dictionary and value columns on [`ShardWriter::finish`].
///
/// Record payloads go to disk as they arrive; only sort keys and terms are
/// held in memory, so the caller can bound memory with [`flush`].
///
/// [`flush`]: ShardWriter::flush
pub struct ShardWriter {
    dir: PathBuf,
    file: BufWriter<File>,
    pos: u64,
    entries: Vec<DocEntry>,
    terms: HashMap<Vec<u8>, Vec<u32>>,
    buffered: usize,
}

fn write_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let b = s.as_bytes();
    if b.len() > u16::MAX as usize {
        bail!("string too long for record encoding ({} bytes)", b.len());
    }
    buf.extend_from_slice(&(b.len() as u16).to_le_bytes());
    buf.extend_from_slice(b);
    Ok(())
}

fn encode_record(record: &SymbolRecord) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    write_str(&mut buf, &record.path)?;
    write_str(&mut buf, &record.name)?;
    write_str(&mut buf, &record.section)?;
    write_str(&mut buf, record.source.as_deref().unwrap_or(""))?;
    buf.push(encode_type(record.kind));
    buf.extend_from_slice(&record.address.to_le_bytes());
    buf.extend_from_slice(&record.size.to_le_bytes());
    buf.extend_from_slice(&record.mtime.to_le_bytes());
    buf.extend_from_slice(&(record.relocations.len() as u32).to_le_bytes());
    for target in &record.relocations {
        write_str(&mut buf, target)?;
    }
    Ok(buf)
}

pub(crate) fn encode_type(kind: crate::types::SymbolType) -> u8 {
    use crate::types::SymbolType::*;
    match kind {
        Notype => 0,
        Object => 1,
        Func => 2,
        Section => 3,
        File => 4,
        Common => 5,
        Tls => 6,
        Ifunc => 10,
    }
}

impl ShardWriter {
    /// Create the shard directory and open its record file for writing.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create shard directory {}", dir.display()))?;
        let path = dir.join(RECORDS_FILE);
        let mut file = BufWriter::new(
            File::create(&path).with_context(|| format!("create {}", path.display()))?,
        );
        // Header placeholder; offsets are patched in finish().
        file.write_all(&[0u8; HEADER_LEN as usize])?;
        Ok(Self {
            dir,
            file,
            pos: HEADER_LEN,
            entries: Vec::new(),
            terms: HashMap::new(),
            buffered: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn doc_count(&self) -> usize {
        self.entries.len()
    }

    /// Bytes written to the record file since the last [`flush`].
    ///
    /// [`flush`]: ShardWriter::flush
    pub fn buffered_bytes(&self) -> usize {
        self.buffered
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush().context("flush shard record buffer")?;
        self.buffered = 0;
        Ok(())
    }

    /// Append one record. Doc ids are assigned at finish time, once all
    /// records can be put in `(path, address, name)` order.
    pub fn add_record(&mut self, record: &SymbolRecord) -> Result<()> {
        if self.entries.len() >= u32::MAX as usize {
            bail!("shard document limit exceeded");
        }
        let payload = encode_record(record)?;
        let seq = self.entries.len() as u32;
        self.entries.push(DocEntry {
            path: record.path.clone(),
            address: record.address,
            name: record.name.clone(),
            offset: self.pos,
            values: record_values(record),
        });
        for term in record_terms(record) {
            self.terms.entry(term).or_default().push(seq);
        }
        self.file.write_all(&payload)?;
        self.pos += payload.len() as u64;
        self.buffered += payload.len();
        Ok(())
    }

    /// Write the doc index, value columns and term dictionary, then patch
    /// the header. Returns the number of documents in the shard.
    pub fn finish(self) -> Result<u32> {
        let ShardWriter {
            dir,
            mut file,
            pos,
            entries,
            terms,
            ..
        } = self;

        let doc_count = entries.len() as u32;

        // Assign final doc ids by the stable record order.
        let mut order: Vec<u32> = (0..doc_count).collect();
        order.sort_by(|&a, &b| {
            let ea = &entries[a as usize];
            let eb = &entries[b as usize];
            (&ea.path, ea.address, &ea.name).cmp(&(&eb.path, eb.address, &eb.name))
        });
        let mut new_id = vec![0u32; doc_count as usize];
        for (id, &seq) in order.iter().enumerate() {
            new_id[seq as usize] = id as u32;
        }

        let doc_index_off = pos;
        for &seq in &order {
            file.write_all(&entries[seq as usize].offset.to_le_bytes())?;
        }

        let values_off = doc_index_off + 8 * doc_count as u64;
        for slot in 0..NUM_VALUE_SLOTS {
            for &seq in &order {
                file.write_all(&entries[seq as usize].values[slot].to_le_bytes())?;
            }
        }

        let terms_off = values_off + (NUM_VALUE_SLOTS as u64) * 8 * doc_count as u64;
        let mut sorted_terms: BTreeMap<Vec<u8>, Vec<u32>> = BTreeMap::new();
        for (term, seqs) in terms {
            let mut docs: Vec<u32> = seqs.into_iter().map(|s| new_id[s as usize]).collect();
            docs.sort_unstable();
            docs.dedup();
            sorted_terms.insert(term, docs);
        }
        let mut term_buf: Vec<u8> = Vec::new();
        term_buf.extend_from_slice(&(sorted_terms.len() as u32).to_le_bytes());
        for (term, docs) in &sorted_terms {
            term_buf.extend_from_slice(&(term.len() as u16).to_le_bytes());
            term_buf.extend_from_slice(term);
            term_buf.extend_from_slice(&(docs.len() as u32).to_le_bytes());
            let mut prev: u32 = 0;
            for &doc in docs {
                write_var_u32(&mut term_buf, doc.wrapping_sub(prev))?;
                prev = doc;
            }
        }
        file.write_all(&term_buf)?;

        // Patch the header with the final offsets.
        let mut inner = file
            .into_inner()
            .map_err(|e| anyhow::anyhow!("flush shard file: {}", e))?;
        inner.seek(SeekFrom::Start(0))?;
        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend(&MAGIC.to_le_bytes());
        header.extend(&VERSION.to_le_bytes());
        header.extend(&doc_count.to_le_bytes());
        header.extend(&HEADER_LEN.to_le_bytes()); // docs_off
        header.extend(&doc_index_off.to_le_bytes());
        header.extend(&values_off.to_le_bytes());
        header.extend(&terms_off.to_le_bytes());
        inner.write_all(&header)?;
        inner
            .sync_all()
            .with_context(|| format!("sync shard {}", dir.display()))?;
        Ok(doc_count)
    }

    /// Discard the shard entirely (cancellation path).
    pub fn abort(self) -> Result<()> {
        let dir = self.dir.clone();
        drop(self);
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("remove aborted shard {}", dir.display()))?;
        Ok(())
    }
}
