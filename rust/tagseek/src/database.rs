//! Flat residue database: streaming buffer, record index and FASTA conversion.
//!
//! The database is a byte stream of uppercase residues in which every record is
//! terminated by [`RECORD_SEPARATOR`].

use crate::errors::{
    Result,
    ScanError,
    TagSeekError,
};
use std::io::{
    BufRead,
    ErrorKind,
    Read,
    Write,
};
use std::path::{
    Path,
    PathBuf,
};
use tracing::{
    debug,
    info,
};

pub const RECORD_SEPARATOR: u8 = b'*';
pub const INDEX_NAME_LEN: usize = 80;
const INDEX_RECORD_LEN: usize = 8 + 8 + INDEX_NAME_LEN;

/// Reads the database in fixed windows, retaining `pad` bytes behind the cursor
/// and keeping at least `pad` bytes loaded ahead of it until the input ends.
#[derive(Debug)]
pub struct DatabaseBuffer<R: Read> {
    reader: R,
    buf: Vec<u8>,
    pad: usize,
    /// Database offset of `buf[0]`.
    base: u64,
    cursor: usize,
    len: usize,
    eof: bool,
    records: usize,
}

impl<R: Read> DatabaseBuffer<R> {
    pub fn new(reader: R, window: usize, pad: usize) -> Self {
        debug_assert!(pad * 2 < window);
        Self {
            reader,
            buf: vec![0; window],
            pad,
            base: 0,
            cursor: 0,
            len: 0,
            eof: false,
            records: 0,
        }
    }

    fn refill(&mut self) -> std::result::Result<(), ScanError> {
        if self.eof {
            return Ok(());
        }
        let keep_from = self.cursor.saturating_sub(self.pad);
        if keep_from > 0 {
            self.buf.copy_within(keep_from..self.len, 0);
            self.len -= keep_from;
            self.cursor -= keep_from;
            self.base += keep_from as u64;
        }
        while self.len < self.buf.len() {
            match self.reader.read(&mut self.buf[self.len..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => self.len += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Consumes the next byte, `None` at the end of the database.
    pub fn next_byte(&mut self) -> std::result::Result<Option<u8>, ScanError> {
        if self.len - self.cursor <= self.pad {
            self.refill()?;
        }
        if self.cursor >= self.len {
            return Ok(None);
        }
        let byte = self.buf[self.cursor];
        self.cursor += 1;
        if byte == RECORD_SEPARATOR {
            self.records += 1;
        }
        Ok(Some(byte))
    }

    /// Database offset of the next byte to consume.
    pub fn position(&self) -> u64 {
        self.base + self.cursor as u64
    }

    /// Separators consumed so far, i.e. the record of the last non-separator byte.
    pub fn record_index(&self) -> usize {
        self.records
    }

    pub fn view(&self) -> DatabaseView<'_> {
        DatabaseView {
            bytes: &self.buf[..self.len],
            base: self.base,
            eof: self.eof,
        }
    }
}

/// Read-only window over the bytes currently held by a [`DatabaseBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct DatabaseView<'a> {
    bytes: &'a [u8],
    base: u64,
    eof: bool,
}

impl<'a> DatabaseView<'a> {
    pub fn from_slice(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            base: 0,
            eof: true,
        }
    }

    /// Byte at a database offset, `None` past the end of the database.
    ///
    /// Offsets that were already discarded, or not yet loaded, are an error.
    #[inline]
    pub fn get(&self, offset: u64) -> std::result::Result<Option<u8>, ScanError> {
        let end = self.base + self.bytes.len() as u64;
        if offset >= self.base && offset < end {
            return Ok(Some(self.bytes[(offset - self.base) as usize]));
        }
        if offset >= end && self.eof {
            return Ok(None);
        }
        Err(ScanError::BufferOutOfBounds {
            index: offset as usize,
            len: self.bytes.len(),
            context: "offset outside the retained database window",
        })
    }

    /// Byte before `offset`, `None` at the start of the database.
    #[inline]
    pub fn before(&self, offset: u64) -> std::result::Result<Option<u8>, ScanError> {
        match offset.checked_sub(1) {
            Some(prev) => self.get(prev),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    /// Byte offset of the header line in the source FASTA.
    pub source_offset: u64,
    /// Offset of the first residue in the flat database.
    pub db_offset: u64,
    pub name: String,
}

/// Maps database records to their display names.
#[derive(Debug, Clone, Default)]
pub struct DatabaseIndex {
    records: Vec<IndexRecord>,
}

impl DatabaseIndex {
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| TagSeekError::io_at(e, path))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % INDEX_RECORD_LEN != 0 {
            return Err(TagSeekError::ParseError {
                msg: format!(
                    "index size {} is not a multiple of {}",
                    bytes.len(),
                    INDEX_RECORD_LEN
                ),
            });
        }
        let records = bytes
            .chunks_exact(INDEX_RECORD_LEN)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(&chunk[..8]);
                let source_offset = u64::from_le_bytes(word);
                word.copy_from_slice(&chunk[8..16]);
                let db_offset = u64::from_le_bytes(word);
                let name_bytes = &chunk[16..];
                let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(INDEX_NAME_LEN);
                IndexRecord {
                    source_offset,
                    db_offset,
                    name: String::from_utf8_lossy(&name_bytes[..end]).into_owned(),
                }
            })
            .collect();
        Ok(Self { records })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for record in &self.records {
            let mut name = [0u8; INDEX_NAME_LEN];
            let bytes = truncate_name(&record.name);
            name[..bytes.len()].copy_from_slice(bytes);
            writer.write_all(&record.source_offset.to_le_bytes())?;
            writer.write_all(&record.db_offset.to_le_bytes())?;
            writer.write_all(&name)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[IndexRecord] {
        &self.records
    }

    pub fn name(&self, record_index: usize) -> Option<&str> {
        self.records.get(record_index).map(|r| r.name.as_str())
    }

    /// Name of the record containing a database offset.
    pub fn name_for_offset(&self, db_offset: u64) -> Option<&str> {
        let idx = self.records.partition_point(|r| r.db_offset <= db_offset);
        idx.checked_sub(1).map(|i| self.records[i].name.as_str())
    }
}

/// Longest prefix of `name` that fits the index field on a char boundary.
fn truncate_name(name: &str) -> &[u8] {
    let mut end = name.len().min(INDEX_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name.as_bytes()[..end]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareStats {
    pub records: usize,
    pub residues: u64,
    pub dropped_bytes: u64,
}

/// Converts FASTA into the flat database, returning the record index.
pub fn prepare_database<R: BufRead, W: Write>(
    mut fasta: R,
    mut database: W,
) -> Result<(DatabaseIndex, PrepareStats)> {
    let mut index = DatabaseIndex::default();
    let mut stats = PrepareStats::default();
    let mut line = Vec::new();
    let mut source_offset = 0u64;
    let mut db_offset = 0u64;
    let mut open_record = false;

    loop {
        line.clear();
        let read = fasta.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        if line.first() == Some(&b'>') {
            if open_record {
                database.write_all(&[RECORD_SEPARATOR])?;
                db_offset += 1;
            }
            let header = String::from_utf8_lossy(&line[1..]);
            let name = header.trim_end().to_string();
            index.records.push(IndexRecord {
                source_offset,
                db_offset,
                name,
            });
            stats.records += 1;
            open_record = true;
        } else if open_record {
            let residues: Vec<u8> = line
                .iter()
                .filter(|b| b.is_ascii_alphabetic())
                .map(|b| b.to_ascii_uppercase())
                .collect();
            stats.dropped_bytes += line
                .iter()
                .filter(|b| !b.is_ascii_alphabetic() && !b.is_ascii_whitespace())
                .count() as u64;
            database.write_all(&residues)?;
            db_offset += residues.len() as u64;
            stats.residues += residues.len() as u64;
        }
        source_offset += read as u64;
    }
    if open_record {
        database.write_all(&[RECORD_SEPARATOR])?;
    }
    database.flush()?;
    debug!(
        "Prepared {} records with {} residues ({} bytes dropped)",
        stats.records, stats.residues, stats.dropped_bytes
    );
    Ok((index, stats))
}

/// Output paths of [`prepare_database_files`].
pub fn database_paths(stem: &Path) -> (PathBuf, PathBuf) {
    (stem.with_extension("trie"), stem.with_extension("index"))
}

/// Writes `<stem>.trie` and `<stem>.index` from a FASTA file.
pub fn prepare_database_files(fasta_path: &Path, stem: &Path) -> Result<PrepareStats> {
    let (db_path, index_path) = database_paths(stem);
    let fasta = std::fs::File::open(fasta_path).map_err(|e| TagSeekError::io_at(e, fasta_path))?;
    let db_file = std::fs::File::create(&db_path).map_err(|e| TagSeekError::io_at(e, &db_path))?;
    let (index, stats) = prepare_database(
        std::io::BufReader::new(fasta),
        std::io::BufWriter::new(db_file),
    )?;
    let index_file =
        std::fs::File::create(&index_path).map_err(|e| TagSeekError::io_at(e, &index_path))?;
    let mut writer = std::io::BufWriter::new(index_file);
    index
        .write(&mut writer)
        .and_then(|_| writer.flush())
        .map_err(|e| TagSeekError::io_at(e, &index_path))?;
    info!(
        "Wrote {} records to {} and {}",
        stats.records,
        db_path.display(),
        index_path.display()
    );
    Ok(stats)
}
