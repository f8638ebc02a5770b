//! Fixed-layout binary modification records.
//!
//! Each record is little endian: `i32` scaled mass delta, `f32` score, then
//! `[u8; 20]` name, `i32` flags and one residue byte. Records scoring below the
//! threshold have their trailing 25 bytes skipped unread. A record with zero flags
//! ends the file.

use super::{
    Catalog,
    MAX_MODIFICATION_NAME,
    ResidueSet,
};
use crate::config::Terminal;
use crate::errors::{
    CatalogError,
    Result,
    TagSeekError,
};
use crate::models::mass::{
    Mass,
    ResidueMassTable,
};
use std::io::{
    ErrorKind,
    Read,
    Write,
};
use std::path::Path;
use tracing::{
    info,
    warn,
};

const FLAG_VALID: i32 = 0x1;
const FLAG_N_TERM: i32 = 0x2;
const FLAG_C_TERM: i32 = 0x4;
const TAIL_LEN: usize = MAX_MODIFICATION_NAME + 4 + 1;

#[derive(Debug, Clone, PartialEq)]
pub struct ModificationRecord {
    pub name: String,
    pub mass: Mass,
    pub score: f32,
    pub residues: ResidueSet,
    pub terminal: Terminal,
}

/// Fills `buf` until it is full or the input ends, returning the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

pub fn read_modification_records<R: Read>(
    mut reader: R,
    min_score: f32,
) -> Result<Vec<ModificationRecord>> {
    let mut out = Vec::new();
    let mut head = [0u8; 8];
    let mut tail = [0u8; TAIL_LEN];
    let mut record = 0;

    loop {
        let got = read_full(&mut reader, &mut head)?;
        if got == 0 {
            break;
        }
        if got < head.len() {
            warn!("Modification file truncated inside record {}", record);
            break;
        }
        let mass = i32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        let score = f32::from_le_bytes([head[4], head[5], head[6], head[7]]);

        if read_full(&mut reader, &mut tail)? < TAIL_LEN {
            warn!("Modification file truncated inside record {}", record);
            break;
        }
        if score < min_score {
            record += 1;
            continue;
        }

        let name_bytes = &tail[..MAX_MODIFICATION_NAME];
        let flags = i32::from_le_bytes([
            tail[MAX_MODIFICATION_NAME],
            tail[MAX_MODIFICATION_NAME + 1],
            tail[MAX_MODIFICATION_NAME + 2],
            tail[MAX_MODIFICATION_NAME + 3],
        ]);
        if flags == 0 {
            break;
        }
        if flags & FLAG_VALID == 0 {
            record += 1;
            continue;
        }
        let name_len = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_MODIFICATION_NAME);
        let name = std::str::from_utf8(&name_bytes[..name_len])
            .map_err(|e| CatalogError::MalformedRecord {
                record,
                context: format!("name is not UTF-8: {}", e),
            })?
            .to_string();
        let residue = tail[TAIL_LEN - 1];
        let residues = if residue == b'*' {
            ResidueSet::ALL
        } else if residue.is_ascii_alphabetic() {
            ResidueSet::single(residue.to_ascii_uppercase())
        } else {
            return Err(CatalogError::MalformedRecord {
                record,
                context: format!("residue byte {:#04x} is not a letter", residue),
            }
            .into());
        };
        let terminal = match (flags & FLAG_N_TERM != 0, flags & FLAG_C_TERM != 0) {
            (true, false) => Terminal::NTerm,
            (false, true) => Terminal::CTerm,
            (false, false) => Terminal::Anywhere,
            (true, true) => {
                return Err(CatalogError::MalformedRecord {
                    record,
                    context: "both terminal flags set".to_string(),
                }
                .into());
            }
        };
        out.push(ModificationRecord {
            name,
            mass,
            score,
            residues,
            terminal,
        });
        record += 1;
    }
    Ok(out)
}

/// Writes records in the binary layout, followed by the end sentinel.
pub fn write_modification_records<W: Write>(
    mut writer: W,
    records: &[ModificationRecord],
) -> Result<()> {
    for record in records {
        if record.name.len() > MAX_MODIFICATION_NAME {
            return Err(CatalogError::NameTooLong {
                name: record.name.clone(),
                max: MAX_MODIFICATION_NAME,
            }
            .into());
        }
        let mut name = [0u8; MAX_MODIFICATION_NAME];
        name[..record.name.len()].copy_from_slice(record.name.as_bytes());
        let flags = FLAG_VALID
            | match record.terminal {
                Terminal::Anywhere => 0,
                Terminal::NTerm => FLAG_N_TERM,
                Terminal::CTerm => FLAG_C_TERM,
            };
        let residue = if record.residues == ResidueSet::ALL {
            b'*'
        } else {
            record.residues.letters().next().unwrap_or(b'*')
        };
        writer.write_all(&record.mass.to_le_bytes())?;
        writer.write_all(&record.score.to_le_bytes())?;
        writer.write_all(&name)?;
        writer.write_all(&flags.to_le_bytes())?;
        writer.write_all(&[residue])?;
    }
    writer.write_all(&0i32.to_le_bytes())?;
    writer.write_all(&f32::MAX.to_le_bytes())?;
    writer.write_all(&[0u8; TAIL_LEN])?;
    Ok(())
}

impl Catalog {
    /// Builds a catalog from a binary modification file.
    pub fn load(residues: ResidueMassTable, path: &Path, min_score: f32) -> Result<Self> {
        let mut catalog = Catalog::new(residues);
        catalog.merge_file(path, min_score)?;
        Ok(catalog)
    }

    /// Adds the records of a binary modification file scoring at least `min_score`.
    ///
    /// A missing or unreadable file adds nothing.
    pub fn merge_file(&mut self, path: &Path, min_score: f32) -> Result<usize> {
        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    "Could not open modification file {}: {}. Continuing without modifications.",
                    path.display(),
                    e
                );
                return Ok(0);
            }
        };
        let records = read_modification_records(std::io::BufReader::new(file), min_score)
            .map_err(|e| match e {
                TagSeekError::Io { source, .. } => TagSeekError::io_at(source, path),
                other => other,
            })?;
        let added = self.add_records(&records)?;
        info!(
            "Loaded {} modifications ({} types) from {}",
            added,
            self.num_types(),
            path.display()
        );
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<ModificationRecord> {
        vec![
            ModificationRecord {
                name: "Phospho".to_string(),
                mass: 7997,
                score: -1.0,
                residues: ResidueSet::single(b'S'),
                terminal: Terminal::Anywhere,
            },
            ModificationRecord {
                name: "Rare".to_string(),
                mass: 1234,
                score: -9.0,
                residues: ResidueSet::single(b'W'),
                terminal: Terminal::Anywhere,
            },
            ModificationRecord {
                name: "Acetyl".to_string(),
                mass: 4201,
                score: -0.5,
                residues: ResidueSet::ALL,
                terminal: Terminal::NTerm,
            },
        ]
    }

    #[test]
    fn test_read_write_and_threshold() {
        let mut buf = Vec::new();
        write_modification_records(&mut buf, &records()).unwrap();
        let all = read_modification_records(buf.as_slice(), f32::NEG_INFINITY).unwrap();
        assert_eq!(all, records());

        let kept = read_modification_records(buf.as_slice(), -2.0).unwrap();
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|r| r.name != "Rare"));
    }

    #[test]
    fn test_sentinel_stops_reading() {
        let mut buf = Vec::new();
        write_modification_records(&mut buf, &records()[..1]).unwrap();
        // Bytes after the sentinel are never interpreted.
        buf.extend_from_slice(&[0xff; 40]);
        let out = read_modification_records(buf.as_slice(), f32::NEG_INFINITY).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_truncated_file_keeps_prefix() {
        let mut buf = Vec::new();
        write_modification_records(&mut buf, &records()).unwrap();
        buf.truncate(33 + 10);
        let out = read_modification_records(buf.as_slice(), f32::NEG_INFINITY).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_missing_file_degrades() {
        let catalog = Catalog::load(
            ResidueMassTable::default(),
            Path::new("/definitely/not/here.bin"),
            0.0,
        )
        .unwrap();
        assert!(catalog.modifications().is_empty());
    }
}
