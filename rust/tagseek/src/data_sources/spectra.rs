use crate::errors::{
    Result,
    TagSeekError,
};
use crate::models::Spectrum;
use crate::models::mass::mass_to_daltons;
use serde::{
    Deserialize,
    Serialize,
};
use std::io::{
    BufRead,
    BufReader,
};
use std::path::Path;

/// One line of a spectrum NDJSON file.
///
/// `parent_mass` is the singly protonated precursor mass in daltons and
/// `peaks` are `[mass, intensity]` pairs in any order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumRecord {
    pub id: String,
    pub parent_mass: f64,
    #[serde(default)]
    pub charge: u8,
    pub peaks: Vec<(f64, f32)>,
}

impl SpectrumRecord {
    pub fn sample() -> Self {
        SpectrumRecord {
            id: "scan=1".to_string(),
            parent_mass: 800.41,
            charge: 2,
            peaks: vec![(88.04, 10.0), (175.12, 50.0), (288.2, 30.0)],
        }
    }

    fn into_spectrum(self) -> std::result::Result<Spectrum, String> {
        if !(self.parent_mass.is_finite() && self.parent_mass > 0.0) {
            return Err(format!("invalid parent mass {}", self.parent_mass));
        }
        if let Some((mass, intensity)) = self
            .peaks
            .iter()
            .find(|(m, i)| !(m.is_finite() && *m >= 0.0 && i.is_finite()))
        {
            return Err(format!("invalid peak ({}, {})", mass, intensity));
        }
        Ok(Spectrum::from_daltons(
            self.id,
            &self.peaks,
            self.parent_mass,
            self.charge,
        ))
    }
}

impl From<&Spectrum> for SpectrumRecord {
    fn from(x: &Spectrum) -> Self {
        SpectrumRecord {
            id: x.id.clone(),
            parent_mass: mass_to_daltons(x.parent_mass),
            charge: x.charge,
            peaks: x
                .peaks
                .iter()
                .map(|p| (mass_to_daltons(p.mass), p.intensity))
                .collect(),
        }
    }
}

/// Streams spectra from newline-delimited JSON, skipping blank lines.
pub struct SpectrumReader<R: BufRead> {
    reader: R,
    line_number: usize,
}

impl<R: BufRead> SpectrumReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_number: 0,
        }
    }
}

impl<R: BufRead> Iterator for SpectrumReader<R> {
    type Item = Result<Spectrum>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        loop {
            line.clear();
            self.line_number += 1;
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) if line.trim().is_empty() => continue,
                Ok(_) => break,
                Err(e) => return Some(Err(e.into())),
            }
        }
        let record: SpectrumRecord = match serde_json::from_str(&line) {
            Ok(x) => x,
            Err(e) => {
                return Some(Err(TagSeekError::ParseError {
                    msg: format!("line {}: {}", self.line_number, e),
                }));
            }
        };
        Some(
            record
                .into_spectrum()
                .map_err(|msg| TagSeekError::ParseError {
                    msg: format!("line {}: {}", self.line_number, msg),
                }),
        )
    }
}

pub fn read_spectra(path: &Path) -> Result<Vec<Spectrum>> {
    let file = std::fs::File::open(path).map_err(|e| TagSeekError::io_at(e, path))?;
    SpectrumReader::new(BufReader::new(file)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mass::mass_from_daltons;

    #[test]
    fn test_reads_ndjson() {
        let text = format!(
            "{}\n\n{}\n",
            serde_json::to_string(&SpectrumRecord::sample()).unwrap(),
            r#"{"id": "b", "parent_mass": 500.0, "peaks": [[200.0, 1.0], [100.0, 5.0]]}"#
        );
        let spectra: Vec<Spectrum> = SpectrumReader::new(text.as_bytes())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(spectra.len(), 2);
        assert_eq!(spectra[0].id, "scan=1");
        assert_eq!(spectra[0].charge, 2);
        assert_eq!(spectra[1].charge, 0);
        assert_eq!(spectra[1].parent_mass, mass_from_daltons(500.0));
        // Sorted by mass, the 100 Da peak is the most intense.
        assert_eq!(spectra[1].peaks[0].rank, 1);
        assert_eq!(spectra[1].peaks[1].rank, 2);
    }

    #[test]
    fn test_reports_bad_line() {
        let text = "{\"id\": \"a\", \"parent_mass\": -1.0, \"peaks\": []}\n";
        let err = SpectrumReader::new(text.as_bytes()).next().unwrap();
        match err {
            Err(TagSeekError::ParseError { msg }) => assert!(msg.starts_with("line 1")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_record_from_spectrum() {
        let spectrum = SpectrumRecord::sample().into_spectrum().unwrap();
        let record = SpectrumRecord::from(&spectrum);
        assert_eq!(record.peaks.len(), 3);
        assert!((record.parent_mass - 800.41).abs() < 1e-6);
    }
}
