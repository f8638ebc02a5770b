use crate::error::CliError;
use indicatif::{
    ParallelProgressIterator,
    ProgressStyle,
};
use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};
use std::io::Write;
use std::path::Path;
use tagseek::database::DatabaseIndex;
use tagseek::models::mass::mass_to_daltons;
use tagseek::{
    CandidateMatch,
    Catalog,
    PeakPrmScorer,
    PrmLadderScorer,
    SearchScratch,
    SearchSession,
    SearchStats,
    Spectrum,
    SpectrumQuery,
    TagSeekError,
};
use tracing::{
    debug,
    info,
};

/// One reported match, a line of `results.ndjson`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRow {
    pub spectrum_id: String,
    pub rank: usize,
    /// Flanked and annotated, eg. `K.S[Phospho]AMPLER.G`.
    pub peptide: String,
    pub protein: Option<String>,
    pub db_offset: u64,
    pub score: f32,
    pub parent_mass: f64,
    pub implied_parent_mass: Option<f64>,
    /// `name@position`, positions are zero based.
    pub modifications: Vec<String>,
}

impl MatchRow {
    pub fn new(
        spectrum: &Spectrum,
        rank: usize,
        candidate: &CandidateMatch,
        catalog: &Catalog,
        index: &DatabaseIndex,
    ) -> Self {
        MatchRow {
            spectrum_id: spectrum.id.clone(),
            rank,
            peptide: candidate.annotated(catalog),
            protein: index.name(candidate.record_index).map(|s| s.to_string()),
            db_offset: candidate.db_offset,
            score: candidate.score,
            parent_mass: mass_to_daltons(spectrum.parent_mass),
            implied_parent_mass: candidate.implied_parent_mass(catalog).map(mass_to_daltons),
            modifications: candidate
                .mods
                .iter()
                .map(|m| format!("{}@{}", catalog.modification(m.modification).name, m.position))
                .collect(),
        }
    }
}

/// Searches every block of spectra in parallel, one database pass per block.
///
/// Returns the matches of each spectrum, in input order.
pub fn search_blocks(
    session: &SearchSession,
    spectra: &[Spectrum],
    database_path: &Path,
) -> Result<(Vec<Vec<CandidateMatch>>, SearchStats), CliError> {
    let block_size = session.config().block_size;
    let tolerance = session.config().fragment_tolerance();
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
    )
    .map_err(|e| CliError::Config(e.to_string()))?;

    let blocks = spectra
        .par_chunks(block_size)
        .progress_with_style(style)
        .map_init(
            || SearchScratch::new(session.config()),
            |scratch, block| {
                let prm: Vec<PeakPrmScorer> = block
                    .iter()
                    .map(|s| PeakPrmScorer::new(s, tolerance))
                    .collect();
                let queries: Vec<SpectrumQuery<'_>> = block
                    .iter()
                    .zip(&prm)
                    .map(|(spectrum, prm_scorer)| SpectrumQuery {
                        spectrum,
                        prm_scorer,
                    })
                    .collect();
                let database = std::fs::File::open(database_path)
                    .map_err(|e| TagSeekError::io_at(e, database_path))?;
                session.search_block(&queries, database, scratch, &PrmLadderScorer)
            },
        )
        .collect::<Result<Vec<_>, TagSeekError>>()?;

    let mut stats = SearchStats::default();
    let mut matches = Vec::with_capacity(spectra.len());
    for block in blocks {
        debug!("Block stats: {:?}", block.stats);
        stats.merge(&block.stats);
        matches.extend(block.stores.into_iter().map(|s| s.into_vec()));
    }
    Ok((matches, stats))
}

/// Writes the best `report_top` matches of every spectrum as NDJSON.
pub fn write_results<W: Write>(
    mut writer: W,
    spectra: &[Spectrum],
    matches: &[Vec<CandidateMatch>],
    report_top: usize,
    catalog: &Catalog,
    index: &DatabaseIndex,
) -> Result<usize, CliError> {
    let mut written = 0;
    for (spectrum, candidates) in spectra.iter().zip(matches) {
        for (rank, candidate) in candidates.iter().take(report_top).enumerate() {
            let row = MatchRow::new(spectrum, rank + 1, candidate, catalog, index);
            serde_json::to_writer(&mut writer, &row)?;
            writer.write_all(b"\n")?;
            written += 1;
        }
    }
    writer.flush()?;
    Ok(written)
}

pub fn log_stats(stats: &SearchStats) {
    info!(
        "Searched {} spectra ({} skipped, {} abandoned) over {} database records",
        stats.spectra, stats.spectra_skipped, stats.spectra_failed, stats.records
    );
    info!(
        "Tags: {} generated, {} duplicates, {} trie nodes; {} anchors, {} candidates submitted",
        stats.tags,
        stats.duplicate_tags,
        stats.trie_nodes,
        stats.extension.anchors,
        stats.submitted
    );
    if stats.alignment.windows > 0 {
        info!(
            "Alignment: {} windows, {} backtracks, {} slides",
            stats.alignment.windows, stats.alignment.backtracks, stats.alignment.slides
        );
    }
    info!(
        "Preparation took {:?}, scanning took {:?} (summed over blocks)",
        stats.prepare_time, stats.scan_time
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagseek::SearchConfig;
    use tagseek::config::Protease;
    use tagseek::database::prepare_database;
    use tagseek::models::Peak;
    use tagseek::models::mass::{
        PARENT_MASS_BOOST,
        PROTON_MASS,
    };

    fn ladder(catalog: &Catalog, residues: &[u8]) -> Spectrum {
        let mut acc = 0;
        let mut peaks = Vec::new();
        for (i, &r) in residues.iter().enumerate() {
            acc += catalog.residues().get(r).unwrap();
            if i + 1 < residues.len() {
                peaks.push(Peak {
                    mass: acc + PROTON_MASS,
                    intensity: 10.0,
                    rank: i as u32 + 1,
                });
            }
        }
        Spectrum {
            id: "scan=7".to_string(),
            peaks,
            parent_mass: acc + PARENT_MASS_BOOST,
            charge: 2,
        }
    }

    #[test]
    fn test_search_and_write() {
        let dir = std::env::temp_dir().join(format!("tagseek_cli_processing_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let db_path = dir.join("db.trie");
        let mut db = Vec::new();
        let (index, _) = prepare_database(">prot1\nGGKSAMPLERKK\n".as_bytes(), &mut db).unwrap();
        std::fs::write(&db_path, &db).unwrap();

        let config = SearchConfig {
            mod_budget: 0,
            protease: Protease::None,
            fixed_modifications: Vec::new(),
            ..Default::default()
        };
        let catalog = Catalog::default();
        let spectra = vec![ladder(&catalog, b"SAMPLER")];
        let session = SearchSession::new(config, catalog).unwrap();
        let (matches, stats) = search_blocks(&session, &spectra, &db_path).unwrap();
        assert_eq!(stats.spectra, 1);

        let mut out = Vec::new();
        let written = write_results(&mut out, &spectra, &matches, 1, session.catalog(), &index).unwrap();
        assert_eq!(written, 1);
        let row: MatchRow = serde_json::from_slice(out.split(|&b| b == b'\n').next().unwrap()).unwrap();
        assert_eq!(row.peptide, "K.SAMPLER.K");
        assert_eq!(row.protein.as_deref(), Some("prot1"));
        assert_eq!(row.rank, 1);
        std::fs::remove_dir_all(dir).unwrap();
    }
}
