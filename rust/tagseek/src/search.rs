//! Runs a block of spectra against one pass over the database.

use crate::alignment::{
    AlignerContext,
    AlignmentStats,
    AlignmentTable,
    WindowAligner,
};
use crate::catalog::{
    Catalog,
    DecorationSet,
};
use crate::config::{
    SearchConfig,
    SearchMode,
};
use crate::database::{
    DatabaseBuffer,
    RECORD_SEPARATOR,
};
use crate::errors::{
    ConfigError,
    Result,
};
use crate::extension::{
    Anchor,
    ExtensionContext,
    ExtensionStats,
    extend_anchor,
};
use crate::models::{
    CandidateMatch,
    SpectrumQuery,
};
use crate::scoring::{
    CandidateScorer,
    SkewPenalty,
};
use crate::store::MatchStore;
use crate::tags::{
    JumpTable,
    MAX_TAG_MODS,
    TagGenerator,
    TagGraph,
};
use crate::trie::{
    InsertOutcome,
    ROOT,
    ScanStats,
    TagTrie,
};
use std::io::Read;
use std::time::{
    Duration,
    Instant,
};
use tracing::{
    debug,
    info,
    warn,
};

/// Spectra with fewer peaks contribute no matches.
pub const MIN_PEAKS: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SearchStats {
    pub spectra: u64,
    pub spectra_skipped: u64,
    pub spectra_failed: u64,
    pub tags: u64,
    pub duplicate_tags: u64,
    pub trie_nodes: u64,
    pub bytes_scanned: u64,
    pub records: u64,
    pub extension: ExtensionStats,
    pub alignment: AlignmentStats,
    pub submitted: u64,
    pub prepare_time: Duration,
    pub scan_time: Duration,
}

impl SearchStats {
    pub fn merge(&mut self, other: &SearchStats) {
        self.spectra += other.spectra;
        self.spectra_skipped += other.spectra_skipped;
        self.spectra_failed += other.spectra_failed;
        self.tags += other.tags;
        self.duplicate_tags += other.duplicate_tags;
        self.trie_nodes += other.trie_nodes;
        self.bytes_scanned += other.bytes_scanned;
        self.records += other.records;
        self.extension.merge(&other.extension);
        self.alignment.merge(&other.alignment);
        self.submitted += other.submitted;
        self.prepare_time += other.prepare_time;
        self.scan_time += other.scan_time;
    }
}

/// Builds the modification catalog described by a configuration.
///
/// Records from `modification_file` are merged after the inline modifications.
/// A missing file is reported and the search continues without its records.
pub fn catalog_from_config(config: &SearchConfig) -> Result<Catalog> {
    let mut catalog = Catalog::from_specs(&config.fixed_modifications, &config.modifications)?;
    if let Some(path) = &config.modification_file {
        let min_score = config.min_modification_score.unwrap_or(f32::MIN);
        catalog.merge_file(path, min_score)?;
    }
    Ok(catalog)
}

/// Per-worker buffers reused across blocks.
#[derive(Debug)]
pub struct SearchScratch {
    pub trie: TagTrie,
    pub table: AlignmentTable,
    pub candidates: Vec<CandidateMatch>,
}

impl SearchScratch {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            trie: TagTrie::new(config.fragment_tolerance()),
            table: AlignmentTable::new(),
            candidates: Vec::new(),
        }
    }
}

/// One store per query of the block, in query order.
#[derive(Debug)]
pub struct BlockResult {
    pub stores: Vec<MatchStore>,
    pub stats: SearchStats,
}

/// Read-only state shared by every block of a search run.
#[derive(Debug)]
pub struct SearchSession {
    config: SearchConfig,
    catalog: Catalog,
    decorations: DecorationSet,
    jumps: JumpTable,
    skew: SkewPenalty,
    mandatory_type: Option<usize>,
}

impl SearchSession {
    pub fn new(config: SearchConfig, mut catalog: Catalog) -> Result<Self> {
        config.validate()?;
        if config.mode == SearchMode::Blind {
            catalog.add_blind_modifications(config.blind_window())?;
        }
        let mandatory_type = match &config.mandatory_modification {
            Some(name) => Some(catalog.type_by_name(name).ok_or_else(|| {
                ConfigError::UnknownMandatoryModification { name: name.clone() }
            })?),
            None => None,
        };
        // Only flank extension reconciles masses through decorations.
        let decorations = match config.mode {
            SearchMode::Tag => catalog.build_decorations(config.mod_budget, config.max_mods_per_type)?,
            SearchMode::Alignment | SearchMode::Blind => catalog.build_decorations(0, 0)?,
        };
        let jumps = JumpTable::new(&catalog, config.mod_budget > 0, config.fragment_tolerance());
        info!(
            "Search session: mode {:?}, {} modifications in {} types, {} decorations, {} jumps",
            config.mode,
            catalog.modifications().len(),
            catalog.num_types(),
            decorations.len(),
            jumps.len()
        );
        Ok(Self {
            config,
            catalog,
            decorations,
            jumps,
            skew: SkewPenalty::default(),
            mandatory_type,
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn usable(&self, query: &SpectrumQuery<'_>) -> bool {
        query.spectrum.peaks.len() >= MIN_PEAKS && query.spectrum.residue_mass() > 0
    }

    fn build_graph(&self, query: &SpectrumQuery<'_>) -> Option<TagGraph> {
        if !self.usable(query) {
            debug!("Skipping spectrum {}: too few peaks", query.spectrum.id);
            return None;
        }
        let graph = TagGraph::build(query, &self.catalog, &self.jumps, self.config.parent_tolerance());
        if graph.interior_count() == 0 {
            debug!("Skipping spectrum {}: no graph nodes", query.spectrum.id);
            return None;
        }
        Some(graph)
    }

    /// Searches one block of spectra with a single pass over `database`.
    #[cfg_attr(
        feature = "instrumentation",
        tracing::instrument(skip_all, level = "trace")
    )]
    pub fn search_block<R: Read>(
        &self,
        queries: &[SpectrumQuery<'_>],
        database: R,
        scratch: &mut SearchScratch,
        scorer: &dyn CandidateScorer,
    ) -> Result<BlockResult> {
        let mut stores: Vec<MatchStore> = queries
            .iter()
            .map(|_| MatchStore::new(self.config.max_matches, self.config.parent_tolerance()))
            .collect();
        let mut stats = SearchStats {
            spectra: queries.len() as u64,
            ..Default::default()
        };
        match self.config.mode {
            SearchMode::Tag => self.tag_search(queries, database, scratch, scorer, &mut stores, &mut stats)?,
            SearchMode::Alignment | SearchMode::Blind => {
                self.alignment_search(queries, database, scratch, &mut stores, scorer, &mut stats)?
            }
        }
        if stats.extension.side_truncations > 0 {
            warn!(
                "{} flank extensions hit the per-side match cap",
                stats.extension.side_truncations
            );
        }
        Ok(BlockResult { stores, stats })
    }

    fn tag_search<R: Read>(
        &self,
        queries: &[SpectrumQuery<'_>],
        database: R,
        scratch: &mut SearchScratch,
        scorer: &dyn CandidateScorer,
        stores: &mut [MatchStore],
        stats: &mut SearchStats,
    ) -> Result<()> {
        let SearchScratch {
            trie, candidates, ..
        } = scratch;
        let prepare_start = Instant::now();
        trie.clear();
        let mut active = vec![false; queries.len()];
        for (i, query) in queries.iter().enumerate() {
            let Some(graph) = self.build_graph(query) else {
                stats.spectra_skipped += 1;
                continue;
            };
            let generator = TagGenerator {
                graph: &graph,
                jumps: &self.jumps,
                skew: &self.skew,
                tag_length: self.config.tag_length,
                max_mods: self.config.mod_budget.min(MAX_TAG_MODS),
            };
            for tag in generator.generate(i as u32, self.config.max_tags) {
                stats.tags += 1;
                if let InsertOutcome::Duplicate { .. } = trie.insert(tag) {
                    stats.duplicate_tags += 1;
                }
            }
            active[i] = true;
        }
        trie.build_failure_links();
        stats.trie_nodes = trie.num_nodes() as u64;
        stats.prepare_time = prepare_start.elapsed();
        if !active.iter().any(|&a| a) {
            return Ok(());
        }

        let ctx = ExtensionContext {
            catalog: &self.catalog,
            decorations: &self.decorations,
            parent_tolerance: self.config.parent_tolerance(),
            budget: self.config.mod_budget,
            max_per_type: self.config.max_mods_per_type,
            mandatory_type: self.mandatory_type,
        };
        let scan_start = Instant::now();
        let mut buffer = DatabaseBuffer::new(
            database,
            self.config.scan_window_bytes,
            self.config.scan_pad_bytes,
        );
        let mut state = ROOT;
        let mut scan_stats = ScanStats::default();
        while let Some(byte) = buffer.next_byte()? {
            state = trie.step(state, byte, &mut scan_stats);
            if state == ROOT {
                continue;
            }
            let anchor = Anchor {
                end: buffer.position(),
                record_index: buffer.record_index(),
            };
            for node in trie.matches_at(state) {
                for &tag_index in trie.node(node).tags() {
                    let tag = trie.tag(tag_index);
                    let spectrum = tag.spectrum as usize;
                    if !active[spectrum] {
                        continue;
                    }
                    scan_stats.hits += 1;
                    candidates.clear();
                    let query = &queries[spectrum];
                    let view = buffer.view();
                    if let Err(e) = extend_anchor(
                        &ctx,
                        &view,
                        tag,
                        anchor,
                        query,
                        &mut stats.extension,
                        candidates,
                    ) {
                        warn!("Abandoning spectrum {}: {}", query.spectrum.id, e);
                        active[spectrum] = false;
                        stores[spectrum] = MatchStore::new(0, 0);
                        stats.spectra_failed += 1;
                        continue;
                    }
                    for mut candidate in candidates.drain(..) {
                        candidate.score = scorer.score(&candidate, query, &self.catalog);
                        stats.submitted += 1;
                        stores[spectrum].submit(candidate);
                    }
                }
            }
        }
        stats.bytes_scanned = scan_stats.bytes;
        stats.records = buffer.record_index() as u64;
        stats.scan_time = scan_start.elapsed();
        debug!(
            "Tag scan: {} bytes, {} transitions, {} hits",
            scan_stats.bytes, scan_stats.transitions, scan_stats.hits
        );
        Ok(())
    }

    fn alignment_search<R: Read>(
        &self,
        queries: &[SpectrumQuery<'_>],
        database: R,
        scratch: &mut SearchScratch,
        stores: &mut [MatchStore],
        scorer: &dyn CandidateScorer,
        stats: &mut SearchStats,
    ) -> Result<()> {
        let SearchScratch {
            table, candidates, ..
        } = scratch;
        let prepare_start = Instant::now();
        let graphs: Vec<Option<TagGraph>> = queries
            .iter()
            .map(|q| {
                let graph = self.build_graph(q);
                if graph.is_none() {
                    stats.spectra_skipped += 1;
                }
                graph
            })
            .collect();
        let ctx = AlignerContext {
            catalog: &self.catalog,
            jumps: &self.jumps,
            skew: &self.skew,
            protease: self.config.protease,
            protease_penalty: self.config.protease_penalty,
            fragment_tolerance: self.config.fragment_tolerance(),
            parent_tolerance: self.config.parent_tolerance(),
            budget: self.config.mod_budget,
            max_per_type: self.config.max_mods_per_type,
            mandatory_type: self.mandatory_type,
            slide_tolerance: self.config.slide_score_tolerance,
            max_rows: self.config.max_alignment_rows,
        };
        let mut aligners: Vec<Option<WindowAligner<'_>>> = graphs
            .iter()
            .zip(queries)
            .map(|(graph, query)| {
                graph
                    .as_ref()
                    .map(|g| WindowAligner::new(&ctx, g, *query, scorer))
            })
            .collect();
        stats.prepare_time = prepare_start.elapsed();
        if aligners.iter().all(|a| a.is_none()) {
            return Ok(());
        }

        let scan_start = Instant::now();
        let mut buffer = DatabaseBuffer::new(
            database,
            self.config.scan_window_bytes,
            self.config.scan_pad_bytes,
        );
        while let Some(byte) = buffer.next_byte()? {
            stats.bytes_scanned += 1;
            if byte == RECORD_SEPARATOR || !self.catalog.residues().is_known(byte) {
                continue;
            }
            let start = buffer.position() - 1;
            let record_index = buffer.record_index();
            let view = buffer.view();
            for (spectrum, slot) in aligners.iter_mut().enumerate() {
                let Some(aligner) = slot else {
                    continue;
                };
                candidates.clear();
                let cutoff = stores[spectrum].cutoff();
                if let Err(e) = aligner.align_at(
                    &view,
                    start,
                    record_index,
                    table,
                    cutoff,
                    &mut stats.alignment,
                    candidates,
                ) {
                    warn!("Abandoning spectrum {}: {}", queries[spectrum].spectrum.id, e);
                    *slot = None;
                    stores[spectrum] = MatchStore::new(0, 0);
                    stats.spectra_failed += 1;
                    continue;
                }
                for candidate in candidates.drain(..) {
                    stats.submitted += 1;
                    stores[spectrum].submit(candidate);
                }
            }
        }
        stats.records = buffer.record_index() as u64;
        stats.scan_time = scan_start.elapsed();
        Ok(())
    }
}
