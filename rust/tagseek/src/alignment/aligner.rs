use super::table::{
    AlignmentTable,
    Cell,
    Trace,
};
use crate::catalog::{
    Catalog,
    ModCounts,
    ModIndex,
};
use crate::config::{
    MAX_ALIGNMENT_ROWS,
    MAX_MOD_BUDGET,
    Protease,
    Terminal,
};
use crate::database::{
    DatabaseView,
    RECORD_SEPARATOR,
};
use crate::errors::ScanError;
use crate::models::mass::Mass;
use crate::models::{
    CandidateMatch,
    ModPlacement,
    SpectrumQuery,
    TERMINUS_MARKER,
};
use crate::scoring::{
    CandidateScorer,
    SkewPenalty,
};
use crate::tags::{
    JumpTable,
    NodeKind,
    TagGraph,
};
use arrayvec::ArrayVec;

/// Longest residue run a single back-edge may cover.
pub const MAX_BACK_EDGE_RESIDUES: usize = 3;

/// Session-wide settings of the windowed aligner.
#[derive(Debug, Clone, Copy)]
pub struct AlignerContext<'a> {
    pub catalog: &'a Catalog,
    pub jumps: &'a JumpTable,
    pub skew: &'a SkewPenalty,
    pub protease: Protease,
    pub protease_penalty: f32,
    pub fragment_tolerance: Mass,
    pub parent_tolerance: Mass,
    /// At most [`crate::config::MAX_ALIGNMENT_MODS`].
    pub budget: usize,
    pub max_per_type: usize,
    pub mandatory_type: Option<usize>,
    pub slide_tolerance: f32,
    pub max_rows: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignmentStats {
    pub windows: u64,
    pub backtracks: u64,
    pub candidates: u64,
    pub slides: u64,
}

impl AlignmentStats {
    pub fn merge(&mut self, other: &AlignmentStats) {
        self.windows += other.windows;
        self.backtracks += other.backtracks;
        self.candidates += other.candidates;
        self.slides += other.slides;
    }
}

type Window = ArrayVec<u8, MAX_ALIGNMENT_ROWS>;

/// Aligns database windows against one spectrum's mass graph.
pub struct WindowAligner<'a> {
    ctx: &'a AlignerContext<'a>,
    graph: &'a TagGraph,
    query: SpectrumQuery<'a>,
    scorer: &'a dyn CandidateScorer,
    c_term_nodes: Vec<u32>,
    lightest_delta: Mass,
}

impl<'a> WindowAligner<'a> {
    pub fn new(
        ctx: &'a AlignerContext<'a>,
        graph: &'a TagGraph,
        query: SpectrumQuery<'a>,
        scorer: &'a dyn CandidateScorer,
    ) -> Self {
        let c_term_nodes = graph
            .nodes()
            .iter()
            .enumerate()
            .filter(|(_, n)| n.kind == NodeKind::RightEndpoint && n.terminal_mod.is_some())
            .map(|(i, _)| i as u32)
            .collect();
        let lightest_delta = ctx
            .catalog
            .modifications()
            .iter()
            .map(|m| m.mass)
            .min()
            .unwrap_or(0)
            .min(0);
        Self {
            ctx,
            graph,
            query,
            scorer,
            c_term_nodes,
            lightest_delta,
        }
    }

    fn residue_at(&self, view: &DatabaseView<'_>, offset: u64) -> Result<Option<u8>, ScanError> {
        Ok(view
            .get(offset)?
            .filter(|&b| b != RECORD_SEPARATOR && self.ctx.catalog.residues().is_known(b)))
    }

    /// Aligns every prefix of the window starting at `start`, submitting
    /// candidates whose path score beats `cutoff`.
    #[cfg_attr(
        feature = "instrumentation",
        tracing::instrument(skip_all, level = "trace")
    )]
    #[allow(clippy::too_many_arguments)]
    pub fn align_at(
        &self,
        view: &DatabaseView<'_>,
        start: u64,
        record_index: usize,
        table: &mut AlignmentTable,
        cutoff: Option<f32>,
        stats: &mut AlignmentStats,
        out: &mut Vec<CandidateMatch>,
    ) -> Result<(), ScanError> {
        let ctx = self.ctx;
        let residues = ctx.catalog.residues();
        let total = self.graph.residue_mass();
        let limit = total + ctx.parent_tolerance - self.lightest_delta * ctx.budget as Mass;

        let mut window = Window::new();
        let mut prefix: ArrayVec<Mass, { MAX_ALIGNMENT_ROWS + 1 }> = ArrayVec::new();
        prefix.push(0);
        let max_rows = ctx.max_rows.min(MAX_ALIGNMENT_ROWS);
        while window.len() < max_rows {
            let Some(residue) = self.residue_at(view, start + window.len() as u64)? else {
                break;
            };
            let next = prefix[window.len()] + residues.get(residue).unwrap_or(0);
            if next - ctx.fragment_tolerance > limit {
                break;
            }
            window.push(residue);
            prefix.push(next);
        }
        if window.is_empty() {
            return Ok(());
        }
        stats.windows += 1;

        let layers = ctx.budget.min(2) + 1;
        table.reset(window.len() + 1, self.graph.len(), layers);

        let previous = match start.checked_sub(1) {
            Some(p) => self.residue_at(view, p)?,
            None => None,
        };
        let start_penalty = if ctx.protease.consistent_start(previous, window[0]) {
            0.0
        } else {
            ctx.protease_penalty
        };
        for (index, node) in self.graph.nodes().iter().enumerate() {
            if node.kind != NodeKind::LeftEndpoint {
                continue;
            }
            match node.terminal_mod {
                None if node.mass == 0 => {
                    table.offer(
                        0,
                        index,
                        0,
                        Cell {
                            score: start_penalty,
                            trace: Trace::Start { n_term: None },
                        },
                    );
                }
                Some(m) if layers > 1 && ctx.catalog.modification(m).applies_to(window[0]) => {
                    table.offer(
                        0,
                        index,
                        1,
                        Cell {
                            score: start_penalty + ctx.catalog.modification(m).score,
                            trace: Trace::Start { n_term: Some(m) },
                        },
                    );
                }
                _ => {}
            }
        }
        self.carry(table, 0);

        for row in 1..=window.len() {
            self.fill_row(table, row, &window, &prefix);
            self.check_ends(
                view,
                table,
                start,
                record_index,
                row,
                &window,
                cutoff,
                stats,
                out,
            )?;
        }
        Ok(())
    }

    fn carry(&self, table: &mut AlignmentTable, row: usize) {
        for node in 0..self.graph.len() {
            for layer in 1..table.layers() {
                if let Some(prev) = table.get(row, node, layer - 1).copied() {
                    table.offer(
                        row,
                        node,
                        layer,
                        Cell {
                            score: prev.score,
                            trace: Trace::Carry {
                                layer: (layer - 1) as u8,
                            },
                        },
                    );
                }
            }
        }
    }

    fn fill_row(&self, table: &mut AlignmentTable, row: usize, window: &[u8], prefix: &[Mass]) {
        let ctx = self.ctx;
        let graph = self.graph;
        let tol = ctx.fragment_tolerance;
        let residue = window[row - 1];
        let residue_mass = ctx.catalog.residues().get(residue).unwrap_or(0);

        for (v, node) in graph.nodes().iter().enumerate() {
            if node.kind == NodeKind::LeftEndpoint {
                continue;
            }
            for layer in 0..table.layers() {
                // Unmodified one, two or three residue back-edges.
                for span in 1..=MAX_BACK_EDGE_RESIDUES.min(row) {
                    let from_row = row - span;
                    let span_mass = prefix[row] - prefix[from_row];
                    let expected = node.mass - span_mass;
                    for u in graph.nodes_in(expected - tol, expected + tol) {
                        let from = graph.node(u as u32);
                        if u == v || from.kind == NodeKind::RightEndpoint {
                            continue;
                        }
                        let Some(prev) = table.get(from_row, u, layer).copied() else {
                            continue;
                        };
                        let interior: f32 = (1..span)
                            .map(|t| {
                                let prm = from.mass + prefix[from_row + t] - prefix[from_row];
                                self.query.prm_scorer.score(prm)
                            })
                            .sum();
                        let skew = node.mass - from.mass - span_mass;
                        table.offer(
                            row,
                            v,
                            layer,
                            Cell {
                                score: prev.score + node.score + interior + ctx.skew.edge_penalty(skew),
                                trace: Trace::Step {
                                    row: from_row as u16,
                                    node: u as u32,
                                    layer: layer as u8,
                                    modification: None,
                                },
                            },
                        );
                    }
                }

                if layer == 0 {
                    continue;
                }
                // One modified residue.
                for &(mod_index, delta) in ctx.jumps.modifications_for(residue) {
                    let expected = node.mass - residue_mass - delta;
                    let mod_score = ctx.catalog.modification(mod_index).score;
                    for u in graph.nodes_in(expected - tol, expected + tol) {
                        let from = graph.node(u as u32);
                        if u == v || from.kind == NodeKind::RightEndpoint {
                            continue;
                        }
                        let Some(prev) = table.get(row - 1, u, layer - 1).copied() else {
                            continue;
                        };
                        let skew = node.mass - from.mass - residue_mass - delta;
                        table.offer(
                            row,
                            v,
                            layer,
                            Cell {
                                score: prev.score + node.score + mod_score + ctx.skew.edge_penalty(skew),
                                trace: Trace::Step {
                                    row: (row - 1) as u16,
                                    node: u as u32,
                                    layer: (layer - 1) as u8,
                                    modification: Some(mod_index),
                                },
                            },
                        );
                    }
                }

                // Leave a modification slot unused.
                if let Some(prev) = table.get(row, v, layer - 1).copied() {
                    table.offer(
                        row,
                        v,
                        layer,
                        Cell {
                            score: prev.score,
                            trace: Trace::Carry {
                                layer: (layer - 1) as u8,
                            },
                        },
                    );
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_ends(
        &self,
        view: &DatabaseView<'_>,
        table: &AlignmentTable,
        start: u64,
        record_index: usize,
        row: usize,
        window: &[u8],
        cutoff: Option<f32>,
        stats: &mut AlignmentStats,
        out: &mut Vec<CandidateMatch>,
    ) -> Result<(), ScanError> {
        let ctx = self.ctx;
        let total = self.graph.residue_mass();
        let last = window[row - 1];
        let next = self.residue_at(view, start + row as u64)?;
        let end_penalty = if ctx.protease.consistent_end(last, next) {
            0.0
        } else {
            ctx.protease_penalty
        };
        let top = table.layers() - 1;

        let plain = self
            .graph
            .nodes_in(total - ctx.parent_tolerance, total + ctx.parent_tolerance)
            .filter(|&v| self.graph.node(v as u32).terminal_mod.is_none())
            .map(|v| (v, top, None));
        let decorated = self.c_term_nodes.iter().filter_map(|&v| {
            let m = self.graph.node(v).terminal_mod?;
            (top >= 1 && ctx.catalog.modification(m).applies_to(last))
                .then(|| (v as usize, top - 1, Some(m)))
        });

        for (node, layer, c_term) in plain.chain(decorated) {
            let Some(cell) = table.get(row, node, layer) else {
                continue;
            };
            let mod_score = c_term
                .map(|m| ctx.catalog.modification(m).score)
                .unwrap_or(0.0);
            let score = cell.score + end_penalty + mod_score;
            if cutoff.is_some_and(|c| score <= c) {
                continue;
            }
            stats.backtracks += 1;
            if let Some(candidate) =
                self.materialize(view, table, start, record_index, row, node, layer, c_term, window)?
            {
                self.emit_with_slides(candidate, stats, out);
            }
        }
        Ok(())
    }

    /// Follows the trace back from an end cell and builds the candidate.
    #[allow(clippy::too_many_arguments)]
    fn materialize(
        &self,
        view: &DatabaseView<'_>,
        table: &AlignmentTable,
        start: u64,
        record_index: usize,
        end_row: usize,
        end_node: usize,
        end_layer: usize,
        c_term: Option<ModIndex>,
        window: &[u8],
    ) -> Result<Option<CandidateMatch>, ScanError> {
        let catalog = self.ctx.catalog;
        let mut mods: ArrayVec<ModPlacement, MAX_MOD_BUDGET> = ArrayVec::new();
        let placement = |position: usize, modification: ModIndex| ModPlacement {
            position: position as u16,
            type_index: catalog.modification(modification).type_index as u16,
            modification,
        };
        if let Some(m) = c_term {
            mods.push(placement(end_row - 1, m));
        }

        let (mut row, mut node, mut layer) = (end_row, end_node, end_layer);
        loop {
            let Some(cell) = table.get(row, node, layer) else {
                return Ok(None);
            };
            match cell.trace {
                Trace::Start { n_term } => {
                    if let Some(m) = n_term {
                        if mods.try_push(placement(0, m)).is_err() {
                            return Ok(None);
                        }
                    }
                    break;
                }
                Trace::Carry { layer: l } => layer = l as usize,
                Trace::Step {
                    row: r,
                    node: n,
                    layer: l,
                    modification,
                } => {
                    if let Some(m) = modification {
                        if mods.try_push(placement(r as usize, m)).is_err() {
                            return Ok(None);
                        }
                    }
                    row = r as usize;
                    node = n as usize;
                    layer = l as usize;
                }
            }
        }
        mods.sort();

        let mut counts = ModCounts::new();
        for m in &mods {
            counts.add(m.type_index as usize, 1);
        }
        if counts.iter().any(|(_, c)| c as usize > self.ctx.max_per_type) {
            return Ok(None);
        }
        if let Some(required) = self.ctx.mandatory_type {
            if !counts.contains_type(required) {
                return Ok(None);
            }
        }

        let previous = match start.checked_sub(1) {
            Some(p) => self.residue_at(view, p)?,
            None => None,
        };
        let next = self.residue_at(view, start + end_row as u64)?;
        let mut candidate = CandidateMatch {
            residues: window[..end_row].to_vec(),
            prefix_residue: previous.unwrap_or(TERMINUS_MARKER),
            suffix_residue: next.unwrap_or(TERMINUS_MARKER),
            mods,
            parent_mass: 0,
            score: 0.0,
            db_offset: start,
            record_index,
        };
        let Some(parent_mass) = candidate.implied_parent_mass(catalog) else {
            return Ok(None);
        };
        if (parent_mass - self.query.spectrum.parent_mass).abs() > self.ctx.parent_tolerance {
            return Ok(None);
        }
        candidate.parent_mass = parent_mass;
        Ok(Some(candidate))
    }

    /// Scores a candidate and also emits the variants obtained by sliding one
    /// modification a single residue when the score stays within tolerance.
    fn emit_with_slides(
        &self,
        mut candidate: CandidateMatch,
        stats: &mut AlignmentStats,
        out: &mut Vec<CandidateMatch>,
    ) {
        let catalog = self.ctx.catalog;
        candidate.score = self.scorer.score(&candidate, &self.query, catalog);
        stats.candidates += 1;
        let variants = slide_variants(&candidate, catalog, self.ctx.slide_tolerance, |c| {
            self.scorer.score(c, &self.query, catalog)
        });
        stats.slides += variants.len() as u64;
        out.extend(variants);
        out.push(candidate);
    }
}

/// Moves each non-terminal modification of `candidate` one residue to the left
/// and one to the right, keeping the scored variants that lose at most
/// `tolerance` against `candidate.score`.
fn slide_variants(
    candidate: &CandidateMatch,
    catalog: &Catalog,
    tolerance: f32,
    mut score: impl FnMut(&CandidateMatch) -> f32,
) -> Vec<CandidateMatch> {
    let mut out = Vec::new();
    for moving in 0..candidate.mods.len() {
        let placement = candidate.mods[moving];
        let type_index = placement.type_index as usize;
        if catalog.types()[type_index].terminal != Terminal::Anywhere {
            continue;
        }
        for direction in [-1i32, 1] {
            let position = placement.position as i32 + direction;
            if position < 0 || position as usize >= candidate.residues.len() {
                continue;
            }
            let occupied = candidate
                .mods
                .iter()
                .any(|m| m.position as i32 == position);
            if occupied {
                continue;
            }
            let Some(member) =
                catalog.member_for_residue(type_index, candidate.residues[position as usize])
            else {
                continue;
            };
            let mut variant = candidate.clone();
            variant.mods[moving].position = position as u16;
            variant.mods[moving].modification = member;
            variant.mods.sort();
            variant.score = score(&variant);
            if variant.score + tolerance >= candidate.score {
                out.push(variant);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResidueSet;
    use crate::models::mass::{
        PARENT_MASS_BOOST,
        PROTON_MASS,
    };
    use crate::models::{
        Peak,
        Spectrum,
    };
    use crate::scoring::{
        PeakPrmScorer,
        PrmLadderScorer,
    };

    /// b-ion ladder of a peptide, with `shift` added from residue `at` onwards.
    fn ladder_spectrum(catalog: &Catalog, residues: &[u8], at: usize, shift: Mass) -> Spectrum {
        let table = catalog.residues();
        let mut acc = 0;
        let mut peaks = Vec::new();
        for (i, &r) in residues.iter().enumerate() {
            acc += table.get(r).unwrap();
            if i == at {
                acc += shift;
            }
            if i + 1 < residues.len() {
                peaks.push(Peak {
                    mass: acc + PROTON_MASS,
                    intensity: 1.0,
                    rank: i as u32 + 1,
                });
            }
        }
        Spectrum {
            id: "ladder".to_string(),
            peaks,
            parent_mass: acc + PARENT_MASS_BOOST,
            charge: 1,
        }
    }

    fn run(catalog: &Catalog, spectrum: &Spectrum, budget: usize, db: &[u8], start: u64) -> Vec<CandidateMatch> {
        let jumps = JumpTable::new(catalog, budget > 0, 50);
        let skew = SkewPenalty::default();
        let ctx = AlignerContext {
            catalog,
            jumps: &jumps,
            skew: &skew,
            protease: Protease::None,
            protease_penalty: -1.0,
            fragment_tolerance: 50,
            parent_tolerance: 100,
            budget,
            max_per_type: 2,
            mandatory_type: None,
            slide_tolerance: 1.0,
            max_rows: 40,
        };
        let prm = PeakPrmScorer::new(spectrum, 50);
        let query = SpectrumQuery {
            spectrum,
            prm_scorer: &prm,
        };
        let graph = TagGraph::build(&query, catalog, &jumps, 100);
        let scorer = PrmLadderScorer;
        let aligner = WindowAligner::new(&ctx, &graph, query, &scorer);
        let mut table = AlignmentTable::new();
        let mut stats = AlignmentStats::default();
        let mut out = Vec::new();
        aligner
            .align_at(&DatabaseView::from_slice(db), start, 0, &mut table, None, &mut stats, &mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_unmodified_window() {
        let catalog = Catalog::default();
        let spectrum = ladder_spectrum(&catalog, b"SAMPLER", 0, 0);
        let out = run(&catalog, &spectrum, 0, b"GGKSAMPLERK*", 3);
        assert!(out.iter().any(|c| c.annotated(&catalog) == "K.SAMPLER.K"));
        // Starting one residue late never reaches the parent mass.
        let out = run(&catalog, &spectrum, 0, b"GGKSAMPLERK*", 4);
        assert!(out.is_empty());
    }

    #[test]
    fn test_slides_move_one_residue() {
        let mut catalog = Catalog::default();
        catalog
            .add_modification("Phospho", 7997, -1.0, ResidueSet::from_letters("ST").unwrap(), Terminal::Anywhere)
            .unwrap();
        let candidate = |position: u16| {
            let mut mods = ArrayVec::new();
            mods.push(ModPlacement {
                position,
                type_index: 0,
                modification: 0,
            });
            CandidateMatch {
                residues: b"SSSSA".to_vec(),
                prefix_residue: b'K',
                suffix_residue: b'-',
                mods,
                parent_mass: 0,
                score: 5.0,
                db_offset: 0,
                record_index: 0,
            }
        };
        let positions = |variants: Vec<CandidateMatch>| -> Vec<u16> {
            variants.iter().map(|v| v.mods[0].position).collect()
        };

        // Every placement scores the same, yet only neighbours are emitted.
        let flat = slide_variants(&candidate(0), &catalog, 1.0, |_| 5.0);
        assert_eq!(positions(flat), vec![1]);
        let flat = slide_variants(&candidate(1), &catalog, 1.0, |_| 5.0);
        assert_eq!(positions(flat), vec![0, 2]);
        // A is not a phospho site.
        let flat = slide_variants(&candidate(3), &catalog, 1.0, |_| 5.0);
        assert_eq!(positions(flat), vec![2]);

        let worse = slide_variants(&candidate(1), &catalog, 1.0, |c| {
            if c.mods[0].position == 0 { 3.0 } else { 4.5 }
        });
        assert_eq!(positions(worse), vec![2]);
    }

    #[test]
    fn test_modified_window() {
        let mut catalog = Catalog::default();
        catalog
            .add_modification("Phospho", 7997, -1.0, ResidueSet::from_letters("ST").unwrap(), Terminal::Anywhere)
            .unwrap();
        let spectrum = ladder_spectrum(&catalog, b"SAMPLER", 0, 7997);
        let out = run(&catalog, &spectrum, 1, b"GGKSAMPLERK*", 3);
        let hit = out
            .iter()
            .find(|c| c.annotated(&catalog) == "K.S[Phospho]AMPLER.K")
            .unwrap();
        assert_eq!(hit.mods[0].position, 0);
        assert_eq!(hit.parent_mass, spectrum.parent_mass);

        let out = run(&catalog, &spectrum, 0, b"GGKSAMPLERK*", 3);
        assert!(out.is_empty());
    }
}
