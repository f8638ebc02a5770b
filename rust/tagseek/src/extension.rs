//! Flank extension around exact tag hits.
//!
//! A hit fixes the tag residues in the database. Each side is then walked
//! outward one residue at a time, and every decoration that reconciles the
//! flanking residue mass with the tag's expected prefix (or suffix) mass is
//! recorded, provided its modifications can be placed on the walked residues.
//! Left and right matches are finally combined under the global limits.

use crate::catalog::{
    Catalog,
    DecorationSet,
    ModCounts,
};
use crate::config::{
    MAX_FLANK_RESIDUES,
    MAX_MOD_BUDGET,
    MAX_TAG_LENGTH,
    Terminal,
};
use crate::database::{
    DatabaseView,
    RECORD_SEPARATOR,
};
use crate::errors::ScanError;
use crate::models::mass::{
    Mass,
    PARENT_MASS_BOOST,
};
use crate::models::{
    CandidateMatch,
    ModPlacement,
    SpectrumQuery,
    TERMINUS_MARKER,
};
use crate::scoring::PrmScorer;
use crate::tags::Tag;
use arrayvec::ArrayVec;

/// Most decorated flank matches kept per side of one hit.
pub const MAX_SIDE_MATCHES: usize = 16;

type Placements = ArrayVec<ModPlacement, MAX_MOD_BUDGET>;

#[derive(Debug, Clone, Copy)]
pub struct ExtensionContext<'a> {
    pub catalog: &'a Catalog,
    pub decorations: &'a DecorationSet,
    pub parent_tolerance: Mass,
    pub budget: usize,
    pub max_per_type: usize,
    /// Type index every candidate must contain.
    pub mandatory_type: Option<usize>,
}

/// Where a tag was found: the tag occupies the bytes ending just before `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub end: u64,
    pub record_index: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtensionStats {
    pub anchors: u64,
    pub side_matches: u64,
    pub side_truncations: u64,
    pub candidates: u64,
}

impl ExtensionStats {
    pub fn merge(&mut self, other: &ExtensionStats) {
        self.anchors += other.anchors;
        self.side_matches += other.side_matches;
        self.side_truncations += other.side_truncations;
        self.candidates += other.candidates;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// One side of a hit to close.
#[derive(Debug, Clone, Copy)]
struct Flank {
    side: Side,
    /// First byte past the walk, i.e. the tag boundary.
    origin: u64,
    /// Residue mass the flank plus its decoration must add up to.
    target: Mass,
    /// Prefix residue mass in front of the flank's first residue.
    base_mass: Mass,
}

/// One way of closing one side of a hit.
#[derive(Debug, Clone)]
struct SideMatch {
    /// Flanking residues, in peptide order.
    residues: ArrayVec<u8, MAX_FLANK_RESIDUES>,
    counts: ModCounts,
    /// Positions relative to the first flanking residue.
    placements: Placements,
}

/// The residues a decoration is placed on, with their position in the peptide.
#[derive(Debug, Clone, Copy)]
pub struct PlacementSpan<'a> {
    pub residues: &'a [u8],
    /// Prefix residue mass before the first residue of the span.
    pub base_mass: Mass,
    /// The first residue is the peptide's first residue.
    pub n_terminus: bool,
    /// The last residue is the peptide's last residue.
    pub c_terminus: bool,
}

/// Places every modification of decoration `full` on a distinct residue of
/// `span`, picking the placement whose prefix masses the spectrum supports best.
///
/// Rows are span positions and columns are the sub-decorations of `full`. A cell
/// either carries its decoration over from the previous residue or attaches one
/// modification to the current residue, coming from the sub-decoration with one
/// fewer use of that type. Each cell adds the PRM score of the prefix mass it
/// implies. Ties keep the carry, then the lowest predecessor column, so sites the
/// spectrum cannot tell apart resolve to the earliest residue.
pub fn place_modifications(
    catalog: &Catalog,
    decorations: &DecorationSet,
    full: usize,
    span: &PlacementSpan<'_>,
    prm_scorer: &dyn PrmScorer,
) -> Option<Placements> {
    let len = span.residues.len();
    let wanted = decorations.get(full).total();
    if wanted == 0 {
        return Some(Placements::new());
    }
    if wanted > len {
        return None;
    }

    let attachable = |type_index: usize, pos: usize| -> bool {
        let at_right_place = match catalog.types()[type_index].terminal {
            Terminal::Anywhere => true,
            Terminal::NTerm => span.n_terminus && pos == 0,
            Terminal::CTerm => span.c_terminus && pos + 1 == len,
        };
        at_right_place && catalog.member_for_residue(type_index, span.residues[pos]).is_some()
    };

    let states = decorations.sub_decorations(full);
    let width = states.len();
    // Per column: (predecessor column, attached type).
    let mut steps: Vec<Vec<(usize, usize)>> = vec![Vec::new(); width];
    for (to, &upper) in states.iter().enumerate() {
        let target = decorations.get(upper);
        for (from, &lower) in states.iter().enumerate() {
            let below = decorations.get(lower);
            if below.total() + 1 != target.total() || !decorations.is_sub_decoration(lower, upper) {
                continue;
            }
            if let Some((type_index, _)) = target
                .counts
                .iter()
                .find(|&(t, c)| below.counts.get(t) < c)
            {
                steps[to].push((from, type_index));
            }
        }
    }

    // Before the first residue only the empty decoration is reachable.
    let mut previous: Vec<Option<f32>> = vec![None; width];
    previous[0] = Some(0.0);
    let mut current: Vec<Option<f32>> = vec![None; width];
    let mut trace: Vec<Option<(usize, usize)>> = vec![None; len * width];
    let mut mass = span.base_mass;
    for pos in 0..len {
        mass += catalog.residues().get(span.residues[pos]).unwrap_or(0);
        for col in 0..width {
            let mut best = previous[col].map(|score| (score, None));
            for &(from, type_index) in &steps[col] {
                let Some(score) = previous[from] else {
                    continue;
                };
                if !attachable(type_index, pos) {
                    continue;
                }
                if best.is_none_or(|(b, _)| score > b) {
                    best = Some((score, Some((from, type_index))));
                }
            }
            current[col] = best.map(|(score, step)| {
                trace[pos * width + col] = step;
                score + prm_scorer.score(mass + decorations.get(states[col]).mass)
            });
        }
        std::mem::swap(&mut previous, &mut current);
    }

    let mut col = states.iter().position(|&d| d == full)?;
    previous[col]?;
    let mut out = Placements::new();
    for pos in (0..len).rev() {
        if let Some((from, type_index)) = trace[pos * width + col] {
            let modification = catalog.member_for_residue(type_index, span.residues[pos])?;
            out.try_push(ModPlacement {
                position: pos as u16,
                type_index: type_index as u16,
                modification,
            })
            .ok()?;
            col = from;
        }
    }
    out.sort();
    Some(out)
}

fn is_residue(byte: Option<u8>, catalog: &Catalog) -> Option<u8> {
    byte.filter(|&b| b != RECORD_SEPARATOR && catalog.residues().is_known(b))
}

/// Walks one side of a hit, collecting decorated matches.
fn extend_side(
    ctx: &ExtensionContext<'_>,
    view: &DatabaseView<'_>,
    flank: &Flank,
    tag_counts: &ModCounts,
    prm_scorer: &dyn PrmScorer,
    stats: &mut ExtensionStats,
) -> Result<ArrayVec<SideMatch, MAX_SIDE_MATCHES>, ScanError> {
    let Flank {
        side,
        origin,
        target,
        base_mass,
    } = *flank;
    let mut out = ArrayVec::new();
    let tol = ctx.parent_tolerance;
    let lightest = ctx.decorations.get(0).mass.min(0);
    let mut walked: ArrayVec<u8, MAX_FLANK_RESIDUES> = ArrayVec::new();
    let mut flank_mass: Mass = 0;

    loop {
        let low = target - flank_mass - tol;
        let high = target - flank_mass + tol;
        // Span in peptide order: walked residues are collected outward.
        let mut span = walked.clone();
        if side == Side::Left {
            span.reverse();
        }
        for index in ctx.decorations.mass_range(low, high).rev() {
            let decoration = ctx.decorations.get(index);
            if tag_counts
                .merged(&decoration.counts, ctx.max_per_type, ctx.budget)
                .is_none()
            {
                continue;
            }
            let terminal_clash = match side {
                Side::Left => decoration.has_c_term,
                Side::Right => decoration.has_n_term,
            };
            if terminal_clash {
                continue;
            }
            let placement_span = PlacementSpan {
                residues: &span,
                base_mass,
                n_terminus: side == Side::Left,
                c_terminus: side == Side::Right,
            };
            let Some(placements) = place_modifications(
                ctx.catalog,
                ctx.decorations,
                index,
                &placement_span,
                prm_scorer,
            ) else {
                continue;
            };
            stats.side_matches += 1;
            let candidate = SideMatch {
                residues: span.clone(),
                counts: decoration.counts.clone(),
                placements,
            };
            if out.try_push(candidate).is_err() {
                stats.side_truncations += 1;
                return Ok(out);
            }
        }

        if flank_mass + lightest > target + tol || walked.is_full() {
            break;
        }
        let next = match side {
            Side::Left => view.before(origin - walked.len() as u64)?,
            Side::Right => view.get(origin + walked.len() as u64)?,
        };
        let Some(residue) = is_residue(next, ctx.catalog) else {
            break;
        };
        flank_mass += ctx.catalog.residues().get(residue).unwrap_or(0);
        walked.push(residue);
    }
    Ok(out)
}

/// Extends one tag hit into every candidate allowed by the decorations.
///
/// Returns `Ok` with nothing appended when the hit cannot be completed.
#[cfg_attr(
    feature = "instrumentation",
    tracing::instrument(skip_all, level = "trace")
)]
pub fn extend_anchor(
    ctx: &ExtensionContext<'_>,
    view: &DatabaseView<'_>,
    tag: &Tag,
    anchor: Anchor,
    query: &SpectrumQuery<'_>,
    stats: &mut ExtensionStats,
    out: &mut Vec<CandidateMatch>,
) -> Result<(), ScanError> {
    let parent_mass = query.spectrum.parent_mass;
    stats.anchors += 1;
    let tag_len = tag.residues.len() as u64;
    let start = anchor.end - tag_len;

    let mut tag_residues: ArrayVec<u8, MAX_TAG_LENGTH> = ArrayVec::new();
    for offset in start..anchor.end {
        match view.get(offset)? {
            Some(b) => tag_residues.push(b),
            None => return Ok(()),
        }
    }

    // The trie folds I/L and K/Q, so tag modifications are re-checked on the real residues.
    let mut tag_counts = ModCounts::new();
    let mut tag_placements = Placements::new();
    let mut n_term_in_tag = false;
    let mut c_term_in_tag = false;
    let Some(mut tag_mass) = ctx.catalog.residues().sequence_mass(&tag_residues) else {
        return Ok(());
    };
    for &(mod_index, pos) in &tag.mods {
        let modification = ctx.catalog.modification(mod_index);
        if !modification.applies_to(tag_residues[pos as usize]) {
            return Ok(());
        }
        n_term_in_tag |= modification.terminal == Terminal::NTerm;
        c_term_in_tag |= modification.terminal == Terminal::CTerm;
        tag_mass += modification.mass;
        tag_counts.add(modification.type_index, 1);
        tag_placements.push(ModPlacement {
            position: pos as u16,
            type_index: modification.type_index as u16,
            modification: mod_index,
        });
    }
    if tag_counts.total() > ctx.budget {
        return Ok(());
    }

    let left = if n_term_in_tag {
        // The modified terminus is the peptide start.
        let mut only = ArrayVec::new();
        if tag.prefix_mass.abs() <= ctx.parent_tolerance {
            only.push(SideMatch {
                residues: ArrayVec::new(),
                counts: ModCounts::new(),
                placements: Placements::new(),
            });
        }
        only
    } else {
        let flank = Flank {
            side: Side::Left,
            origin: start,
            target: tag.prefix_mass,
            base_mass: 0,
        };
        extend_side(ctx, view, &flank, &tag_counts, query.prm_scorer, stats)?
    };
    if left.is_empty() {
        return Ok(());
    }
    let right = if c_term_in_tag {
        let mut only = ArrayVec::new();
        if tag.suffix_mass.abs() <= ctx.parent_tolerance {
            only.push(SideMatch {
                residues: ArrayVec::new(),
                counts: ModCounts::new(),
                placements: Placements::new(),
            });
        }
        only
    } else {
        let flank = Flank {
            side: Side::Right,
            origin: anchor.end,
            target: tag.suffix_mass,
            base_mass: tag.prefix_mass + tag_mass,
        };
        extend_side(ctx, view, &flank, &tag_counts, query.prm_scorer, stats)?
    };

    for l in &left {
        let Some(with_left) = tag_counts.merged(&l.counts, ctx.max_per_type, ctx.budget) else {
            continue;
        };
        for r in &right {
            let Some(combined) = with_left.merged(&r.counts, ctx.max_per_type, ctx.budget) else {
                continue;
            };
            if let Some(required) = ctx.mandatory_type {
                if !combined.contains_type(required) {
                    continue;
                }
            }

            let peptide_start = start - l.residues.len() as u64;
            let peptide_end = anchor.end + r.residues.len() as u64;
            let mut residues = Vec::with_capacity((peptide_end - peptide_start) as usize);
            residues.extend_from_slice(&l.residues);
            residues.extend_from_slice(&tag_residues);
            residues.extend_from_slice(&r.residues);

            let mut mods = ArrayVec::new();
            let left_len = l.residues.len() as u16;
            let right_base = left_len + tag_len as u16;
            let shifted = l
                .placements
                .iter()
                .copied()
                .chain(tag_placements.iter().map(|p| ModPlacement {
                    position: p.position + left_len,
                    ..*p
                }))
                .chain(r.placements.iter().map(|p| ModPlacement {
                    position: p.position + right_base,
                    ..*p
                }));
            for placement in shifted {
                if mods.try_push(placement).is_err() {
                    break;
                }
            }
            mods.sort();

            let mut candidate = CandidateMatch {
                residues,
                prefix_residue: is_residue(view.before(peptide_start)?, ctx.catalog)
                    .unwrap_or(TERMINUS_MARKER),
                suffix_residue: is_residue(view.get(peptide_end)?, ctx.catalog)
                    .unwrap_or(TERMINUS_MARKER),
                mods,
                parent_mass: 0,
                score: 0.0,
                db_offset: peptide_start,
                record_index: anchor.record_index,
            };
            let Some(implied) = candidate.residue_mass(ctx.catalog) else {
                continue;
            };
            candidate.parent_mass = implied + PARENT_MASS_BOOST;
            if (candidate.parent_mass - parent_mass).abs() > ctx.parent_tolerance {
                continue;
            }
            stats.candidates += 1;
            out.push(candidate);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResidueSet;
    use crate::models::Spectrum;

    /// Scores 1.0 for prefix masses within 0.5 Da of a listed one.
    struct Ladder(Vec<Mass>);

    impl PrmScorer for Ladder {
        fn score(&self, prm: Mass) -> f32 {
            if self.0.iter().any(|&m| (m - prm).abs() <= 50) {
                1.0
            } else {
                0.0
            }
        }
    }

    fn catalog_with_phospho() -> Catalog {
        let mut catalog = Catalog::default();
        catalog
            .add_modification("Phospho", 7997, -1.0, ResidueSet::from_letters("STY").unwrap(), Terminal::Anywhere)
            .unwrap();
        catalog
            .add_modification("Acetyl", 4201, -0.5, ResidueSet::ALL, Terminal::NTerm)
            .unwrap();
        catalog
    }

    fn tag(residues: &[u8], prefix: Mass, suffix: Mass) -> Tag {
        Tag {
            spectrum: 0,
            prefix_mass: prefix,
            suffix_mass: suffix,
            residues: residues.iter().copied().collect(),
            mods: ArrayVec::new(),
            score: 0.0,
        }
    }

    fn spectrum(parent_mass: Mass) -> Spectrum {
        Spectrum {
            id: "s".to_string(),
            peaks: Vec::new(),
            parent_mass,
            charge: 2,
        }
    }

    fn decoration_index(decorations: &DecorationSet, uses: &[(usize, u8)]) -> usize {
        let mut counts = ModCounts::new();
        for &(t, c) in uses {
            counts.add(t, c);
        }
        decorations.index_of(&counts).unwrap()
    }

    fn n_terminal(residues: &[u8]) -> PlacementSpan<'_> {
        PlacementSpan {
            residues,
            base_mass: 0,
            n_terminus: true,
            c_terminus: false,
        }
    }

    #[test]
    fn test_placement_respects_terminals_and_residues() {
        let catalog = catalog_with_phospho();
        let decorations = catalog.build_decorations(2, 2).unwrap();
        let flat = Ladder(Vec::new());
        let both = decoration_index(&decorations, &[(0, 1), (1, 1)]);
        let placed = place_modifications(&catalog, &decorations, both, &n_terminal(b"GSA"), &flat).unwrap();
        assert_eq!(placed.len(), 2);
        assert_eq!((placed[0].position, placed[0].type_index), (0, 1));
        assert_eq!((placed[1].position, placed[1].type_index), (1, 0));

        let inner = PlacementSpan {
            n_terminus: false,
            ..n_terminal(b"GSA")
        };
        assert!(place_modifications(&catalog, &decorations, both, &inner, &flat).is_none());
        assert!(place_modifications(&catalog, &decorations, both, &n_terminal(b"GAA"), &flat).is_none());
        assert!(place_modifications(&catalog, &decorations, both, &n_terminal(b""), &flat).is_none());
        let empty = decorations.empty_index();
        let none = place_modifications(&catalog, &decorations, empty, &n_terminal(b""), &flat).unwrap();
        assert!(none.is_empty());

        // Two phosphates need two distinct eligible residues.
        let double = decoration_index(&decorations, &[(0, 2)]);
        assert!(place_modifications(&catalog, &decorations, double, &n_terminal(b"GSA"), &flat).is_none());
        let placed = place_modifications(&catalog, &decorations, double, &n_terminal(b"SAT"), &flat).unwrap();
        let positions: Vec<_> = placed.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0, 2]);
    }

    #[test]
    fn test_spectrum_picks_the_modified_site() {
        let catalog = catalog_with_phospho();
        let decorations = catalog.build_decorations(2, 2).unwrap();
        let phospho = decoration_index(&decorations, &[(0, 1)]);
        let span = n_terminal(b"TTW");
        let t = 10105;

        // b-ladder of TT[Phospho]W: the first T is unmodified.
        let second = Ladder(vec![t, 2 * t + 7997]);
        let placed = place_modifications(&catalog, &decorations, phospho, &span, &second).unwrap();
        assert_eq!(placed[0].position, 1);

        let first = Ladder(vec![t + 7997]);
        let placed = place_modifications(&catalog, &decorations, phospho, &span, &first).unwrap();
        assert_eq!(placed[0].position, 0);

        // No evidence either way resolves to the earliest site.
        let flat = Ladder(Vec::new());
        let placed = place_modifications(&catalog, &decorations, phospho, &span, &flat).unwrap();
        assert_eq!(placed[0].position, 0);
    }

    #[test]
    fn test_unmodified_flanks() {
        let catalog = Catalog::default();
        let decorations = catalog.build_decorations(0, 0).unwrap();
        let ctx = ExtensionContext {
            catalog: &catalog,
            decorations: &decorations,
            parent_tolerance: 50,
            budget: 0,
            max_per_type: 0,
            mandatory_type: None,
        };
        let db = b"GGK*SAMPLERGG*";
        let view = DatabaseView::from_slice(db);
        let table = catalog.residues();
        let sam = tag(
            b"AMP",
            table.get(b'S').unwrap(),
            table.sequence_mass(b"LER").unwrap(),
        );
        let spectrum = spectrum(table.sequence_mass(b"SAMPLER").unwrap() + PARENT_MASS_BOOST);
        let scorer = Ladder(Vec::new());
        let query = SpectrumQuery {
            spectrum: &spectrum,
            prm_scorer: &scorer,
        };
        let mut stats = ExtensionStats::default();
        let mut out = Vec::new();
        let anchor = Anchor {
            end: 8,
            record_index: 1,
        };
        extend_anchor(&ctx, &view, &sam, anchor, &query, &mut stats, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].residues, b"SAMPLER");
        assert_eq!(out[0].prefix_residue, TERMINUS_MARKER);
        assert_eq!(out[0].suffix_residue, b'G');
        assert_eq!(out[0].db_offset, 4);
        assert!(out[0].mods.is_empty());
    }

    #[test]
    fn test_modified_flank_is_placed() {
        let catalog = catalog_with_phospho();
        let decorations = catalog.build_decorations(2, 2).unwrap();
        let ctx = ExtensionContext {
            catalog: &catalog,
            decorations: &decorations,
            parent_tolerance: 50,
            budget: 2,
            max_per_type: 2,
            mandatory_type: None,
        };
        let table = catalog.residues();
        let db = b"KSAMPLER*";
        let view = DatabaseView::from_slice(db);
        // Spectrum of phosphorylated SAMPLER: the prefix carries the extra mass.
        let t = tag(
            b"AMP",
            table.get(b'S').unwrap() + 7997,
            table.sequence_mass(b"LER").unwrap(),
        );
        let spectrum = spectrum(table.sequence_mass(b"SAMPLER").unwrap() + 7997 + PARENT_MASS_BOOST);
        let scorer = Ladder(Vec::new());
        let query = SpectrumQuery {
            spectrum: &spectrum,
            prm_scorer: &scorer,
        };
        let mut stats = ExtensionStats::default();
        let mut out = Vec::new();
        let anchor = Anchor {
            end: 5,
            record_index: 0,
        };
        extend_anchor(&ctx, &view, &t, anchor, &query, &mut stats, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].annotated(&catalog), "K.S[Phospho]AMPLER.-");

        let required = ExtensionContext {
            mandatory_type: catalog.type_by_name("Acetyl"),
            ..ctx
        };
        out.clear();
        extend_anchor(&required, &view, &t, anchor, &query, &mut stats, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_ambiguous_flank_site_follows_the_spectrum() {
        let catalog = catalog_with_phospho();
        let decorations = catalog.build_decorations(2, 2).unwrap();
        let ctx = ExtensionContext {
            catalog: &catalog,
            decorations: &decorations,
            parent_tolerance: 50,
            budget: 2,
            max_per_type: 2,
            mandatory_type: None,
        };
        let table = catalog.residues();
        let db = b"KTTWHEELK*";
        let view = DatabaseView::from_slice(db);
        let hee = tag(
            b"HEE",
            table.sequence_mass(b"TTW").unwrap() + 7997,
            table.sequence_mass(b"LK").unwrap(),
        );
        let spectrum = spectrum(table.sequence_mass(b"TTWHEELK").unwrap() + 7997 + PARENT_MASS_BOOST);
        let anchor = Anchor {
            end: 7,
            record_index: 0,
        };
        let t = table.get(b'T').unwrap();
        let supported_second = Ladder(vec![t, 2 * t + 7997]);
        let supported_first = Ladder(vec![t + 7997]);
        for (scorer, expected) in [
            (&supported_second, "K.TT[Phospho]WHEELK.-"),
            (&supported_first, "K.T[Phospho]TWHEELK.-"),
        ] {
            let query = SpectrumQuery {
                spectrum: &spectrum,
                prm_scorer: scorer,
            };
            let mut stats = ExtensionStats::default();
            let mut out = Vec::new();
            extend_anchor(&ctx, &view, &hee, anchor, &query, &mut stats, &mut out).unwrap();
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].annotated(&catalog), expected);
            assert_eq!(out[0].db_offset, 1);
        }
    }
}
