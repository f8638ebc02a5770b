//! Scoring collaborators: PRM support, candidate scores and skew penalties.

use crate::catalog::Catalog;
use crate::models::mass::{
    Mass,
    PROTON_MASS,
};
use crate::models::{
    CandidateMatch,
    Spectrum,
    SpectrumQuery,
};

/// Opaque per-mass evidence that a prefix residue mass is real.
pub trait PrmScorer {
    fn score(&self, prm: Mass) -> f32;
}

/// Final scoring of a fully placed candidate.
pub trait CandidateScorer: Sync {
    fn score(&self, candidate: &CandidateMatch, query: &SpectrumQuery<'_>, catalog: &Catalog) -> f32;
}

/// Score assigned to a PRM with no supporting peak.
pub const MISSING_PRM_SCORE: f32 = -0.5;

/// Rank-weighted b/y ion support.
///
/// A PRM is supported by a b-ion at `prm + proton` and by a y-ion at
/// `parent - prm`. Each direction contributes the weight of its best peak within
/// tolerance; weights fall from 2.0 for the most intense peak to 1.0 for the least.
#[derive(Debug, Clone)]
pub struct PeakPrmScorer {
    masses: Vec<Mass>,
    weights: Vec<f32>,
    parent_mass: Mass,
    tolerance: Mass,
}

impl PeakPrmScorer {
    pub fn new(spectrum: &Spectrum, tolerance: Mass) -> Self {
        let n = spectrum.peaks.len().max(1) as f32;
        let masses = spectrum.peaks.iter().map(|p| p.mass).collect();
        let weights = spectrum
            .peaks
            .iter()
            .map(|p| 2.0 - (p.rank.saturating_sub(1)) as f32 / n)
            .collect();
        Self {
            masses,
            weights,
            parent_mass: spectrum.parent_mass,
            tolerance,
        }
    }

    fn best_support(&self, mass: Mass) -> Option<f32> {
        let start = self.masses.partition_point(|&m| m < mass - self.tolerance);
        let end = self.masses.partition_point(|&m| m <= mass + self.tolerance);
        self.weights[start..end]
            .iter()
            .copied()
            .max_by(|a, b| a.total_cmp(b))
    }
}

impl PrmScorer for PeakPrmScorer {
    fn score(&self, prm: Mass) -> f32 {
        let b = self.best_support(prm + PROTON_MASS);
        let y = self.best_support(self.parent_mass - prm);
        match (b, y) {
            (None, None) => MISSING_PRM_SCORE,
            (b, y) => b.unwrap_or(0.0) + y.unwrap_or(0.0),
        }
    }
}

/// Sums PRM support along the candidate's prefix ladder plus its modification scores.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrmLadderScorer;

impl CandidateScorer for PrmLadderScorer {
    fn score(&self, candidate: &CandidateMatch, query: &SpectrumQuery<'_>, catalog: &Catalog) -> f32 {
        let ladder = candidate.prefix_masses(catalog);
        let interior = ladder.len().saturating_sub(1);
        let prm_score: f32 = ladder[..interior]
            .iter()
            .map(|&prm| query.prm_scorer.score(prm))
            .sum();
        let mod_score: f32 = candidate
            .mods
            .iter()
            .map(|m| catalog.modification(m.modification).score)
            .sum();
        prm_score + mod_score
    }
}

/// Width of one skew bin, 0.1 Da.
pub const SKEW_BIN_WIDTH: Mass = 10;

/// Penalty tables keyed by accumulated mass deviation.
///
/// The signed and absolute skews are looked up independently, both clipped to
/// the last bin.
#[derive(Debug, Clone, PartialEq)]
pub struct SkewPenalty {
    signed: Vec<f32>,
    absolute: Vec<f32>,
}

impl Default for SkewPenalty {
    fn default() -> Self {
        Self {
            signed: (0..=10).map(|i| -0.1 * i as f32).collect(),
            absolute: (0..=10).map(|i| -0.05 * i as f32).collect(),
        }
    }
}

impl SkewPenalty {
    pub fn new(signed: Vec<f32>, absolute: Vec<f32>) -> Self {
        assert!(!signed.is_empty() && !absolute.is_empty());
        Self { signed, absolute }
    }

    fn lookup(table: &[f32], skew: Mass) -> f32 {
        let bin = (skew.unsigned_abs() / SKEW_BIN_WIDTH as u32) as usize;
        table[bin.min(table.len() - 1)]
    }

    /// Penalty for a path whose signed skews sum to `signed` and whose absolute
    /// skews sum to `absolute`.
    ///
    /// ```
    /// use tagseek::scoring::SkewPenalty;
    ///
    /// let skew = SkewPenalty::default();
    /// assert_eq!(skew.penalty(0, 0), 0.0);
    /// assert!(skew.penalty(25, 25) < skew.penalty(5, 5));
    /// assert_eq!(skew.penalty(10_000, 10_000), skew.penalty(500, 500));
    /// ```
    pub fn penalty(&self, signed: Mass, absolute: Mass) -> f32 {
        Self::lookup(&self.signed, signed) + Self::lookup(&self.absolute, absolute)
    }

    pub fn edge_penalty(&self, skew: Mass) -> f32 {
        self.penalty(skew, skew.abs())
    }
}
