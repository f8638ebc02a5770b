use super::mass::{
    Mass,
    PARENT_MASS_BOOST,
    mass_from_daltons,
};
use crate::scoring::PrmScorer;
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub mass: Mass,
    pub intensity: f32,
    /// 1 for the most intense peak of the spectrum.
    pub rank: u32,
}

/// A preprocessed spectrum as handed over by the spectrum subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub id: String,
    /// Sorted by ascending mass.
    pub peaks: Vec<Peak>,
    /// Singly protonated precursor mass, `[M+H]`.
    pub parent_mass: Mass,
    pub charge: u8,
}

impl Spectrum {
    /// Builds a spectrum from `(mass_da, intensity)` pairs, deriving intensity ranks.
    pub fn from_daltons(
        id: impl Into<String>,
        peaks: &[(f64, f32)],
        parent_mass_da: f64,
        charge: u8,
    ) -> Self {
        let mut order: Vec<usize> = (0..peaks.len()).collect();
        order.sort_by(|&a, &b| peaks[b].1.total_cmp(&peaks[a].1).then(a.cmp(&b)));
        let mut ranks = vec![0u32; peaks.len()];
        for (rank, &idx) in order.iter().enumerate() {
            ranks[idx] = rank as u32 + 1;
        }

        let mut out: Vec<Peak> = peaks
            .iter()
            .zip(ranks)
            .map(|(&(mass, intensity), rank)| Peak {
                mass: mass_from_daltons(mass),
                intensity,
                rank,
            })
            .collect();
        out.sort_by_key(|p| p.mass);

        Self {
            id: id.into(),
            peaks: out,
            parent_mass: mass_from_daltons(parent_mass_da),
            charge,
        }
    }

    /// Summed residue mass of the peptide this spectrum was taken from.
    pub fn residue_mass(&self) -> Mass {
        self.parent_mass - PARENT_MASS_BOOST
    }
}

/// Everything the search needs to know about one spectrum.
#[derive(Clone, Copy)]
pub struct SpectrumQuery<'a> {
    pub spectrum: &'a Spectrum,
    pub prm_scorer: &'a dyn PrmScorer,
}

impl std::fmt::Debug for SpectrumQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumQuery")
            .field("spectrum", &self.spectrum.id)
            .finish()
    }
}
