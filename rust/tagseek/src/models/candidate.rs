use crate::catalog::{
    Catalog,
    ModIndex,
};
use crate::config::MAX_MOD_BUDGET;
use crate::models::mass::{
    Mass,
    PARENT_MASS_BOOST,
};
use arrayvec::ArrayVec;

/// Flanking residue reported when a match touches a record boundary.
pub const TERMINUS_MARKER: u8 = b'-';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModPlacement {
    /// Residue index within the matched string.
    pub position: u16,
    pub type_index: u16,
    pub modification: ModIndex,
}

/// A fully placed peptide found in the database.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMatch {
    pub residues: Vec<u8>,
    pub prefix_residue: u8,
    pub suffix_residue: u8,
    /// Sorted by position.
    pub mods: ArrayVec<ModPlacement, MAX_MOD_BUDGET>,
    pub parent_mass: Mass,
    pub score: f32,
    /// Database offset of the first matched residue.
    pub db_offset: u64,
    pub record_index: usize,
}

impl CandidateMatch {
    /// Residue plus modification masses, `None` if a residue is unknown.
    pub fn residue_mass(&self, catalog: &Catalog) -> Option<Mass> {
        let base = catalog.residues().sequence_mass(&self.residues)?;
        let mods: Mass = self
            .mods
            .iter()
            .map(|m| catalog.modification(m.modification).mass)
            .sum();
        Some(base + mods)
    }

    /// `[M+H]` implied by the residues and modifications.
    pub fn implied_parent_mass(&self, catalog: &Catalog) -> Option<Mass> {
        Some(self.residue_mass(catalog)? + PARENT_MASS_BOOST)
    }

    /// Prefix residue masses after each residue, modifications included.
    pub fn prefix_masses(&self, catalog: &Catalog) -> Vec<Mass> {
        let mut acc = 0;
        let mut mod_iter = self.mods.iter().peekable();
        self.residues
            .iter()
            .enumerate()
            .map(|(i, &r)| {
                acc += catalog.residues().get(r).unwrap_or(0);
                while let Some(m) = mod_iter.next_if(|m| m.position as usize == i) {
                    acc += catalog.modification(m.modification).mass;
                }
                acc
            })
            .collect()
    }

    /// Peptide in `X.PEP[name]TIDE.Y` notation.
    pub fn annotated(&self, catalog: &Catalog) -> String {
        let mut out = String::with_capacity(self.residues.len() + 16);
        out.push(self.prefix_residue as char);
        out.push('.');
        for (i, &r) in self.residues.iter().enumerate() {
            out.push(r as char);
            for m in self.mods.iter().filter(|m| m.position as usize == i) {
                out.push('[');
                out.push_str(&catalog.modification(m.modification).name);
                out.push(']');
            }
        }
        out.push('.');
        out.push(self.suffix_residue as char);
        out
    }

    /// Same residues and the same modification types at the same positions.
    pub fn same_peptide(&self, other: &CandidateMatch) -> bool {
        self.residues == other.residues
            && self.mods.len() == other.mods.len()
            && self
                .mods
                .iter()
                .zip(other.mods.iter())
                .all(|(a, b)| a.type_index == b.type_index && a.position == b.position)
    }
}
