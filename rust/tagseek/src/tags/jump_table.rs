use crate::catalog::{
    Catalog,
    ModIndex,
};
use crate::config::Terminal;
use crate::models::mass::{
    MASS_SCALE,
    Mass,
    STANDARD_RESIDUES,
    canonical_residue,
    residue_slot,
};

/// One residue step, optionally carrying a modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jump {
    pub mass: Mass,
    /// Canonical residue letter.
    pub residue: u8,
    pub modification: Option<ModIndex>,
}

/// Residue and residue+modification masses bucketed by whole dalton.
///
/// Built once per search session. Lookups scan the bucket of the rounded query
/// mass plus enough neighbours to cover rounding and the tolerance.
#[derive(Debug, Clone)]
pub struct JumpTable {
    jumps: Vec<Jump>,
    buckets: Vec<Vec<u32>>,
    slack: i32,
    tolerance: Mass,
    max_mass: Mass,
    /// Non-terminal modifications per actual (not canonical) residue: `(mod, delta)`.
    mods_by_residue: [Vec<(ModIndex, Mass)>; 26],
}

fn bucket_of(mass: Mass) -> i32 {
    (mass + MASS_SCALE / 2).div_euclid(MASS_SCALE)
}

impl JumpTable {
    /// `include_modifications` adds one jump per applicable non-terminal modification.
    pub fn new(catalog: &Catalog, include_modifications: bool, tolerance: Mass) -> Self {
        let mut jumps: Vec<Jump> = Vec::new();
        for &residue in STANDARD_RESIDUES {
            if canonical_residue(residue) != residue {
                continue;
            }
            if let Some(mass) = catalog.residues().get(residue) {
                jumps.push(Jump {
                    mass,
                    residue,
                    modification: None,
                });
            }
        }

        let mut mods_by_residue: [Vec<(ModIndex, Mass)>; 26] = Default::default();
        if include_modifications {
            for (mod_index, modification) in catalog.modifications().iter().enumerate() {
                if modification.terminal != Terminal::Anywhere {
                    continue;
                }
                for residue in modification.residues.letters() {
                    let Some(base) = catalog.residues().get(residue) else {
                        continue;
                    };
                    if base + modification.mass <= 0 {
                        continue;
                    }
                    if let Some(slot) = residue_slot(residue) {
                        mods_by_residue[slot].push((mod_index, modification.mass));
                    }
                    let jump = Jump {
                        mass: base + modification.mass,
                        residue: canonical_residue(residue),
                        modification: Some(mod_index),
                    };
                    if !jumps.contains(&jump) {
                        jumps.push(jump);
                    }
                }
            }
        }
        jumps.sort_by_key(|j| (j.mass, j.residue, j.modification));

        let max_mass = jumps.iter().map(|j| j.mass).max().unwrap_or(0);
        let mut buckets = vec![Vec::new(); bucket_of(max_mass).max(0) as usize + 1];
        for (i, jump) in jumps.iter().enumerate() {
            buckets[bucket_of(jump.mass) as usize].push(i as u32);
        }
        let slack = 1 + tolerance / MASS_SCALE;

        Self {
            jumps,
            buckets,
            slack,
            tolerance,
            max_mass,
            mods_by_residue,
        }
    }

    pub fn len(&self) -> usize {
        self.jumps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jumps.is_empty()
    }

    pub fn get(&self, index: u32) -> &Jump {
        &self.jumps[index as usize]
    }

    pub fn tolerance(&self) -> Mass {
        self.tolerance
    }

    /// Heaviest single jump.
    pub fn max_mass(&self) -> Mass {
        self.max_mass
    }

    /// Indices of the jumps within tolerance of `delta`.
    pub fn matches(&self, delta: Mass) -> impl Iterator<Item = u32> + '_ {
        let center = bucket_of(delta);
        let low = (center - self.slack).max(0);
        let high = (center + self.slack).min(self.buckets.len() as i32 - 1);
        (low..=high)
            .filter(move |_| delta > 0)
            .flat_map(move |b| self.buckets[b as usize].iter().copied())
            .filter(move |&j| (self.jumps[j as usize].mass - delta).abs() <= self.tolerance)
    }

    /// Non-terminal modifications that may attach to `residue`.
    pub fn modifications_for(&self, residue: u8) -> &[(ModIndex, Mass)] {
        match residue_slot(residue) {
            Some(slot) => &self.mods_by_residue[slot],
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResidueSet;

    #[test]
    fn test_plain_lookup() {
        let table = JumpTable::new(&Catalog::default(), false, 50);
        // I and Q fold onto L and K
        assert_eq!(table.len(), 18);
        let hits: Vec<_> = table.matches(11308 + 20).map(|j| table.get(j).residue).collect();
        assert_eq!(hits, vec![b'L']);
        // K (128.09) and the Q it stands for are both within tolerance of 128.06
        let hits: Vec<_> = table.matches(12806).map(|j| table.get(j).residue).collect();
        assert_eq!(hits, vec![b'K']);
        assert_eq!(table.matches(-5000).count(), 0);
        assert_eq!(table.matches(100_000).count(), 0);
    }

    #[test]
    fn test_modified_jumps() {
        let mut catalog = Catalog::default();
        catalog
            .add_modification("Phospho", 7997, -1.0, ResidueSet::from_letters("ST").unwrap(), Terminal::Anywhere)
            .unwrap();
        catalog
            .add_modification("Acetyl", 4201, -1.0, ResidueSet::ALL, Terminal::NTerm)
            .unwrap();
        let table = JumpTable::new(&catalog, true, 50);
        assert_eq!(table.len(), 20);
        let hit: Vec<_> = table.matches(8703 + 7997).map(|j| *table.get(j)).collect();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].residue, b'S');
        assert_eq!(hit[0].modification, Some(0));
        assert_eq!(table.modifications_for(b'T'), &[(0, 7997)]);
        assert!(table.modifications_for(b'A').is_empty());
    }
}
