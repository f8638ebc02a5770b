//! Residue masses, known modifications and the decoration lattice.
//!
//! The catalog is built once per search run and shared read-only afterwards.

mod binary;
mod decoration;

pub use binary::{
    ModificationRecord,
    read_modification_records,
    write_modification_records,
};
pub use decoration::{
    Decoration,
    DecorationSet,
    MAX_DECORATIONS,
    ModCounts,
};

use crate::config::{
    FixedModificationSpec,
    ModificationSpec,
    Terminal,
};
use crate::errors::ConfigError;
use crate::models::mass::{
    MASS_SCALE,
    Mass,
    ResidueMassTable,
    STANDARD_RESIDUES,
    mass_from_daltons,
    residue_slot,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    info,
};

pub type ModIndex = usize;

/// Most distinct modification types a catalog may hold.
pub const MAX_MODIFICATION_TYPES: usize = 512;

/// Longest modification name, matching the fixed-width field of the binary format.
pub const MAX_MODIFICATION_NAME: usize = 20;

pub const BLIND_MODIFICATION_SCORE: f32 = -2.0;

/// Set of residue letters stored as a bitmask over `A..=Z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResidueSet(u32);

impl ResidueSet {
    pub const ALL: ResidueSet = ResidueSet((1 << 26) - 1);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn single(residue: u8) -> Self {
        let mut out = Self::empty();
        out.insert(residue);
        out
    }

    /// Parses residue letters; `*` means every residue.
    pub fn from_letters(letters: &str) -> Result<Self, String> {
        let mut out = Self::empty();
        for c in letters.bytes() {
            if c == b'*' {
                return Ok(Self::ALL);
            }
            let upper = c.to_ascii_uppercase();
            if residue_slot(upper).is_none() {
                return Err(format!("'{}' is not a residue letter", c as char));
            }
            out.insert(upper);
        }
        if out.is_empty() {
            return Err("no residues given".to_string());
        }
        Ok(out)
    }

    pub fn insert(&mut self, residue: u8) {
        if let Some(slot) = residue_slot(residue) {
            self.0 |= 1 << slot;
        }
    }

    #[inline]
    pub fn contains(&self, residue: u8) -> bool {
        match residue_slot(residue) {
            Some(slot) => self.0 & (1 << slot) != 0,
            None => false,
        }
    }

    pub fn union(&self, other: &ResidueSet) -> ResidueSet {
        ResidueSet(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn letters(&self) -> impl Iterator<Item = u8> + '_ {
        (b'A'..=b'Z').filter(|&r| self.contains(r))
    }
}

/// A mass delta that may attach to a set of residues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub name: String,
    pub mass: Mass,
    pub score: f32,
    pub residues: ResidueSet,
    pub terminal: Terminal,
    /// Chemically identical modifications (same name, mass and terminal rule) share a type.
    pub type_index: usize,
}

impl Modification {
    #[inline]
    pub fn applies_to(&self, residue: u8) -> bool {
        self.residues.contains(residue)
    }

    /// Like [`Modification::applies_to`] for a canonical letter, also accepting
    /// the residues folded onto it.
    pub fn applies_to_canonical(&self, residue: u8) -> bool {
        self.applies_to(residue)
            || match residue {
                b'L' => self.applies_to(b'I'),
                b'K' => self.applies_to(b'Q'),
                _ => false,
            }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationType {
    pub name: String,
    pub mass: Mass,
    pub terminal: Terminal,
    pub residues: ResidueSet,
    pub members: Vec<ModIndex>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    residues: ResidueMassTable,
    modifications: Vec<Modification>,
    types: Vec<ModificationType>,
}

impl Catalog {
    pub fn new(residues: ResidueMassTable) -> Self {
        Self {
            residues,
            modifications: Vec::new(),
            types: Vec::new(),
        }
    }

    /// Builds a catalog from the fixed and variable modifications of a configuration.
    pub fn from_specs(
        fixed: &[FixedModificationSpec],
        variable: &[ModificationSpec],
    ) -> Result<Self, ConfigError> {
        let mut residues = ResidueMassTable::default();
        for spec in fixed {
            let letter = spec.residue.to_ascii_uppercase() as u8;
            if !residues.apply_fixed_modification(letter, mass_from_daltons(spec.mass_da)) {
                return Err(ConfigError::InvalidModification {
                    name: format!("fixed {}", spec.residue),
                    context: "not a standard residue".to_string(),
                });
            }
        }
        let mut catalog = Catalog::new(residues);
        for spec in variable {
            let residue_set = ResidueSet::from_letters(&spec.residues).map_err(|context| {
                ConfigError::InvalidModification {
                    name: spec.name.clone(),
                    context,
                }
            })?;
            catalog.add_modification(
                &spec.name,
                mass_from_daltons(spec.mass_da),
                spec.score,
                residue_set,
                spec.terminal,
            )?;
        }
        Ok(catalog)
    }

    pub fn residues(&self) -> &ResidueMassTable {
        &self.residues
    }

    pub fn modifications(&self) -> &[Modification] {
        &self.modifications
    }

    pub fn modification(&self, index: ModIndex) -> &Modification {
        &self.modifications[index]
    }

    pub fn types(&self) -> &[ModificationType] {
        &self.types
    }

    pub fn num_types(&self) -> usize {
        self.types.len()
    }

    pub fn type_by_name(&self, name: &str) -> Option<usize> {
        self.types.iter().position(|t| t.name == name)
    }

    /// Adds a modification, grouping it with an existing type when name, mass and
    /// terminal rule agree. Records of the same type and score share one entry.
    pub fn add_modification(
        &mut self,
        name: &str,
        mass: Mass,
        score: f32,
        residues: ResidueSet,
        terminal: Terminal,
    ) -> Result<ModIndex, ConfigError> {
        if name.is_empty() || name.len() > MAX_MODIFICATION_NAME {
            return Err(ConfigError::InvalidModification {
                name: name.to_string(),
                context: format!("name must be 1..={} bytes", MAX_MODIFICATION_NAME),
            });
        }
        if mass == 0 {
            return Err(ConfigError::InvalidModification {
                name: name.to_string(),
                context: "mass delta must be non-zero".to_string(),
            });
        }
        if residues.is_empty() {
            return Err(ConfigError::InvalidModification {
                name: name.to_string(),
                context: "no residues given".to_string(),
            });
        }

        let type_index = match self
            .types
            .iter()
            .position(|t| t.name == name && t.mass == mass && t.terminal == terminal)
        {
            Some(idx) => idx,
            None => {
                if self.types.len() >= MAX_MODIFICATION_TYPES {
                    return Err(ConfigError::CatalogOverflow {
                        max_types: MAX_MODIFICATION_TYPES,
                    });
                }
                self.types.push(ModificationType {
                    name: name.to_string(),
                    mass,
                    terminal,
                    residues: ResidueSet::empty(),
                    members: Vec::new(),
                });
                self.types.len() - 1
            }
        };

        let mod_type = &mut self.types[type_index];
        mod_type.residues = mod_type.residues.union(&residues);
        if let Some(&existing) = mod_type
            .members
            .iter()
            .find(|&&m| self.modifications[m].score == score)
        {
            let modification = &mut self.modifications[existing];
            modification.residues = modification.residues.union(&residues);
            return Ok(existing);
        }

        let index = self.modifications.len();
        mod_type.members.push(index);
        self.modifications.push(Modification {
            name: name.to_string(),
            mass,
            score,
            residues,
            terminal,
            type_index,
        });
        Ok(index)
    }

    /// Adds the records of a binary modification file.
    pub fn add_records(&mut self, records: &[ModificationRecord]) -> Result<usize, ConfigError> {
        let mut added = 0;
        for record in records {
            self.add_modification(
                &record.name,
                record.mass,
                record.score,
                record.residues,
                record.terminal,
            )?;
            added += 1;
        }
        Ok(added)
    }

    /// Synthesizes one modification per residue for every whole-dalton offset in
    /// `window` that no catalogued modification already covers.
    pub fn add_blind_modifications(&mut self, window: (Mass, Mass)) -> Result<usize, ConfigError> {
        let (low, high) = window;
        let first = (low as f64 / MASS_SCALE as f64).ceil() as i32;
        let last = (high as f64 / MASS_SCALE as f64).floor() as i32;
        let half_dalton = MASS_SCALE / 2;
        let mut added = 0;

        for dalton in first..=last {
            if dalton == 0 {
                continue;
            }
            let delta = dalton * MASS_SCALE;
            let name = format!("{:+}", dalton);
            for &residue in STANDARD_RESIDUES {
                let Some(residue_mass) = self.residues.get(residue) else {
                    continue;
                };
                if residue_mass + delta <= 0 {
                    continue;
                }
                let covered = self.modifications.iter().any(|m| {
                    m.terminal == Terminal::Anywhere
                        && m.name != name
                        && m.applies_to(residue)
                        && (m.mass - delta).abs() <= half_dalton
                });
                if covered {
                    continue;
                }
                self.add_modification(
                    &name,
                    delta,
                    BLIND_MODIFICATION_SCORE,
                    ResidueSet::single(residue),
                    Terminal::Anywhere,
                )?;
                added += 1;
            }
        }
        info!(
            "Added {} blind modifications over {} types in [{}, {}] Da",
            added,
            self.types.len(),
            first,
            last
        );
        Ok(added)
    }

    /// Recursively expands every legal combination of modification types up to
    /// `budget` uses, then sorts the result by mass.
    pub fn build_decorations(
        &self,
        budget: usize,
        max_per_type: usize,
    ) -> Result<DecorationSet, ConfigError> {
        let out = DecorationSet::build(&self.types, budget, max_per_type)?;
        debug!(
            "Built {} decorations over {} modification types (budget {})",
            out.len(),
            self.types.len(),
            budget
        );
        Ok(out)
    }

    /// The member of a type that may attach to `residue`, if any.
    pub fn member_for_residue(&self, type_index: usize, residue: u8) -> Option<ModIndex> {
        self.types[type_index]
            .members
            .iter()
            .copied()
            .find(|&m| self.modifications[m].applies_to(residue))
    }

    /// Terminal modifications, used for decorated graph endpoints.
    pub fn terminal_modifications(
        &self,
        terminal: Terminal,
    ) -> impl Iterator<Item = (ModIndex, &Modification)> + '_ {
        self.modifications
            .iter()
            .enumerate()
            .filter(move |(_, m)| m.terminal == terminal)
    }
}
