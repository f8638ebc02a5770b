//! Fixed-point masses and the residue mass table.
//!
//! Every mass handled by the engine is an integer number of hundredths of a
//! dalton. Keeping the arithmetic integral makes bucketing, tolerance checks and
//! table lookups exact and reproducible.

use serde::{
    Deserialize,
    Serialize,
};

/// Mass in hundredths of a dalton.
pub type Mass = i32;

/// Number of [`Mass`] units per dalton.
pub const MASS_SCALE: i32 = 100;

pub const PROTON_MASS: Mass = 101;
pub const WATER_MASS: Mass = 1801;

/// Difference between a singly protonated precursor mass and its summed residue mass.
pub const PARENT_MASS_BOOST: Mass = WATER_MASS + PROTON_MASS;

/// Lightest residue, anything between zero and this cannot be a real PRM.
pub const GLYCINE_MASS: Mass = 5702;

/// Converts daltons to fixed-point units, rounding to the nearest unit.
///
/// ```
/// use tagseek::models::mass::{mass_from_daltons, mass_to_daltons};
///
/// assert_eq!(mass_from_daltons(79.96633), 7997);
/// assert_eq!(mass_from_daltons(-17.02655), -1703);
/// assert!((mass_to_daltons(7997) - 79.97).abs() < 1e-9);
/// ```
pub fn mass_from_daltons(daltons: f64) -> Mass {
    (daltons * MASS_SCALE as f64).round() as Mass
}

pub fn mass_to_daltons(mass: Mass) -> f64 {
    mass as f64 / MASS_SCALE as f64
}

/// Residue letters the engine understands, in table order.
pub const STANDARD_RESIDUES: &[u8; 20] = b"ACDEFGHIKLMNPQRSTVWY";

/// Maps an uppercase residue letter to its slot in 26-wide tables.
#[inline]
pub fn residue_slot(residue: u8) -> Option<usize> {
    if residue.is_ascii_uppercase() {
        Some((residue - b'A') as usize)
    } else {
        None
    }
}

/// Collapses residues that are indistinguishable at search resolution
/// (I onto L, Q onto K).
///
/// ```
/// use tagseek::models::mass::canonical_residue;
///
/// assert_eq!(canonical_residue(b'I'), b'L');
/// assert_eq!(canonical_residue(b'Q'), b'K');
/// assert_eq!(canonical_residue(b'S'), b'S');
/// ```
#[inline]
pub fn canonical_residue(residue: u8) -> u8 {
    match residue {
        b'I' => b'L',
        b'Q' => b'K',
        other => other,
    }
}

/// Monoisotopic residue masses, indexed by `letter - b'A'`.
///
/// Letters without a standard residue (B, J, O, U, X, Z) hold zero and are
/// treated as unknown residues by every consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidueMassTable {
    masses: [Mass; 26],
}

impl Default for ResidueMassTable {
    fn default() -> Self {
        let mut masses = [0; 26];
        let standard: [(u8, Mass); 20] = [
            (b'G', 5702),
            (b'A', 7104),
            (b'S', 8703),
            (b'P', 9705),
            (b'V', 9907),
            (b'T', 10105),
            (b'C', 10301),
            (b'L', 11308),
            (b'I', 11308),
            (b'N', 11404),
            (b'D', 11503),
            (b'Q', 12806),
            (b'K', 12809),
            (b'E', 12904),
            (b'M', 13104),
            (b'H', 13706),
            (b'F', 14707),
            (b'R', 15610),
            (b'Y', 16306),
            (b'W', 18608),
        ];
        for (residue, mass) in standard {
            masses[(residue - b'A') as usize] = mass;
        }
        Self { masses }
    }
}

impl ResidueMassTable {
    /// Mass of a residue letter, `None` for anything that is not a known residue.
    #[inline]
    pub fn get(&self, residue: u8) -> Option<Mass> {
        let slot = residue_slot(residue)?;
        match self.masses[slot] {
            0 => None,
            mass => Some(mass),
        }
    }

    #[inline]
    pub fn is_known(&self, residue: u8) -> bool {
        self.get(residue).is_some()
    }

    /// Permanently shifts a residue's mass, used for fixed modifications.
    ///
    /// Returns `false` when the residue is not part of the table.
    pub fn apply_fixed_modification(&mut self, residue: u8, delta: Mass) -> bool {
        match residue_slot(residue) {
            Some(slot) if self.masses[slot] != 0 => {
                self.masses[slot] += delta;
                true
            }
            _ => false,
        }
    }

    /// Sums the residue masses of a sequence, `None` if any residue is unknown.
    pub fn sequence_mass(&self, residues: &[u8]) -> Option<Mass> {
        residues
            .iter()
            .try_fold(0, |acc, &residue| Some(acc + self.get(residue)?))
    }

    pub fn max_mass(&self) -> Mass {
        self.masses.iter().copied().max().unwrap_or(0)
    }

    pub fn min_mass(&self) -> Mass {
        self.masses
            .iter()
            .copied()
            .filter(|&m| m > 0)
            .min()
            .unwrap_or(GLYCINE_MASS)
    }
}
