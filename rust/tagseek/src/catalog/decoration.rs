use super::ModificationType;
use crate::config::{
    MAX_MOD_BUDGET,
    Terminal,
};
use crate::errors::ConfigError;
use crate::models::mass::Mass;
use arrayvec::ArrayVec;
use std::collections::HashMap;
use std::ops::Range;

/// Hard cap on the size of the decoration lattice.
pub const MAX_DECORATIONS: usize = 1 << 20;

/// Above this many decorations the sub-decoration relation is computed on demand
/// instead of being stored as an n x n bit matrix.
const SUB_MATRIX_LIMIT: usize = 4096;

/// Sparse per-type usage counts, sorted by type index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModCounts(ArrayVec<(u16, u8), MAX_MOD_BUDGET>);

impl ModCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, type_index: usize) -> u8 {
        self.0
            .iter()
            .find(|(t, _)| *t as usize == type_index)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.iter().map(|(_, c)| *c as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.0.iter().map(|(t, c)| (*t as usize, *c))
    }

    pub fn contains_type(&self, type_index: usize) -> bool {
        self.get(type_index) > 0
    }

    /// Adds `count` uses of a type. Returns `false` if the counts are full.
    pub fn add(&mut self, type_index: usize, count: u8) -> bool {
        if count == 0 {
            return true;
        }
        match self.0.binary_search_by_key(&(type_index as u16), |(t, _)| *t) {
            Ok(pos) => {
                self.0[pos].1 += count;
                true
            }
            Err(pos) => self.0.try_insert(pos, (type_index as u16, count)).is_ok(),
        }
    }

    /// Whether every per-type count of `self` is at most the one in `other`.
    pub fn is_sub_of(&self, other: &ModCounts) -> bool {
        self.0.iter().all(|(t, c)| other.get(*t as usize) >= *c)
    }

    /// Sums two count vectors, `None` if the result breaks the per-type limit or the budget.
    ///
    /// ```
    /// use tagseek::catalog::ModCounts;
    ///
    /// let mut a = ModCounts::new();
    /// a.add(0, 1);
    /// let mut b = ModCounts::new();
    /// b.add(0, 1);
    /// b.add(3, 1);
    /// assert_eq!(a.merged(&b, 2, 3).unwrap().total(), 3);
    /// assert!(a.merged(&b, 1, 3).is_none());
    /// assert!(a.merged(&b, 2, 2).is_none());
    /// ```
    pub fn merged(&self, other: &ModCounts, max_per_type: usize, budget: usize) -> Option<ModCounts> {
        if self.total() + other.total() > budget {
            return None;
        }
        let mut out = self.clone();
        for (t, c) in other.iter() {
            if !out.add(t, c) || out.get(t) as usize > max_per_type {
                return None;
            }
        }
        Some(out)
    }
}

/// One combination of modification types with its cached mass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoration {
    pub mass: Mass,
    pub counts: ModCounts,
    pub has_n_term: bool,
    pub has_c_term: bool,
}

impl Decoration {
    pub fn total(&self) -> usize {
        self.counts.total()
    }
}

/// Every decoration reachable under the budget, sorted by ascending mass.
#[derive(Debug, Clone)]
pub struct DecorationSet {
    decorations: Vec<Decoration>,
    by_counts: HashMap<ModCounts, usize>,
    sub_matrix: Option<Vec<u64>>,
    empty_index: usize,
}

impl DecorationSet {
    pub fn build(
        types: &[ModificationType],
        budget: usize,
        max_per_type: usize,
    ) -> Result<Self, ConfigError> {
        let budget = budget.min(MAX_MOD_BUDGET);
        let mut decorations = vec![Decoration {
            mass: 0,
            counts: ModCounts::new(),
            has_n_term: false,
            has_c_term: false,
        }];

        // Expand one type at a time: every existing decoration may take 0..=limit copies.
        for (type_index, mod_type) in types.iter().enumerate() {
            let limit = match mod_type.terminal {
                Terminal::Anywhere => max_per_type,
                _ => max_per_type.min(1),
            };
            let existing = decorations.len();
            for base in 0..existing {
                for copies in 1..=limit {
                    let parent = &decorations[base];
                    if parent.total() + copies > budget {
                        break;
                    }
                    if (mod_type.terminal == Terminal::NTerm && parent.has_n_term)
                        || (mod_type.terminal == Terminal::CTerm && parent.has_c_term)
                    {
                        break;
                    }
                    let mut counts = parent.counts.clone();
                    if !counts.add(type_index, copies as u8) {
                        break;
                    }
                    let next = Decoration {
                        mass: parent.mass + mod_type.mass * copies as Mass,
                        counts,
                        has_n_term: parent.has_n_term || mod_type.terminal == Terminal::NTerm,
                        has_c_term: parent.has_c_term || mod_type.terminal == Terminal::CTerm,
                    };
                    decorations.push(next);
                    if decorations.len() > MAX_DECORATIONS {
                        return Err(ConfigError::DecorationOverflow {
                            max_decorations: MAX_DECORATIONS,
                        });
                    }
                }
            }
        }

        decorations.sort_by(|a, b| {
            a.mass
                .cmp(&b.mass)
                .then_with(|| a.total().cmp(&b.total()))
                .then_with(|| a.counts.cmp(&b.counts))
        });

        let by_counts: HashMap<ModCounts, usize> = decorations
            .iter()
            .enumerate()
            .map(|(i, d)| (d.counts.clone(), i))
            .collect();
        let empty_index = by_counts[&ModCounts::new()];

        let sub_matrix = if decorations.len() <= SUB_MATRIX_LIMIT {
            let n = decorations.len();
            let words = n.div_ceil(64);
            let mut bits = vec![0u64; n * words];
            for (a, da) in decorations.iter().enumerate() {
                for (b, db) in decorations.iter().enumerate() {
                    if da.counts.is_sub_of(&db.counts) {
                        bits[a * words + b / 64] |= 1 << (b % 64);
                    }
                }
            }
            Some(bits)
        } else {
            None
        };

        Ok(Self {
            decorations,
            by_counts,
            sub_matrix,
            empty_index,
        })
    }

    pub fn len(&self) -> usize {
        self.decorations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decorations.is_empty()
    }

    pub fn get(&self, index: usize) -> &Decoration {
        &self.decorations[index]
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Decoration> + '_ {
        self.decorations.iter()
    }

    pub fn empty_index(&self) -> usize {
        self.empty_index
    }

    pub fn index_of(&self, counts: &ModCounts) -> Option<usize> {
        self.by_counts.get(counts).copied()
    }

    /// Whether decoration `a` uses no type more often than decoration `b`.
    pub fn is_sub_decoration(&self, a: usize, b: usize) -> bool {
        match &self.sub_matrix {
            Some(bits) => {
                let words = self.decorations.len().div_ceil(64);
                bits[a * words + b / 64] & (1 << (b % 64)) != 0
            }
            None => self.decorations[a]
                .counts
                .is_sub_of(&self.decorations[b].counts),
        }
    }

    /// Every sub-decoration of `full`, `full` included, fewest modifications first.
    pub fn sub_decorations(&self, full: usize) -> Vec<usize> {
        let mut lattice = vec![ModCounts::new()];
        for (type_index, count) in self.decorations[full].counts.iter() {
            let mut next = Vec::with_capacity(lattice.len() * (count as usize + 1));
            for base in &lattice {
                for copies in 0..=count {
                    let mut counts = base.clone();
                    counts.add(type_index, copies);
                    next.push(counts);
                }
            }
            lattice = next;
        }
        let mut out: Vec<usize> = lattice.iter().filter_map(|c| self.index_of(c)).collect();
        out.sort_by_key(|&i| (self.decorations[i].total(), i));
        out
    }

    /// Indices of decorations whose mass lies in `[low, high]`.
    pub fn mass_range(&self, low: Mass, high: Mass) -> Range<usize> {
        let start = self.decorations.partition_point(|d| d.mass < low);
        let end = self.decorations.partition_point(|d| d.mass <= high);
        start..end.max(start)
    }
}
