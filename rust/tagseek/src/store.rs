use crate::models::CandidateMatch;
use crate::models::mass::Mass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Inserted,
    /// Same peptide already stored; its score was raised.
    Improved,
    /// Same peptide already stored with an equal or better score.
    Duplicate,
    /// Below the lowest stored score of a full store.
    Rejected,
}

/// Bounded, de-duplicated candidate list of one spectrum, best score first.
#[derive(Debug, Clone)]
pub struct MatchStore {
    entries: Vec<CandidateMatch>,
    capacity: usize,
    mass_tolerance: Mass,
}

impl MatchStore {
    pub fn new(capacity: usize, mass_tolerance: Mass) -> Self {
        Self {
            entries: Vec::with_capacity(capacity + 1),
            capacity,
            mass_tolerance,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Score a new candidate must beat once the store is full.
    pub fn cutoff(&self) -> Option<f32> {
        if self.entries.len() >= self.capacity {
            self.entries.last().map(|c| c.score)
        } else {
            None
        }
    }

    fn position_for(&self, score: f32) -> usize {
        self.entries.partition_point(|c| c.score >= score)
    }

    pub fn submit(&mut self, candidate: CandidateMatch) -> SubmitOutcome {
        let existing = self.entries.iter().position(|c| {
            c.same_peptide(&candidate)
                && (c.parent_mass - candidate.parent_mass).abs() <= self.mass_tolerance
        });
        if let Some(idx) = existing {
            if candidate.score <= self.entries[idx].score {
                return SubmitOutcome::Duplicate;
            }
            let mut entry = self.entries.remove(idx);
            entry.score = candidate.score;
            let pos = self.position_for(entry.score);
            self.entries.insert(pos, entry);
            return SubmitOutcome::Improved;
        }

        if self.capacity == 0 || self.cutoff().is_some_and(|c| candidate.score <= c) {
            return SubmitOutcome::Rejected;
        }
        let pos = self.position_for(candidate.score);
        self.entries.insert(pos, candidate);
        if self.entries.len() > self.capacity {
            self.entries.pop();
        }
        SubmitOutcome::Inserted
    }

    /// The `n` best candidates, without changing the store.
    pub fn top(&self, n: usize) -> &[CandidateMatch] {
        &self.entries[..n.min(self.entries.len())]
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateMatch> {
        self.entries.iter()
    }

    pub fn into_vec(self) -> Vec<CandidateMatch> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModPlacement;
    use arrayvec::ArrayVec;

    fn candidate(residues: &[u8], score: f32) -> CandidateMatch {
        CandidateMatch {
            residues: residues.to_vec(),
            prefix_residue: b'K',
            suffix_residue: b'-',
            mods: ArrayVec::new(),
            parent_mass: 100_000,
            score,
            db_offset: 0,
            record_index: 0,
        }
    }

    #[test]
    fn test_sorted_and_bounded() {
        let mut store = MatchStore::new(2, 50);
        assert_eq!(store.submit(candidate(b"AAA", 1.0)), SubmitOutcome::Inserted);
        assert_eq!(store.submit(candidate(b"CCC", 3.0)), SubmitOutcome::Inserted);
        assert_eq!(store.cutoff(), Some(1.0));
        assert_eq!(store.submit(candidate(b"DDD", 0.5)), SubmitOutcome::Rejected);
        assert_eq!(store.submit(candidate(b"EEE", 2.0)), SubmitOutcome::Inserted);
        let order: Vec<_> = store.iter().map(|c| c.residues.clone()).collect();
        assert_eq!(order, vec![b"CCC".to_vec(), b"EEE".to_vec()]);
        assert_eq!(store.top(1).len(), 1);
        assert_eq!(store.top(10).len(), 2);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut store = MatchStore::new(0, 50);
        assert_eq!(store.cutoff(), None);
        assert_eq!(store.submit(candidate(b"AAA", 1.0)), SubmitOutcome::Rejected);
        assert_eq!(store.submit(candidate(b"AAA", 5.0)), SubmitOutcome::Rejected);
        assert!(store.is_empty());
        assert!(store.top(3).is_empty());
    }

    #[test]
    fn test_duplicates_keep_max_score() {
        let mut store = MatchStore::new(5, 50);
        store.submit(candidate(b"SAMPLER", 1.0));
        assert_eq!(store.submit(candidate(b"SAMPLER", 4.0)), SubmitOutcome::Improved);
        assert_eq!(store.submit(candidate(b"SAMPLER", 2.0)), SubmitOutcome::Duplicate);
        assert_eq!(store.len(), 1);
        assert_eq!(store.top(1)[0].score, 4.0);
    }

    #[test]
    fn test_modification_position_distinguishes() {
        let mut store = MatchStore::new(5, 50);
        let mut a = candidate(b"STK", 1.0);
        a.mods.push(ModPlacement {
            position: 0,
            type_index: 0,
            modification: 0,
        });
        let mut b = a.clone();
        b.mods[0].position = 1;
        store.submit(a);
        assert_eq!(store.submit(b), SubmitOutcome::Inserted);
        assert_eq!(store.len(), 2);
    }
}
