//! Aho-Corasick automaton over tag residue strings.
//!
//! Nodes live in one arena and refer to each other by index. Residues are
//! canonicalized (I onto L, Q onto K) before any lookup, so aliased letters
//! share a single child slot.

use crate::models::mass::{
    Mass,
    STANDARD_RESIDUES,
    canonical_residue,
    residue_slot,
};
use crate::tags::Tag;
use std::collections::VecDeque;

pub const ROOT: u32 = 0;

#[derive(Debug, Clone)]
pub struct TrieNode {
    children: [Option<u32>; 26],
    /// Indices into the trie's tag arena.
    tags: Vec<u32>,
    failure: u32,
    /// Characters dropped when following the failure link.
    skip: u8,
    /// Nearest proper suffix node that carries tags.
    output: Option<u32>,
    depth: u8,
}

impl TrieNode {
    fn new(depth: u8) -> Self {
        Self {
            children: [None; 26],
            tags: Vec::new(),
            failure: ROOT,
            skip: depth,
            output: None,
            depth,
        }
    }

    pub fn tags(&self) -> &[u32] {
        &self.tags
    }

    pub fn depth(&self) -> usize {
        self.depth as usize
    }

    pub fn failure(&self) -> u32 {
        self.failure
    }

    pub fn skip(&self) -> usize {
        self.skip as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Added(u32),
    /// An equivalent tag from the same spectrum was already attached.
    Duplicate { kept: u32, replaced: bool },
}

/// Counters of one scan, used to bound the work per input byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub bytes: u64,
    /// Child moves plus failure-link moves.
    pub transitions: u64,
    pub hits: u64,
}

/// Canonical slot of a residue byte, `None` for separators and unknown residues.
#[inline]
fn scan_slot(byte: u8) -> Option<usize> {
    if STANDARD_RESIDUES.contains(&byte) {
        residue_slot(canonical_residue(byte))
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct TagTrie {
    nodes: Vec<TrieNode>,
    tags: Vec<Tag>,
    duplicate_tolerance: Mass,
    linked: bool,
}

impl TagTrie {
    pub fn new(duplicate_tolerance: Mass) -> Self {
        Self {
            nodes: vec![TrieNode::new(0)],
            tags: Vec::new(),
            duplicate_tolerance,
            linked: false,
        }
    }

    /// Drops every node and tag, keeping the allocations.
    pub fn clear(&mut self) {
        self.nodes.truncate(1);
        self.nodes[0] = TrieNode::new(0);
        self.tags.clear();
        self.linked = false;
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_tags(&self) -> usize {
        self.tags.len()
    }

    pub fn node(&self, index: u32) -> &TrieNode {
        &self.nodes[index as usize]
    }

    pub fn tag(&self, index: u32) -> &Tag {
        &self.tags[index as usize]
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Same node, same spectrum and flanking masses within tolerance. Tags that
    /// differ only in where a modification sits inside the tag are merged.
    fn is_duplicate(&self, a: &Tag, b: &Tag) -> bool {
        a.spectrum == b.spectrum
            && (a.prefix_mass - b.prefix_mass).abs() <= self.duplicate_tolerance
            && (a.suffix_mass - b.suffix_mass).abs() <= self.duplicate_tolerance
    }

    /// Attaches a tag to the node spelling its residues, creating nodes as needed.
    pub fn insert(&mut self, tag: Tag) -> InsertOutcome {
        let mut current = ROOT;
        for &residue in tag.residues.iter() {
            let Some(slot) = scan_slot(residue) else {
                continue;
            };
            current = match self.nodes[current as usize].children[slot] {
                Some(child) => child,
                None => {
                    let depth = self.nodes[current as usize].depth + 1;
                    let child = self.nodes.len() as u32;
                    self.nodes.push(TrieNode::new(depth));
                    self.nodes[current as usize].children[slot] = Some(child);
                    self.linked = false;
                    child
                }
            };
        }

        let existing = self.nodes[current as usize]
            .tags
            .iter()
            .copied()
            .find(|&t| self.is_duplicate(&self.tags[t as usize], &tag));
        if let Some(kept) = existing {
            let stored = &mut self.tags[kept as usize];
            let replaced = tag.score > stored.score;
            if replaced {
                stored.score = tag.score;
                stored.prefix_mass = tag.prefix_mass;
                stored.suffix_mass = tag.suffix_mass;
                stored.mods = tag.mods;
            }
            return InsertOutcome::Duplicate { kept, replaced };
        }

        let index = self.tags.len() as u32;
        self.tags.push(tag);
        self.nodes[current as usize].tags.push(index);
        self.linked = false;
        InsertOutcome::Added(index)
    }

    /// Computes failure and output links breadth first.
    pub fn build_failure_links(&mut self) {
        let mut queue = VecDeque::new();
        for slot in 0..26 {
            if let Some(child) = self.nodes[ROOT as usize].children[slot] {
                let node = &mut self.nodes[child as usize];
                node.failure = ROOT;
                node.skip = node.depth;
                node.output = None;
                queue.push_back(child);
            }
        }

        while let Some(parent) = queue.pop_front() {
            for slot in 0..26 {
                let Some(child) = self.nodes[parent as usize].children[slot] else {
                    continue;
                };
                let mut fallback = self.nodes[parent as usize].failure;
                let failure = loop {
                    if let Some(next) = self.nodes[fallback as usize].children[slot] {
                        break next;
                    }
                    if fallback == ROOT {
                        break ROOT;
                    }
                    fallback = self.nodes[fallback as usize].failure;
                };
                let target = &self.nodes[failure as usize];
                let output = if target.tags.is_empty() {
                    target.output
                } else {
                    Some(failure)
                };
                let target_depth = target.depth;
                let node = &mut self.nodes[child as usize];
                node.failure = failure;
                node.skip = node.depth - target_depth;
                node.output = output;
                queue.push_back(child);
            }
        }
        self.linked = true;
    }

    /// Advances the automaton by one database byte.
    #[inline]
    pub fn step(&self, state: u32, byte: u8, stats: &mut ScanStats) -> u32 {
        stats.bytes += 1;
        let Some(slot) = scan_slot(byte) else {
            return ROOT;
        };
        let mut state = state;
        loop {
            stats.transitions += 1;
            if let Some(next) = self.nodes[state as usize].children[slot] {
                return next;
            }
            if state == ROOT {
                return ROOT;
            }
            state = self.nodes[state as usize].failure;
        }
    }

    /// Nodes carrying tags whose strings end at the current position.
    pub fn matches_at(&self, state: u32) -> impl Iterator<Item = u32> + '_ {
        let first = if self.nodes[state as usize].tags.is_empty() {
            self.nodes[state as usize].output
        } else {
            Some(state)
        };
        std::iter::successors(first, move |&n| self.nodes[n as usize].output)
    }

    /// Scans an in-memory text, calling `on_hit(end, tag_index)` for every tag
    /// occurrence ending just before byte offset `end`.
    pub fn scan(&self, text: &[u8], mut on_hit: impl FnMut(usize, u32)) -> ScanStats {
        debug_assert!(self.linked);
        let mut stats = ScanStats::default();
        let mut state = ROOT;
        for (pos, &byte) in text.iter().enumerate() {
            state = self.step(state, byte, &mut stats);
            for node in self.matches_at(state) {
                for &tag in &self.nodes[node as usize].tags {
                    stats.hits += 1;
                    on_hit(pos + 1, tag);
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrayvec::ArrayVec;

    fn tag(residues: &[u8], spectrum: u32, prefix: Mass, score: f32) -> Tag {
        Tag {
            spectrum,
            prefix_mass: prefix,
            suffix_mass: 1000,
            residues: residues.iter().copied().collect::<ArrayVec<_, 6>>(),
            mods: ArrayVec::new(),
            score,
        }
    }

    #[test]
    fn test_duplicates_keep_best() {
        let mut trie = TagTrie::new(50);
        assert_eq!(trie.insert(tag(b"SAL", 0, 100, 1.0)), InsertOutcome::Added(0));
        // Same spectrum, I folds onto L, masses within tolerance
        assert_eq!(
            trie.insert(tag(b"SAI", 0, 120, 3.0)),
            InsertOutcome::Duplicate {
                kept: 0,
                replaced: true
            }
        );
        assert_eq!(trie.tag(0).score, 3.0);
        assert_eq!(trie.tag(0).prefix_mass, 120);
        assert_eq!(
            trie.insert(tag(b"SAL", 0, 100, 0.5)),
            InsertOutcome::Duplicate {
                kept: 0,
                replaced: false
            }
        );
        // Other spectrum is never a duplicate
        assert_eq!(trie.insert(tag(b"SAL", 1, 100, 0.5)), InsertOutcome::Added(1));
        assert_eq!(trie.insert(tag(b"SAL", 0, 500, 0.5)), InsertOutcome::Added(2));
        assert_eq!(trie.num_nodes(), 4);
    }

    #[test]
    fn test_modification_sites_merge() {
        let mut trie = TagTrie::new(50);
        let mut first = tag(b"STS", 0, 100, 1.0);
        first.mods.push((0, 0));
        let mut second = tag(b"STS", 0, 100, 2.0);
        second.mods.push((0, 2));
        assert_eq!(trie.insert(first), InsertOutcome::Added(0));
        assert_eq!(
            trie.insert(second),
            InsertOutcome::Duplicate {
                kept: 0,
                replaced: true
            }
        );
        assert_eq!(trie.num_tags(), 1);
        assert_eq!(trie.tag(0).mods.as_slice(), &[(0, 2)]);
    }

    #[test]
    fn test_failure_links() {
        let mut trie = TagTrie::new(0);
        trie.insert(tag(b"ASK", 0, 0, 0.0));
        trie.insert(tag(b"SK", 0, 0, 0.0));
        trie.build_failure_links();
        // "AS" fails to "S", dropping one character
        let a = trie.node(ROOT).children[residue_slot(b'A').unwrap()].unwrap();
        let as_node = trie.node(a).children[residue_slot(b'S').unwrap()].unwrap();
        let s = trie.node(ROOT).children[residue_slot(b'S').unwrap()].unwrap();
        assert_eq!(trie.node(as_node).failure(), s);
        assert_eq!(trie.node(as_node).skip(), 1);
        let ask = trie.node(as_node).children[residue_slot(b'K').unwrap()].unwrap();
        let sk = trie.node(s).children[residue_slot(b'K').unwrap()].unwrap();
        assert_eq!(trie.node(ask).output, Some(sk));
    }

    #[test]
    fn test_scan_reports_nested_matches() {
        let mut trie = TagTrie::new(0);
        trie.insert(tag(b"ASK", 0, 0, 0.0));
        trie.insert(tag(b"SK", 0, 0, 0.0));
        trie.insert(tag(b"KL", 0, 0, 0.0));
        trie.build_failure_links();
        let mut hits = Vec::new();
        let stats = trie.scan(b"GASQI*ASK", |end, t| hits.push((end, t)));
        // Q aliases K and I aliases L
        assert_eq!(hits, vec![(4, 0), (4, 1), (5, 2), (9, 0), (9, 1)]);
        assert_eq!(stats.bytes, 9);
        assert_eq!(stats.hits, 5);
    }
}
