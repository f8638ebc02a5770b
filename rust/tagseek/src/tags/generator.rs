use super::graph::{
    NodeKind,
    TagGraph,
};
use super::jump_table::JumpTable;
use crate::catalog::ModIndex;
use crate::config::MAX_TAG_LENGTH;
use crate::models::mass::Mass;
use crate::scoring::SkewPenalty;
use crate::utils::top_n::TopN;
use arrayvec::ArrayVec;
use std::cmp::Ordering;

/// Most modifications a single tag may carry.
pub const MAX_TAG_MODS: usize = 2;

/// A short scored sequence anchor with its expected flanking masses.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Index of the originating spectrum within its block.
    pub spectrum: u32,
    /// Residue mass expected before the first tag residue.
    pub prefix_mass: Mass,
    /// Residue mass expected after the last tag residue.
    pub suffix_mass: Mass,
    /// Canonical residue letters.
    pub residues: ArrayVec<u8, MAX_TAG_LENGTH>,
    /// `(modification, position)`, sorted by position.
    pub mods: ArrayVec<(ModIndex, u8), MAX_TAG_MODS>,
    pub score: f32,
}

/// One root-to-leaf path of the walk.
#[derive(Debug, Clone, PartialEq)]
pub struct TagPath {
    pub nodes: ArrayVec<u32, { MAX_TAG_LENGTH + 1 }>,
    /// `(from node, edge index within its out-edges)`.
    pub edges: ArrayVec<(u32, u32), MAX_TAG_LENGTH>,
}

/// Depth-first walk over every path of exactly `length` edges.
///
/// Uses an explicit stack of `(node, next edge)` frames so the walk can be
/// paused between paths and resumed at the next sibling.
pub struct TagWalk<'a> {
    graph: &'a TagGraph,
    length: usize,
    next_start: u32,
    stack: ArrayVec<(u32, u32), { MAX_TAG_LENGTH + 1 }>,
}

impl<'a> TagWalk<'a> {
    pub fn new(graph: &'a TagGraph, length: usize) -> Self {
        Self {
            graph,
            length: length.min(MAX_TAG_LENGTH),
            next_start: 0,
            stack: ArrayVec::new(),
        }
    }
}

impl Iterator for TagWalk<'_> {
    type Item = TagPath;

    fn next(&mut self) -> Option<TagPath> {
        loop {
            if self.stack.is_empty() {
                if self.next_start as usize >= self.graph.len() {
                    return None;
                }
                self.stack.push((self.next_start, 0));
                self.next_start += 1;
            }
            let depth = self.stack.len() - 1;
            let Some(&(node, cursor)) = self.stack.last() else {
                continue;
            };
            let edges = self.graph.edges_from(node);
            if depth == self.length || cursor as usize >= edges.len() {
                let complete = depth == self.length;
                let path = complete.then(|| self.current_path());
                self.stack.pop();
                if let Some(parent) = self.stack.last_mut() {
                    parent.1 += 1;
                }
                if path.is_some() {
                    return path;
                }
                continue;
            }
            self.stack.push((edges[cursor as usize].to, 0));
        }
    }
}

impl TagWalk<'_> {
    fn current_path(&self) -> TagPath {
        let nodes = self.stack.iter().map(|(n, _)| *n).collect();
        let edges = self.stack[..self.stack.len() - 1]
            .iter()
            .copied()
            .collect();
        TagPath { nodes, edges }
    }
}

/// Total order used to rank tags: score descending, then prefix mass ascending,
/// then emission order.
#[derive(Debug, Clone)]
struct RankedTag {
    tag: Tag,
    serial: u32,
}

impl PartialEq for RankedTag {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankedTag {}

impl PartialOrd for RankedTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedTag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tag
            .score
            .total_cmp(&other.tag.score)
            .then_with(|| other.tag.prefix_mass.cmp(&self.tag.prefix_mass))
            .then_with(|| other.serial.cmp(&self.serial))
    }
}

/// Turns walk paths into scored tags.
pub struct TagGenerator<'a> {
    pub graph: &'a TagGraph,
    pub jumps: &'a JumpTable,
    pub skew: &'a SkewPenalty,
    pub tag_length: usize,
    /// Per-tag modification limit, at most [`MAX_TAG_MODS`].
    pub max_mods: usize,
}

impl TagGenerator<'_> {
    /// Scores one path, `None` if it carries too many modifications.
    pub fn tag_for_path(&self, path: &TagPath, spectrum: u32) -> Option<Tag> {
        let graph = self.graph;
        let max_mods = self.max_mods.min(MAX_TAG_MODS);
        let first = graph.node(path.nodes[0]);
        let last = graph.node(path.nodes[path.nodes.len() - 1]);

        let mut tag = Tag {
            spectrum,
            prefix_mass: first.mass,
            suffix_mass: graph.residue_mass() - last.mass,
            residues: ArrayVec::new(),
            mods: ArrayVec::new(),
            score: 0.0,
        };
        let push_mod = |tag: &mut Tag, m: ModIndex, pos: usize| -> bool {
            tag.mods.len() < max_mods && tag.mods.try_push((m, pos as u8)).is_ok()
        };

        if let (NodeKind::LeftEndpoint, Some(m)) = (first.kind, first.terminal_mod) {
            tag.prefix_mass = 0;
            if !push_mod(&mut tag, m, 0) {
                return None;
            }
        }

        let mut score: f32 = path.nodes.iter().map(|&n| graph.node(n).score).sum();
        let mut signed_skew = 0;
        let mut absolute_skew = 0;
        for (pos, &(from, edge_index)) in path.edges.iter().enumerate() {
            let edge = &graph.edges_from(from)[edge_index as usize];
            let jump = self.jumps.get(edge.jump);
            tag.residues.push(jump.residue);
            if let Some(m) = jump.modification {
                if !push_mod(&mut tag, m, pos) {
                    return None;
                }
            }
            score += edge.score;
            signed_skew += edge.skew;
            absolute_skew += edge.skew.abs();
        }

        if let (NodeKind::RightEndpoint, Some(m)) = (last.kind, last.terminal_mod) {
            tag.suffix_mass = 0;
            let last_pos = tag.residues.len() - 1;
            if !push_mod(&mut tag, m, last_pos) {
                return None;
            }
        }
        tag.mods.sort_by_key(|(_, pos)| *pos);
        tag.score = score + self.skew.penalty(signed_skew, absolute_skew);
        Some(tag)
    }

    /// Every tag of the configured length, sorted best first.
    pub fn all_tags(&self, spectrum: u32) -> Vec<Tag> {
        self.generate(spectrum, usize::MAX)
    }

    /// The best `max_tags` tags, sorted best first.
    ///
    /// Candidates that cannot beat the current `max_tags`-th score are dropped
    /// as soon as they are scored.
    #[cfg_attr(
        feature = "instrumentation",
        tracing::instrument(skip_all, level = "trace")
    )]
    pub fn generate(&self, spectrum: u32, max_tags: usize) -> Vec<Tag> {
        let mut best = TopN::new(max_tags);
        for (serial, path) in TagWalk::new(self.graph, self.tag_length).enumerate() {
            if let Some(tag) = self.tag_for_path(&path, spectrum) {
                best.push(RankedTag {
                    tag,
                    serial: serial as u32,
                });
            }
        }
        best.into_sorted_vec().into_iter().map(|r| r.tag).collect()
    }
}
