use super::jump_table::JumpTable;
use crate::catalog::{
    Catalog,
    ModIndex,
};
use crate::config::Terminal;
use crate::models::SpectrumQuery;
use crate::models::mass::{
    GLYCINE_MASS,
    Mass,
    PROTON_MASS,
};
use tracing::trace;

/// Interior nodes kept per spectrum. Weaker nodes beyond this are dropped.
pub const MAX_INTERIOR_NODES: usize = 498;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeKind {
    LeftEndpoint,
    Interior,
    RightEndpoint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Prefix residue mass.
    pub mass: Mass,
    pub kind: NodeKind,
    pub peak_index: Option<u32>,
    pub score: f32,
    /// Terminal modification carried by a decorated endpoint.
    pub terminal_mod: Option<ModIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub to: u32,
    /// Index into the session's [`JumpTable`].
    pub jump: u32,
    /// Observed mass difference minus the jump mass.
    pub skew: Mass,
    pub score: f32,
}

/// Mass-ordered DAG of prefix residue masses for one spectrum.
///
/// Node indices are stable once built. Edges are stored grouped by their
/// source node.
#[derive(Debug, Clone)]
pub struct TagGraph {
    nodes: Vec<Node>,
    edge_offsets: Vec<u32>,
    edges: Vec<Edge>,
    residue_mass: Mass,
}

impl TagGraph {
    #[cfg_attr(
        feature = "instrumentation",
        tracing::instrument(skip_all, level = "trace")
    )]
    pub fn build(
        query: &SpectrumQuery<'_>,
        catalog: &Catalog,
        jumps: &JumpTable,
        parent_tolerance: Mass,
    ) -> Self {
        let spectrum = query.spectrum;
        let total = spectrum.residue_mass();
        let upper = total + parent_tolerance;
        let plausible = |mass: Mass| mass == 0 || (GLYCINE_MASS..=upper).contains(&mass);

        let mut nodes = Vec::with_capacity(spectrum.peaks.len() * 2 + 2);
        for (i, peak) in spectrum.peaks.iter().enumerate() {
            let b_mass = peak.mass - PROTON_MASS;
            let y_mass = spectrum.parent_mass - peak.mass;
            for mass in [b_mass, y_mass] {
                if plausible(mass) {
                    nodes.push(Node {
                        mass,
                        kind: NodeKind::Interior,
                        peak_index: Some(i as u32),
                        score: query.prm_scorer.score(mass),
                        terminal_mod: None,
                    });
                }
            }
        }
        let pruned = prune_interior(&mut nodes);
        if pruned > 0 {
            trace!("Pruned {} weak nodes from {}", pruned, spectrum.id);
        }
        nodes.sort_by(|a, b| a.mass.cmp(&b.mass).then(a.peak_index.cmp(&b.peak_index)));

        let mut graph = Self {
            nodes,
            edge_offsets: Vec::new(),
            edges: Vec::new(),
            residue_mass: total,
        };
        graph.insert_endpoint(0, NodeKind::LeftEndpoint, None);
        graph.insert_endpoint(total, NodeKind::RightEndpoint, None);
        for (mod_index, modification) in catalog.terminal_modifications(Terminal::NTerm) {
            if (0..=total).contains(&modification.mass) {
                graph.insert_endpoint(modification.mass, NodeKind::LeftEndpoint, Some(mod_index));
            }
        }
        for (mod_index, modification) in catalog.terminal_modifications(Terminal::CTerm) {
            let mass = total - modification.mass;
            if (0..=total).contains(&mass) {
                graph.insert_endpoint(mass, NodeKind::RightEndpoint, Some(mod_index));
            }
        }
        graph.connect(catalog, jumps);
        trace!(
            "Tag graph for {}: {} nodes, {} edges",
            spectrum.id,
            graph.nodes.len(),
            graph.edges.len()
        );
        graph
    }

    /// Inserts an endpoint after every node of lower or equal mass.
    fn insert_endpoint(&mut self, mass: Mass, kind: NodeKind, terminal_mod: Option<ModIndex>) {
        let pos = self.nodes.partition_point(|n| n.mass <= mass);
        self.nodes.insert(
            pos,
            Node {
                mass,
                kind,
                peak_index: None,
                score: 0.0,
                terminal_mod,
            },
        );
    }

    fn connect(&mut self, catalog: &Catalog, jumps: &JumpTable) {
        let reach = jumps.max_mass() + jumps.tolerance();
        self.edge_offsets.clear();
        self.edges.clear();
        for (from_index, from) in self.nodes.iter().enumerate() {
            self.edge_offsets.push(self.edges.len() as u32);
            if from.kind == NodeKind::RightEndpoint {
                continue;
            }
            for (offset, to) in self.nodes[from_index + 1..].iter().enumerate() {
                let delta = to.mass - from.mass;
                if delta > reach {
                    break;
                }
                if to.kind == NodeKind::LeftEndpoint {
                    continue;
                }
                for jump_index in jumps.matches(delta) {
                    let jump = jumps.get(jump_index);
                    let allowed = |m: Option<ModIndex>| match m {
                        Some(m) => catalog.modification(m).applies_to_canonical(jump.residue),
                        None => true,
                    };
                    if !allowed(from.terminal_mod) || !allowed(to.terminal_mod) {
                        continue;
                    }
                    self.edges.push(Edge {
                        to: (from_index + 1 + offset) as u32,
                        jump: jump_index,
                        skew: delta - jump.mass,
                        score: jump
                            .modification
                            .map(|m| catalog.modification(m).score)
                            .unwrap_or(0.0),
                    });
                }
            }
        }
        self.edge_offsets.push(self.edges.len() as u32);
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: u32) -> &Node {
        &self.nodes[index as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn interior_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Interior)
            .count()
    }

    /// Out-edges of a node.
    pub fn edges_from(&self, index: u32) -> &[Edge] {
        let start = self.edge_offsets[index as usize] as usize;
        let end = self.edge_offsets[index as usize + 1] as usize;
        &self.edges[start..end]
    }

    /// Summed residue mass implied by the parent mass.
    pub fn residue_mass(&self) -> Mass {
        self.residue_mass
    }

    /// Index range of the nodes with mass in `[low, high]`.
    pub fn nodes_in(&self, low: Mass, high: Mass) -> std::ops::Range<usize> {
        let start = self.nodes.partition_point(|n| n.mass < low);
        let end = self.nodes.partition_point(|n| n.mass <= high);
        start..end.max(start)
    }
}

/// Keeps the [`MAX_INTERIOR_NODES`] best scoring nodes. Nodes tied with the
/// first rejected score go too, so the result can be smaller.
fn prune_interior(nodes: &mut Vec<Node>) -> usize {
    if nodes.len() <= MAX_INTERIOR_NODES {
        return 0;
    }
    let mut scores: Vec<f32> = nodes.iter().map(|n| n.score).collect();
    scores.sort_unstable_by(|a, b| b.total_cmp(a));
    let cutoff = scores[MAX_INTERIOR_NODES];
    let before = nodes.len();
    nodes.retain(|n| n.score > cutoff);
    before - nodes.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResidueSet;
    use crate::models::Spectrum;
    use crate::models::mass::PARENT_MASS_BOOST;
    use crate::scoring::PeakPrmScorer;

    fn spectrum_for(residues: &[u8], catalog: &Catalog) -> Spectrum {
        let table = catalog.residues();
        let total = table.sequence_mass(residues).unwrap();
        let mut acc = 0;
        let mut peaks = Vec::new();
        for &r in &residues[..residues.len() - 1] {
            acc += table.get(r).unwrap();
            peaks.push(crate::models::Peak {
                mass: acc + PROTON_MASS,
                intensity: 1.0,
                rank: peaks.len() as u32 + 1,
            });
        }
        Spectrum {
            id: "t".to_string(),
            peaks,
            parent_mass: total + PARENT_MASS_BOOST,
            charge: 1,
        }
    }

    #[test]
    fn test_nodes_sorted_with_endpoints() {
        let catalog = Catalog::default();
        let spectrum = spectrum_for(b"GASP", &catalog);
        let scorer = PeakPrmScorer::new(&spectrum, 50);
        let query = SpectrumQuery {
            spectrum: &spectrum,
            prm_scorer: &scorer,
        };
        let jumps = JumpTable::new(&catalog, false, 50);
        let graph = TagGraph::build(&query, &catalog, &jumps, 100);

        let masses: Vec<_> = graph.nodes().iter().map(|n| n.mass).collect();
        assert!(masses.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(graph.nodes()[0].kind, NodeKind::LeftEndpoint);
        assert_eq!(graph.nodes().last().unwrap().kind, NodeKind::RightEndpoint);
        assert_eq!(graph.nodes().last().unwrap().mass, spectrum.residue_mass());

        // The b-ladder spells the peptide from the left endpoint.
        let first = graph.edges_from(0);
        assert!(first.iter().any(|e| jumps.get(e.jump).residue == b'G'));
        for (i, node) in graph.nodes().iter().enumerate() {
            if node.kind == NodeKind::RightEndpoint {
                assert!(graph.edges_from(i as u32).is_empty());
            }
            for edge in graph.edges_from(i as u32) {
                assert_ne!(graph.node(edge.to).kind, NodeKind::LeftEndpoint);
                assert!(edge.skew.abs() <= 50);
            }
        }
    }

    #[test]
    fn test_prune_keeps_best_nodes() {
        let node = |i: usize, score: f32| Node {
            mass: 10_000 + i as Mass,
            kind: NodeKind::Interior,
            peak_index: Some(i as u32),
            score,
            terminal_mod: None,
        };
        let mut nodes: Vec<Node> = (0..600).map(|i| node(i, i as f32)).collect();
        assert_eq!(prune_interior(&mut nodes), 600 - MAX_INTERIOR_NODES);
        assert_eq!(nodes.len(), MAX_INTERIOR_NODES);
        assert!(nodes.iter().all(|n| n.score >= (600 - MAX_INTERIOR_NODES) as f32));

        // A tie at the cutoff drops the whole tied group.
        let mut nodes: Vec<Node> = (0..600)
            .map(|i| node(i, if i < 300 { 1.0 } else { 2.0 }))
            .collect();
        prune_interior(&mut nodes);
        assert_eq!(nodes.len(), 300);

        let mut few: Vec<Node> = (0..10).map(|i| node(i, 0.0)).collect();
        assert_eq!(prune_interior(&mut few), 0);
        assert_eq!(few.len(), 10);
    }

    #[test]
    fn test_terminal_endpoint_restricts_edges() {
        let mut catalog = Catalog::default();
        catalog
            .add_modification("NtermS", 4201, -1.0, ResidueSet::single(b'S'), Terminal::NTerm)
            .unwrap();
        let spectrum = spectrum_for(b"SAG", &catalog);
        let scorer = PeakPrmScorer::new(&spectrum, 50);
        let query = SpectrumQuery {
            spectrum: &spectrum,
            prm_scorer: &scorer,
        };
        let jumps = JumpTable::new(&catalog, true, 50);
        let graph = TagGraph::build(&query, &catalog, &jumps, 100);
        let (index, _) = graph
            .nodes()
            .iter()
            .enumerate()
            .find(|(_, n)| n.terminal_mod.is_some())
            .unwrap();
        assert_eq!(graph.node(index as u32).mass, 4201);
        for edge in graph.edges_from(index as u32) {
            assert_eq!(jumps.get(edge.jump).residue, b'S');
        }
    }
}
