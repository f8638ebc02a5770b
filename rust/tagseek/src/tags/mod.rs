//! Spectrum-side tag extraction: jump table, mass graph and tag enumeration.

mod generator;
mod graph;
mod jump_table;

pub use generator::{
    MAX_TAG_MODS,
    Tag,
    TagGenerator,
    TagPath,
    TagWalk,
};
pub use graph::{
    Edge,
    Node,
    NodeKind,
    TagGraph,
};
pub use jump_table::{
    Jump,
    JumpTable,
};
