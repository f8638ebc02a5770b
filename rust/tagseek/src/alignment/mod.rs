//! Anchor-free alignment of database windows against a spectrum's mass graph,
//! allowing up to two modifications.

mod aligner;
mod table;

pub use aligner::{
    AlignerContext,
    AlignmentStats,
    MAX_BACK_EDGE_RESIDUES,
    WindowAligner,
};
pub use table::{
    AlignmentTable,
    Cell,
    Trace,
};
