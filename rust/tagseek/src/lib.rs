pub mod alignment;
pub mod catalog;
pub mod config;
pub mod data_sources;
pub mod database;
pub mod errors;
pub mod extension;
pub mod models;
pub mod scoring;
pub mod search;
pub mod store;
pub mod tags;
pub mod trie;
pub mod utils;

pub use catalog::{
    Catalog,
    DecorationSet,
};
pub use config::{
    SearchConfig,
    SearchMode,
};
pub use errors::{
    Result,
    TagSeekError,
};
pub use models::{
    CandidateMatch,
    Spectrum,
    SpectrumQuery,
};
pub use scoring::{
    CandidateScorer,
    PeakPrmScorer,
    PrmLadderScorer,
    PrmScorer,
};
pub use search::{
    BlockResult,
    SearchScratch,
    SearchSession,
    SearchStats,
    catalog_from_config,
};
pub use store::MatchStore;
