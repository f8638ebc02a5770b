pub mod mass;
mod candidate;
mod spectrum;

pub use candidate::{
    CandidateMatch,
    ModPlacement,
    TERMINUS_MARKER,
};
pub use spectrum::{
    Peak,
    Spectrum,
    SpectrumQuery,
};
