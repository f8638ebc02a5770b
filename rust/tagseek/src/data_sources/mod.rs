pub mod spectra;

pub use spectra::{
    SpectrumReader,
    SpectrumRecord,
    read_spectra,
};
