use clap::{
    Parser,
    Subcommand,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search spectra against a prepared database.
    Search(SearchArgs),
    /// Convert a FASTA file into a searchable database and its index.
    PrepDb(PrepDbArgs),
    /// Write template configuration files.
    WriteTemplate(WriteTemplateArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct SearchArgs {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Path to the NDJSON spectra (will over-write the config file)
    #[arg(short, long)]
    pub spectra: Option<PathBuf>,

    /// Stem of the prepared database, without extension (will over-write the config file)
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// Path to the output directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Number of matches reported per spectrum
    #[arg(short, long)]
    pub top: Option<usize>,
}

#[derive(Parser, Debug, Clone)]
pub struct PrepDbArgs {
    /// The FASTA file to convert.
    #[arg(short, long)]
    pub fasta: PathBuf,

    /// Output stem, `.trie` and `.index` are appended.
    #[arg(short, long)]
    pub output_stem: PathBuf,
}

#[derive(Parser, Debug)]
pub struct WriteTemplateArgs {
    /// The path to the output files.
    #[arg(short, long)]
    pub output_path: PathBuf,
}
