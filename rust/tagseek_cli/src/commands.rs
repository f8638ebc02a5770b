use std::fs::File;
use std::io::BufWriter;
use std::time::Instant;

use tagseek::config::{
    ModificationSpec,
    Terminal,
};
use tagseek::data_sources::{
    SpectrumRecord,
    read_spectra,
};
use tagseek::database::{
    DatabaseIndex,
    database_paths,
    prepare_database_files,
};
use tagseek::{
    SearchConfig,
    SearchSession,
    catalog_from_config,
};
use tracing::{
    info,
    instrument,
};

use crate::cli::{
    PrepDbArgs,
    SearchArgs,
    WriteTemplateArgs,
};
use crate::config::{
    Config,
    InputConfig,
    OutputConfig,
};
use crate::error::CliError;
use crate::processing::{
    log_stats,
    search_blocks,
    write_results,
};

/// Main function for the 'search' subcommand.
#[instrument]
pub fn main_search(args: SearchArgs) -> Result<(), CliError> {
    let config = Config::from_args(&args)?;
    info!("Parsed configuration: {:#?}", config);
    let (Some(input), Some(output)) = (config.input, config.output) else {
        return Err(CliError::Config("Incomplete configuration".to_string()));
    };
    std::fs::create_dir_all(&output.directory)?;

    let catalog = catalog_from_config(&config.search)?;
    let session = SearchSession::new(config.search, catalog)?;

    let st = Instant::now();
    let spectra = read_spectra(&input.spectra)?;
    info!(
        "Loaded {} spectra from {} in {:?}",
        spectra.len(),
        input.spectra.display(),
        st.elapsed()
    );

    let (database_path, index_path) = database_paths(&input.database);
    let index = DatabaseIndex::read(&index_path)?;
    info!(
        "Searching against {} ({} records)",
        database_path.display(),
        index.len()
    );

    let st = Instant::now();
    let (matches, stats) = search_blocks(&session, &spectra, &database_path)?;
    log_stats(&stats);

    let results_path = output.directory.join("results.ndjson");
    let writer = BufWriter::new(File::create(&results_path)?);
    let written = write_results(
        writer,
        &spectra,
        &matches,
        output.report_top,
        session.catalog(),
        &index,
    )?;
    println!(
        "Wrote {} matches for {} spectra to {} in {:?}",
        written,
        spectra.len(),
        results_path.display(),
        st.elapsed()
    );
    Ok(())
}

/// Main function for the 'prep-db' subcommand.
#[instrument]
pub fn main_prep_db(args: PrepDbArgs) -> Result<(), CliError> {
    if let Some(parent) = args.output_stem.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let stats = prepare_database_files(&args.fasta, &args.output_stem)?;
    let (database_path, index_path) = database_paths(&args.output_stem);
    println!(
        "Wrote {} records ({} residues, {} bytes dropped) to:\n- {}\n- {}",
        stats.records,
        stats.residues,
        stats.dropped_bytes,
        database_path.display(),
        index_path.display()
    );
    Ok(())
}

fn template_config() -> Config {
    Config {
        input: Some(InputConfig {
            spectra: "spectra.ndjson".into(),
            database: "proteome".into(),
        }),
        search: SearchConfig {
            modifications: vec![
                ModificationSpec {
                    name: "Phospho".to_string(),
                    mass_da: 79.96633,
                    residues: "STY".to_string(),
                    terminal: Terminal::Anywhere,
                    score: -1.0,
                },
                ModificationSpec {
                    name: "Acetyl".to_string(),
                    mass_da: 42.01057,
                    residues: "*".to_string(),
                    terminal: Terminal::NTerm,
                    score: -0.5,
                },
            ],
            ..Default::default()
        },
        output: Some(OutputConfig {
            directory: "results".into(),
            report_top: 1,
        }),
    }
}

/// Main function for the 'write-template' subcommand.
pub fn main_write_template(args: WriteTemplateArgs) -> Result<(), CliError> {
    let target_dir = args.output_path;
    std::fs::create_dir_all(&target_dir)?;

    let config_path = target_dir.join("search_config_template.json");
    std::fs::write(&config_path, serde_json::to_string_pretty(&template_config())?)?;

    let spectra_path = target_dir.join("spectra_template.ndjson");
    let mut line = serde_json::to_string(&SpectrumRecord::sample())?;
    line.push('\n');
    std::fs::write(&spectra_path, line)?;
    println!(
        "Wrote templates to:\n- {}\n- {}",
        config_path.display(),
        spectra_path.display()
    );
    Ok(())
}
