use serde::{
    Deserialize,
    Serialize,
};
use std::path::PathBuf;
use tagseek::SearchConfig;

use crate::cli::SearchArgs;
use crate::error::CliError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub input: Option<InputConfig>,
    #[serde(default)]
    pub search: SearchConfig,
    pub output: Option<OutputConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InputConfig {
    /// NDJSON spectra, one object per line.
    pub spectra: PathBuf,
    /// Stem of the files written by `prep-db`.
    pub database: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputConfig {
    pub directory: PathBuf,
    #[serde(default = "default_report_top")]
    pub report_top: usize,
}

fn default_report_top() -> usize {
    1
}

impl Config {
    /// Loads the configuration file and applies the command line overrides.
    pub fn from_args(args: &SearchArgs) -> Result<Self, CliError> {
        let mut config: Config = serde_json::from_str(&std::fs::read_to_string(&args.config)?)?;
        if config.input.is_none() {
            if let (Some(spectra), Some(database)) = (&args.spectra, &args.database) {
                config.input = Some(InputConfig {
                    spectra: spectra.clone(),
                    database: database.clone(),
                });
            }
        }
        let Some(input) = config.input.as_mut() else {
            return Err(CliError::Config(
                "No input provided, please provide one in either the config file or with the --spectra and --database flags".to_string(),
            ));
        };
        if let Some(spectra) = &args.spectra {
            input.spectra = spectra.clone();
        }
        if let Some(database) = &args.database {
            input.database = database.clone();
        }
        if let Some(directory) = &args.output_dir {
            let report_top = config
                .output
                .as_ref()
                .map(|o| o.report_top)
                .unwrap_or_else(default_report_top);
            config.output = Some(OutputConfig {
                directory: directory.clone(),
                report_top,
            });
        }
        let Some(output) = config.output.as_mut() else {
            return Err(CliError::Config(
                "No output directory provided, please provide one in either the config file or with the --output-dir flag".to_string(),
            ));
        };
        if let Some(top) = args.top {
            output.report_top = top;
        }
        if output.report_top == 0 || output.report_top > config.search.max_matches {
            return Err(CliError::Config(format!(
                "report_top must be in 1..={} (the configured max_matches)",
                config.search.max_matches
            )));
        }
        config.search.validate().map_err(|e| CliError::Config(e.to_string()))?;
        Ok(config)
    }
}
