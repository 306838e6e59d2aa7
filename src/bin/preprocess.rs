//! Face dataset preprocessing and inspection binary
//!
//! Usage:
//!   facedata-preprocess aflw [DATA_ROOT]
//!   facedata-preprocess inspect [CONFIG_JSON]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use facedata_core::config::PreprocessConfig;
use facedata_core::preprocess::{self, AflwMetadata};
use facedata_core::{face_data_manager, DataConfig, DataManager};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_AFLW_ROOT: &str = "../aflw/aflw/data";

/// Face dataset preprocessing and inspection
#[derive(Parser, Debug)]
#[command(name = "facedata-preprocess")]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crop every annotated AFLW face into square PNGs
    Aflw {
        /// Dataset root holding `aflw.sqlite` and `flickr/`
        #[arg(default_value = DEFAULT_AFLW_ROOT)]
        data_root: PathBuf,
    },

    /// Build a face data manager, fetch one batch per split and print metrics
    Inspect {
        /// JSON data config; defaults apply when omitted
        config: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("facedata_core=info,facedata_preprocess=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Aflw { data_root } => run_aflw(PreprocessConfig::aflw(data_root)),
        Command::Inspect { config } => inspect(config),
    }
}

fn run_aflw(config: PreprocessConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Preprocessing AFLW faces under {}", config.data_root.display());

    let metadata = AflwMetadata::open(&config.data_root)?;
    let dirs = preprocess::resolve_source_dirs(&config.data_root, &config.source_folder)?;
    let report =
        preprocess::preprocess_faces(&dirs, &config.dest_dir(), &metadata, config.output_size)?;

    if report.failures > 0 {
        error!("{} images or faces failed", report.failures);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Build a face data manager, pull one batch per split and dump metrics
fn inspect(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => DataConfig::from_json_file(path)?,
        None => DataConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;

    let mut manager = face_data_manager(&config)?;
    let train = manager.train_batch()?;
    let valid = manager.valid_batch()?;
    let test = manager.test_batch()?;
    info!(
        train = ?train.shape(),
        valid = ?valid.shape(),
        test = ?test.shape(),
        "Fetched one batch per split"
    );

    print!("{}", manager.metrics().export());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_aflw_root_defaults() {
        let cli = Cli::try_parse_from(["facedata-preprocess", "aflw"]).unwrap();
        match cli.command {
            Command::Aflw { data_root } => assert_eq!(data_root, PathBuf::from(DEFAULT_AFLW_ROOT)),
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from(["facedata-preprocess", "inspect", "data.json"]).unwrap();
        match cli.command {
            Command::Inspect { config } => assert_eq!(config, Some(PathBuf::from("data.json"))),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["facedata-preprocess", "train"]).is_err());
    }
}
