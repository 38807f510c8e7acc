use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use completion::{Algorithm, CompletionConfig, CompletionErr};
use log::LevelFilter;

#[derive(Debug, Parser)]
#[command(name = "complete")]
#[command(about = "Complete a sparse tensor with a low-rank factorization")]
#[command(version)]
pub struct Cli {
    /// Training tensor (one `i j k ... value` entry per line, 1-based indices)
    pub train: PathBuf,

    /// Validation tensor, scored after every epoch
    pub validate: PathBuf,

    /// Test tensor, scored with the best model once training ends
    pub test: Option<PathBuf>,

    /// Completion algorithm: gd, nlcg (or cg), lbfgs, sgd, als, ccd [default: sgd]
    #[arg(short, long, value_parser = parse_algorithm)]
    pub alg: Option<Algorithm>,

    /// Rank of the factorization [default: 10]
    #[arg(short, long)]
    pub rank: Option<usize>,

    /// Threads per worker [default: every core]
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Maximum amount of epochs, 0 keeps the default [default: 500]
    #[arg(short, long)]
    pub iters: Option<usize>,

    /// Maximum amount of seconds, 0 disables the timeout
    #[arg(long)]
    pub time: Option<f64>,

    /// Minimum validation RMSE improvement of a good epoch
    #[arg(long)]
    pub tol: Option<f64>,

    /// Learning rate of sgd, initial step of the line searches
    #[arg(short, long)]
    pub step: Option<f32>,

    /// Regularization of every mode
    #[arg(long)]
    pub reg: Option<f32>,

    /// Random seed [default: from the clock]
    #[arg(long)]
    pub seed: Option<u64>,

    /// Don't reshuffle the training entries every epoch
    #[arg(long)]
    pub norand: bool,

    /// Let threads update shared rows without coordination
    #[arg(long)]
    pub hogwild: bool,

    /// Amount of folds each epoch is split into
    #[arg(long)]
    pub folds: Option<usize>,

    /// Amount of in-process workers, each owning a slice of mode 0
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Write the best factors to the output directory
    #[arg(long, conflicts_with = "nowrite")]
    pub write: bool,

    /// Don't write the best factors
    #[arg(long)]
    pub nowrite: bool,

    /// Directory receiving the factor matrices
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// JSON file with default settings, flags take precedence
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Increase logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

fn parse_algorithm(s: &str) -> std::result::Result<Algorithm, String> {
    s.parse().map_err(|e: CompletionErr| e.to_string())
}

impl Cli {
    /// The settings given as flags.
    pub fn overrides(&self) -> CompletionConfig {
        let write = match (self.write, self.nowrite) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };

        CompletionConfig {
            algorithm: self.alg,
            rank: self.rank,
            nthreads: self.threads,
            workers: self.workers,
            max_its: self.iters.filter(|&n| n != 0),
            max_seconds: self.time,
            tolerance: self.tol,
            learn_rate: self.step,
            reg: self.reg,
            seed: self.seed,
            rand_per_iteration: self.norand.then_some(false),
            hogwild: self.hogwild.then_some(true),
            folds: self.folds,
            write,
        }
    }

    /// The settings of the config file, if any, overridden by the flags.
    pub fn config(&self) -> Result<CompletionConfig> {
        let base = match &self.config {
            Some(path) => load_config(path)?,
            None => CompletionConfig::default(),
        };

        Ok(base.merge(self.overrides()))
    }

    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

/// Reads a JSON `CompletionConfig`.
pub fn load_config(path: &Path) -> Result<CompletionConfig> {
    let file =
        File::open(path).with_context(|| format!("failed to open config '{}'", path.display()))?;

    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("invalid config '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_the_config() {
        let cli = Cli::try_parse_from([
            "complete", "train.tns", "val.tns", "-a", "cg", "-r", "4", "--norand", "--nowrite",
        ])
        .unwrap();

        let config = cli.overrides();
        assert_eq!(config.algorithm, Some(Algorithm::Nlcg));
        assert_eq!(config.rank, Some(4));
        assert_eq!(config.rand_per_iteration, Some(false));
        assert_eq!(config.hogwild, None);
        assert_eq!(config.write, Some(false));
        assert_eq!(cli.test, None);
    }

    #[test]
    fn zero_iterations_keep_the_default() {
        let zero = Cli::try_parse_from(["complete", "a", "b", "-i", "0"]).unwrap();
        let some = Cli::try_parse_from(["complete", "a", "b", "-i", "7"]).unwrap();

        assert_eq!(zero.overrides().max_its, None);
        assert_eq!(some.overrides().max_its, Some(7));
    }

    #[test]
    fn verbosity_raises_the_level() {
        let quiet = Cli::try_parse_from(["complete", "a", "b"]).unwrap();
        let loud = Cli::try_parse_from(["complete", "a", "b", "-vv"]).unwrap();

        assert_eq!(quiet.log_level(), LevelFilter::Warn);
        assert_eq!(loud.log_level(), LevelFilter::Trace);
    }

    #[test]
    fn unknown_algorithms_are_usage_errors() {
        let err = Cli::try_parse_from(["complete", "a", "b", "-a", "adam"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn flags_override_the_config_file() {
        let path = std::env::temp_dir().join(format!("complete-cli-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "rank": 8, "algorithm": "als", "reg": 0.5 }"#).unwrap();

        let cli = Cli::try_parse_from([
            "complete",
            "a",
            "b",
            "--config",
            path.to_str().unwrap(),
            "-r",
            "3",
        ])
        .unwrap();

        let config = cli.config().unwrap();
        assert_eq!(config.rank, Some(3));
        assert_eq!(config.algorithm, Some(Algorithm::Als));
        assert_eq!(config.reg, Some(0.5));
    }
}
