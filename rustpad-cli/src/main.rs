//! rustpad CLI - Command-line interface for rustpad.
//!
//! Simulates or reads pad digits for one detection element and reconstructs
//! hit positions from them.
#![allow(clippy::uninlined_format_args)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustpad_algorithms::{decluster_element, ChargeSimulator, Deposit, ElementOutput};
use rustpad_core::{
    DeclusterConfig, DetectionElement, Digit, MathiesonResponse, ResponseConfig, ZonedSegmentation,
};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] rustpad_core::Error),
}

/// Output format for reconstructed hits.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// One line per hit
    Text,
    /// Pretty-printed JSON array
    Json,
}

/// Cathode-pad hit reconstruction.
#[derive(Parser)]
#[command(name = "rustpad")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Geometry and thresholds of the detection element.
#[derive(Args, Debug)]
struct ElementArgs {
    /// Pad half-size DX,DY (same on both cathodes)
    #[arg(long, value_parser = parse_pair, default_value = "0.25,0.25")]
    pad_size: (f64, f64),

    /// Half-extent of the square sensor
    #[arg(long, default_value = "4.0")]
    half_extent: f64,

    /// Detection element identifier
    #[arg(long, default_value = "1")]
    element_id: u32,

    /// Zero-suppression level (ADC)
    #[arg(long, default_value = "0.5")]
    zero_suppression: f64,

    /// Declustering configuration (JSON); defaults apply to missing fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate point deposits and reconstruct them
    Simulate {
        /// Deposit X,Y,CHARGE (repeatable)
        #[arg(long = "hit", value_parser = parse_deposit, required = true)]
        hits: Vec<Deposit>,

        /// Random seed
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Also write the simulated digits to this JSON file
        #[arg(long)]
        digits_out: Option<PathBuf>,

        #[command(flatten)]
        element: ElementArgs,
    },

    /// Reconstruct hits from a JSON array of digits
    Reconstruct {
        /// Input digits file
        input: PathBuf,

        #[command(flatten)]
        element: ElementArgs,
    },
}

fn parse_pair(s: &str) -> std::result::Result<(f64, f64), String> {
    match parse_floats(s)?.as_slice() {
        [a, b] => Ok((*a, *b)),
        other => Err(format!("expected 2 values, got {}", other.len())),
    }
}

fn parse_deposit(s: &str) -> std::result::Result<Deposit, String> {
    match parse_floats(s)?.as_slice() {
        [x, y, q] => Ok(Deposit::new(*x, *y, *q)),
        other => Err(format!("expected X,Y,CHARGE, got {} values", other.len())),
    }
}

fn parse_floats(s: &str) -> std::result::Result<Vec<f64>, String> {
    s.split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|e| format!("'{}': {}", part.trim(), e))
        })
        .collect()
}

impl ElementArgs {
    fn element(&self) -> Result<DetectionElement<ZonedSegmentation>> {
        let (dx, dy) = self.pad_size;
        let plane = || ZonedSegmentation::uniform(self.half_extent, self.half_extent, dx, dy);
        Ok(DetectionElement::new(self.element_id, plane()?, plane()?))
    }

    fn response(&self) -> Result<MathiesonResponse> {
        let config = ResponseConfig::default().with_zero_suppression(self.zero_suppression);
        Ok(MathiesonResponse::new(config)?)
    }

    fn decluster_config(&self) -> Result<DeclusterConfig> {
        let config = match &self.config {
            Some(path) => serde_json::from_reader(BufReader::new(File::open(path)?))?,
            None => DeclusterConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }
}

fn reconstruct(element: &ElementArgs, digits: &[Digit]) -> Result<ElementOutput> {
    let de = element.element()?;
    let response = element.response()?;
    let config = element.decluster_config()?;

    let start = Instant::now();
    let output = decluster_element(&de, digits, &response, &config)?;
    info!(
        "{} hits from {} digits in {:.2?}",
        output.hits.len(),
        digits.len(),
        start.elapsed()
    );
    info!("{:?}", output.statistics);
    Ok(output)
}

fn print_hits(output: &ElementOutput, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(output.hits.as_slice())?);
        }
        OutputFormat::Text => {
            println!(
                "{:>4} {:>10} {:>10} {:>10} {:>10} {:>5} {:>10}",
                "#", "x", "y", "charge", "chi2", "pads", "consistent"
            );
            for (i, hit) in output.hits.iter().enumerate() {
                println!(
                    "{:>4} {:>10.4} {:>10.4} {:>10.2} {:>10.3} {:>5} {:>10}",
                    i,
                    hit.x,
                    hit.y,
                    hit.charge,
                    hit.quality,
                    hit.multiplicity(),
                    hit.cathode_consistent
                );
            }
        }
    }
    Ok(())
}

fn write_digits(path: &Path, digits: &[Digit]) -> Result<()> {
    serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), digits)?;
    info!("wrote {} digits to {}", digits.len(), path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Simulate {
            hits,
            seed,
            digits_out,
            element,
        } => {
            let de = element.element()?;
            let response = element.response()?;
            let mut rng = StdRng::seed_from_u64(seed);
            let digits = ChargeSimulator::new(&de, &response).simulate(&hits, &mut rng)?;
            info!("simulated {} deposits into {} digits", hits.len(), digits.len());
            if let Some(path) = digits_out {
                write_digits(&path, &digits)?;
            }

            let output = reconstruct(&element, &digits)?;
            print_hits(&output, element.format)?;
        }

        Commands::Reconstruct { input, element } => {
            let digits: Vec<Digit> = serde_json::from_reader(BufReader::new(File::open(&input)?))?;
            info!("read {} digits from {}", digits.len(), input.display());

            let output = reconstruct(&element, &digits)?;
            print_hits(&output, element.format)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        assert_eq!(parse_pair("0.25, 0.5"), Ok((0.25, 0.5)));
        assert!(parse_pair("0.25").is_err());
        assert!(parse_pair("a,b").is_err());
    }

    #[test]
    fn test_parse_deposit() {
        assert_eq!(
            parse_deposit("0.03,-0.02,100"),
            Ok(Deposit::new(0.03, -0.02, 100.0))
        );
        assert!(parse_deposit("1,2").is_err());
    }

    #[test]
    fn test_cli_parses_simulate() {
        let cli = Cli::try_parse_from([
            "rustpad",
            "-vv",
            "simulate",
            "--hit",
            "0.1,0.2,100",
            "--hit",
            "-1,0.5,80",
            "--pad-size",
            "0.25,0.5",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Simulate { hits, element, .. } => {
                assert_eq!(hits.len(), 2);
                assert_eq!(element.pad_size, (0.25, 0.5));
                assert!(matches!(element.format, OutputFormat::Json));
            }
            Commands::Reconstruct { .. } => panic!("wrong command"),
        }
    }

    #[test]
    fn test_reconstruct_simulated_hit() {
        let args = Cli::try_parse_from(["rustpad", "simulate", "--hit", "0.03,-0.02,100"]).unwrap();
        let Commands::Simulate { hits, element, .. } = args.command else {
            panic!("wrong command");
        };
        let de = element.element().unwrap();
        let response = element.response().unwrap();
        let digits = ChargeSimulator::new(&de, &response)
            .simulate(&hits, &mut StdRng::seed_from_u64(1))
            .unwrap();
        let output = reconstruct(&element, &digits).unwrap();
        assert_eq!(output.hits.len(), 1);
    }
}
