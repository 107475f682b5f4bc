//! Result Import CLI Tool
//!
//! Converts a scoreboard CSV export into the JSON match result accepted by
//! settlement.
//!
//! Usage:
//!   cargo run --bin result-import -- --scoreboard match_stats.csv --winner a
//!   cargo run --bin result-import -- -s match_stats.csv -w b --output result.json --pretty

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ladder_room::ingest::load_result;
use ladder_room::types::Team;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Winner {
    A,
    B,
}

impl From<Winner> for Team {
    fn from(winner: Winner) -> Self {
        match winner {
            Winner::A => Team::A,
            Winner::B => Team::B,
        }
    }
}

#[derive(Parser)]
#[command(name = "result-import")]
#[command(about = "Convert a scoreboard CSV export into a match result payload")]
struct Cli {
    /// Scoreboard CSV file
    #[arg(short, long, value_name = "FILE")]
    scoreboard: PathBuf,

    /// Team that won the match
    #[arg(short, long, value_enum)]
    winner: Winner,

    /// Write the payload here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Pretty-print the JSON
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let result = load_result(&cli.scoreboard, cli.winner.into())?;
    let json = if cli.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };

    match &cli.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "Wrote result for {} players to {}",
                result.stats.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }

    Ok(())
}
