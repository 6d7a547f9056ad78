//! Logicterm CLI
//!
//! - `diff`: compare two versions of a definition (JSON interchange form)
//!   and print additions, deletions and the merged expression
//! - `commit-state`: summarize the persisted commit-engine state in a
//!   data directory

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod diff;
mod state;

#[derive(Parser)]
#[command(name = "logicterm")]
#[command(author, version, about = "Logicterm: versioned concept definitions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Diff two logical expressions stored as JSON.
    ///
    /// The reference is the current definition, the comparison the stored one.
    Diff {
        reference: PathBuf,
        comparison: PathBuf,
        #[arg(long, value_enum, default_value_t = SolverArg::BottomUp)]
        solver: SolverArg,
        /// Print a JSON summary instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Summarize `commit-manager.data`, `stamp-alias.map` and `stamp-comment.map`.
    CommitState {
        data_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SolverArg {
    BottomUp,
    PathHash,
}

impl From<SolverArg> for logicterm_logic::SolverKind {
    fn from(arg: SolverArg) -> Self {
        match arg {
            SolverArg::BottomUp => logicterm_logic::SolverKind::BottomUp,
            SolverArg::PathHash => logicterm_logic::SolverKind::PathHash,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Diff {
            reference,
            comparison,
            solver,
            json,
        } => diff::cmd_diff(&reference, &comparison, solver.into(), json),
        Commands::CommitState { data_dir, json } => state::cmd_commit_state(&data_dir, json),
    }
}
