//! rill CLI - diagnostics for rill storage files.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rill")]
#[command(about = "rill - segmented log storage engine diagnostics")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the records of a segment log file
    Dump {
        /// Path to the .log file
        path: PathBuf,

        /// Stop after this many records
        #[arg(long)]
        head: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Dump { path, head } => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            rill_storage::dump_file(&path, head, &mut out)?;
            out.flush()?;
        }
    }

    Ok(())
}
