//! AIM command-line interface.
//!
//! Propagate emitter sources through time from TOML job files:
//! ```sh
//! aim-cli run job.toml
//! aim-cli validate job.toml
//! ```

mod config;
mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "aim-cli")]
#[command(about = "AIM: FFT-accelerated retarded interactions between point emitters")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job from a TOML configuration file.
    Run {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file and report the lattice without running.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, output } => {
            println!("AIM Retarded Interaction");
            println!("========================");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());

            let result = runner::run_simulation(&job)?;

            let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));

            if job.output.save_csv {
                runner::write_fields_csv(&result, &out_dir.join("fields.csv"), &job)?;
            }
            if job.output.save_json {
                runner::write_fields_json(&result, &out_dir.join("fields.json"))?;
            }

            println!("Run complete.");
            Ok(())
        }
        Commands::Validate { config } => {
            let job = config::load_config(&config)?;
            runner::describe_lattice(&job)?;
            println!("Configuration is valid: {}", config.display());
            Ok(())
        }
    }
}
