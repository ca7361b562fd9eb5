// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! llmeval CLI
//!
//! Runs benchmark evaluations and enforces quality gates in CI.

use clap::{Parser, Subcommand};
use llmeval_cli::{
    build_registry, exit_code, gate_command, init_tracing, render_metric_list, run_command,
    RunOptions,
};
use llmeval_evals::MetricBackends;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "llmeval")]
#[command(about = "llmeval - LLM evaluation orchestration", long_about = None)]
struct Cli {
    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every model with every configured metric
    Run {
        /// Run configuration (.toml, .json, .yaml)
        #[arg(short, long)]
        config: PathBuf,

        /// Directory for scores and reports
        #[arg(short, long, default_value = "results")]
        output_dir: PathBuf,

        /// Maximum concurrent row computations per batch
        #[arg(short, long)]
        workers: Option<usize>,

        /// Exit with code 3 when a quality gate fails
        #[arg(long)]
        enforce_gates: bool,
    },

    /// Check a previous run's aggregates against the quality gates
    Gate {
        /// Path to aggregates.json
        #[arg(short, long)]
        aggregates: PathBuf,

        /// Take thresholds from this configuration instead of the CI defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List registered metrics
    Metrics,

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            config,
            output_dir,
            workers,
            enforce_gates,
        } => {
            let options = RunOptions {
                config_path: config,
                output_dir,
                workers,
                enforce_gates,
            };
            run_command(&options).await.map(|output| {
                println!(
                    "✓ Evaluated {} model(s); results in {}",
                    output.aggregates.len(),
                    options.output_dir.display()
                );
            })
        }
        Commands::Gate { aggregates, config } => {
            gate_command(&aggregates, config.as_deref())
                .map(|()| println!("✓ Quality gate passed"))
        }
        Commands::Metrics => build_registry(&MetricBackends::new())
            .map(|registry| print!("{}", render_metric_list(&registry)))
            .map_err(Into::into),
        Commands::Version => {
            println!("llmeval {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}
