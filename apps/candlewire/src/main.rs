use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod obs;

use commands::run::Pacing;

#[derive(Parser, Debug)]
#[command(name = "candlewire")]
#[command(about = "Candle-to-order trading decision pipeline.", version)]
struct Cli {
    /// Prometheus listener address (host:port). Overrides CANDLEWIRE_METRICS_ADDR.
    #[arg(long, global = true)]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline against the configured candle file at the configured pace.
    Run {
        /// Config file path (TOML). If omitted, uses env CANDLEWIRE_CONFIG.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run the pipeline draining the candle file as fast as it will go.
    Replay {
        /// Config file path (TOML). If omitted, uses env CANDLEWIRE_CONFIG.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Check config, strategy file, and candle data without trading.
    Validate {
        /// Config file path (TOML). If omitted, uses env CANDLEWIRE_CONFIG.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the summary of a finished run.
    Report {
        /// Run directory containing summary.json.
        #[arg(long)]
        run_dir: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = obs::init_tracing() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
    if let Err(err) = obs::init_metrics(cli.metrics_addr.as_deref()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    let result = match cli.command {
        Command::Run { config } => commands::run::execute(config, Pacing::Configured),
        Command::Replay { config } => commands::run::execute(config, Pacing::Drain),
        Command::Validate { config } => commands::validate::execute(config),
        Command::Report { run_dir } => commands::report::execute(&run_dir),
    };

    match result {
        Ok(status) => {
            println!(
                "{}",
                serde_json::to_string(&status)
                    .unwrap_or_else(|_| "{\"status\":\"error\",\"error\":\"json\"}".to_string())
            );
        }
        Err(err) => {
            let code = if err.to_lowercase().contains("validation failed") {
                2
            } else {
                1
            };
            eprintln!("error: {err}");
            std::process::exit(code);
        }
    }
}
