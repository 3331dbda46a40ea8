#![warn(clippy::all, clippy::pedantic)]

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tcprobe::{ProbeSink, Prober, TcpProber, WriterSink};
use tracing::{error, level_filters::LevelFilter};

mod config;

use config::{Config, DEFAULT_MODULE};

/// Run a scripted TCP probe against a target and print the results
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file holding the probe modules
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Module to probe with
    #[arg(short, long, default_value = DEFAULT_MODULE)]
    module: String,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Print the loaded configuration and exit
    #[arg(long)]
    show_config: bool,

    /// Target as host:port
    #[arg(required_unless_present = "show_config")]
    target: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init_tracing_with_level(if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO });

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = Config::from_config(cli.config.as_deref()).context("loading configuration")?;
    if cli.show_config {
        print!("{config}");
        return Ok(true);
    }

    let target = cli.target.context("a target is required")?;
    let module = config.module(&cli.module)?.clone();
    let prober = TcpProber::new(module);

    let mut sink = WriterSink::new(io::stdout());
    let start = Instant::now();
    let success = prober.probe(&target, &mut sink).await;
    let duration = format!("{:.6}", start.elapsed().as_secs_f64());

    sink.emit("probe_success", &u8::from(success));
    sink.emit("probe_duration_seconds", &duration);
    Ok(success)
}
