mod cli;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use hearth_core::config::RuntimeConfig;
use hearth_core::kernel::Runtime;
use hearth_core::plugin_system::{resolve, ManifestLoader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{CliArgs, Commands};

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hearth={level},hearth_core={level}")));
    // hearth-core logs through the `log` facade.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("Failed to install log subscriber: {}", e);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_logging(args.verbose);

    match args.command {
        Commands::Check { dir } => check(&dir).await,
        Commands::Profiles => {
            print!("{}", cli::render_profiles());
            ExitCode::SUCCESS
        }
        Commands::Run {
            config,
            manifests,
            no_wait,
        } => run(config.as_deref(), manifests, no_wait).await,
    }
}

async fn check(dir: &Path) -> ExitCode {
    let scan = match ManifestLoader::load_dir(dir).await {
        Ok(scan) => scan,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    for failure in &scan.failures {
        eprintln!("error: {}", failure.error);
    }

    println!("{} manifest(s) in {}", scan.manifests.len(), dir.display());
    match resolve(&scan.manifests) {
        Ok(order) => print!("{}", cli::render_layers(&order)),
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if scan.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(config_path: Option<&Path>, manifests: Option<std::path::PathBuf>, no_wait: bool) -> ExitCode {
    let mut config = match config_path {
        Some(path) => match RuntimeConfig::load(path).await {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => RuntimeConfig::default(),
    };
    if manifests.is_some() {
        config.manifest_dir = manifests;
    }

    let runtime = match Runtime::with_defaults(config) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut code = ExitCode::SUCCESS;
    match runtime.boot().await {
        Ok((report, outcomes)) => {
            for (origin, reason) in &report.failed {
                eprintln!("error: {}: {}", origin, reason);
            }
            if !report.is_clean() {
                code = ExitCode::FAILURE;
            }
            print!("{}", cli::render_start(&outcomes));
        }
        Err(e) => {
            error!("Boot failed: {}", e);
            eprintln!("error: {}", e);
            code = ExitCode::FAILURE;
        }
    }

    if !no_wait {
        info!("Running; press Ctrl-C to stop");
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
        }
    }

    match runtime.shutdown().await {
        Ok(results) => {
            println!("shutdown complete");
            print!("{}", cli::render_stop(&results));
        }
        Err(e) => {
            eprintln!("error: {}", e);
            code = ExitCode::FAILURE;
        }
    }
    code
}
