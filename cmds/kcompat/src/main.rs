use std::{path::PathBuf, process::ExitCode};

use anyhow::Result;
use clap::{Parser, Subcommand};
use kcompat::{
	commands::{self, util::BrokenPipeGuard, Outcome, EXIT_ERROR},
	config::KcompatConfig,
	telemetry,
};
use tracing::Level;

#[cfg(all(
	target_os = "linux",
	feature = "mimalloc",
	not(feature = "system-alloc")
))]
#[global_allocator]
static GLOBAL: mimallocator::Mimalloc = mimallocator::Mimalloc;

#[derive(Parser)]
#[command(name = "kcompat")]
#[command(about = "Kubernetes compatibility assessment", long_about = None)]
#[command(version = env!("KCOMPAT_VERSION"))]
struct Cli {
	/// Log level (error, warn, info, debug, trace). Overrides RUST_LOG
	#[arg(long, global = true)]
	log_level: Option<Level>,

	/// Config file to use instead of searching for .kcompat.yaml
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Check manifests against a target cluster
	Check(commands::check::CheckArgs),

	/// Capture the facts of a cluster
	Snapshot(commands::snapshot::SnapshotArgs),

	/// Compare the facts of two clusters
	Compare(commands::compare::CompareArgs),
}

fn run(cli: Cli) -> Result<Outcome> {
	let config = KcompatConfig::resolve(cli.config.as_deref())?;
	let stdout = BrokenPipeGuard::new(std::io::stdout().lock());

	match cli.command {
		Commands::Check(args) => commands::check::run(args, &config, stdout),
		Commands::Snapshot(args) => commands::snapshot::run(args, &config, stdout),
		Commands::Compare(args) => commands::compare::run(args, &config, stdout),
	}
}

fn main() -> ExitCode {
	let cli = Cli::parse();

	let _telemetry = match telemetry::init(cli.log_level) {
		Ok(guard) => guard,
		Err(e) => {
			eprintln!("Error: {e:?}");
			return ExitCode::from(EXIT_ERROR);
		}
	};

	match run(cli) {
		Ok(outcome) => outcome.exit_code(),
		Err(e) => {
			eprintln!("Error: {e:?}");
			ExitCode::from(EXIT_ERROR)
		}
	}
}
