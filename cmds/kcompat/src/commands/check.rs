//! `kcompat check`: will these manifests work on that cluster?

use std::{io::Write, path::PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, instrument, warn};

use super::{util::create_tokio_runtime, Outcome};
use crate::{
	config::KcompatConfig,
	evaluate::{evaluate, DryRunOutcome, Report},
	inventory::{describe_error, Collector, Inventory},
	k8s::{
		client::{ClusterConnection, ConnectionError},
		discovery::ApiSurface,
		dry_run::DryRunValidator,
	},
	manifest::{self, Bundle},
	report::{self, ColorMode, OutputFormat},
	requirements::Requirements,
};

#[derive(Args)]
pub struct CheckArgs {
	/// Manifest files or directories (searched recursively for .yaml, .yml and .json)
	#[arg(required = true)]
	pub paths: Vec<PathBuf>,

	/// Kubeconfig context of the target cluster. Defaults to the current context
	#[arg(long)]
	pub context: Option<String>,

	/// Do not submit the bundle for server-side dry-run validation
	#[arg(long)]
	pub skip_dry_run: bool,

	/// Report format
	#[arg(short, long, default_value = "table", value_enum)]
	pub output: OutputFormat,

	/// Controls color in table output, must be "auto", "always", or "never"
	#[arg(long, default_value = "auto", value_enum)]
	pub color: ColorMode,

	/// Exit with 0 even when checks fail
	#[arg(short = 'z', long)]
	pub exit_zero: bool,
}

/// Run the check command.
pub fn run<W: Write>(args: CheckArgs, config: &KcompatConfig, writer: W) -> Result<Outcome> {
	let bundle = manifest::load(&args.paths).context("loading manifests")?;

	let report = if bundle.is_empty() {
		info!("no documents found; not contacting the cluster");
		Report::empty_bundle()
	} else {
		let runtime = create_tokio_runtime()?;
		runtime.block_on(check_cluster(&args, config, &bundle))?
	};

	report::write_report(writer, &report, args.output, args.color).context("writing report")?;
	Ok(Outcome::new(report.has_failures(), args.exit_zero))
}

#[instrument(skip_all, fields(documents = bundle.len()))]
async fn check_cluster(
	args: &CheckArgs,
	config: &KcompatConfig,
	bundle: &Bundle,
) -> Result<Report> {
	let dry_run = config.dry_run_enabled(args.skip_dry_run);
	let connection = ClusterConnection::connect(args.context.as_deref()).await;
	assess_connection(connection, bundle, config, dry_run).await
}

/// Evaluate `bundle` given the outcome of connecting to the target.
///
/// An unreachable cluster still yields a full report in which every
/// capability is unknown. Kubeconfig problems are returned as errors.
pub async fn assess_connection(
	connection: Result<ClusterConnection, ConnectionError>,
	bundle: &Bundle,
	config: &KcompatConfig,
	dry_run: bool,
) -> Result<Report> {
	match connection {
		Ok(connection) => Ok(assess(&connection, bundle, config, dry_run).await),
		Err(ConnectionError::Kube(e)) => {
			let message = describe_error(&e);
			warn!(error = %message, "cluster unreachable; every capability is unknown");
			let outcome = if dry_run {
				DryRunOutcome::Unavailable(message.clone())
			} else {
				DryRunOutcome::Skipped
			};
			Ok(evaluate(
				&Requirements::extract(bundle),
				&Inventory::unreachable(&message),
				&outcome,
			))
		}
		Err(e) => Err(e).context("connecting to cluster"),
	}
}

/// Evaluate `bundle` against a connected cluster.
#[instrument(skip_all, fields(context = connection.context()))]
pub async fn assess(
	connection: &ClusterConnection,
	bundle: &Bundle,
	config: &KcompatConfig,
	dry_run: bool,
) -> Report {
	let requirements = Requirements::extract(bundle);
	let client = connection.client().clone();

	let surface = ApiSurface::discover(&client).await;
	let inventory = Collector::builder()
		.client(client.clone())
		.service_account_concurrency(config.service_account_concurrency())
		.build()
		.collect(surface.as_ref(), &requirements)
		.await;

	let outcome = match &surface {
		_ if !dry_run => DryRunOutcome::Skipped,
		Ok(surface) => {
			let namespace = connection.default_namespace().to_string();
			let validator = DryRunValidator::new(client, surface, namespace);
			DryRunOutcome::Completed(validator.validate(bundle).await)
		}
		Err(e) => DryRunOutcome::Unavailable(describe_error(e)),
	};

	evaluate(&requirements, &inventory, &outcome)
}
