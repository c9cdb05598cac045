//! `kcompat snapshot`: write a cluster's facts to a flat file.

use std::{
	collections::BTreeMap,
	fs::File,
	io::{BufWriter, Write},
	path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Args;
use kcompat_facts::{FactError, FactSink, FactWriter};
use tracing::info;

use super::{util::create_tokio_runtime, Outcome};
use crate::{
	config::KcompatConfig,
	k8s::{client::ClusterConnection, discovery::ApiSurface},
	snapshot::FactCollector,
};

#[derive(Args)]
pub struct SnapshotArgs {
	/// Kubeconfig context to snapshot. Defaults to the current context
	#[arg(long)]
	pub context: Option<String>,

	/// Write facts to this file instead of stdout
	#[arg(short, long)]
	pub out: Option<PathBuf>,
}

/// Run the snapshot command.
pub fn run<W: Write>(args: SnapshotArgs, config: &KcompatConfig, writer: W) -> Result<Outcome> {
	let runtime = create_tokio_runtime()?;
	runtime.block_on(run_async(args, config, writer))
}

async fn run_async<W: Write>(
	args: SnapshotArgs,
	config: &KcompatConfig,
	writer: W,
) -> Result<Outcome> {
	let connection = ClusterConnection::connect(args.context.as_deref())
		.await
		.context("connecting to cluster")?;

	let written = match &args.out {
		Some(path) => {
			let file = File::create(path)
				.with_context(|| format!("creating {}", path.display()))?;
			let mut sink = FactWriter::new(BufWriter::new(file));
			take_snapshot(&connection, &config.cni_markers, &mut sink)
				.await
				.with_context(|| format!("writing {}", path.display()))?;
			let written = sink.written();
			sink.into_inner()
				.flush()
				.with_context(|| format!("writing {}", path.display()))?;
			written
		}
		None => {
			let mut sink = FactWriter::new(writer);
			take_snapshot(&connection, &config.cni_markers, &mut sink)
				.await
				.context("writing facts")?;
			let written = sink.written();
			sink.into_inner().flush().context("writing facts")?;
			written
		}
	};

	info!(context = connection.context(), facts = written, "snapshot complete");
	Ok(Outcome::Clean)
}

/// Discover the API surface and emit every fact of the cluster into `sink`.
pub async fn take_snapshot<S: FactSink>(
	connection: &ClusterConnection,
	cni_markers: &BTreeMap<String, String>,
	sink: &mut S,
) -> Result<(), FactError> {
	let surface = ApiSurface::discover(connection.client()).await;
	FactCollector::new(connection, cni_markers)
		.collect(surface.as_ref(), sink)
		.await
}
