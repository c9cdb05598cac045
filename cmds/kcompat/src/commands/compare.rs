//! `kcompat compare`: migration readiness from two fact files.

use std::{
	fs,
	io::Write,
	path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::Args;
use kcompat_facts::{diff, parse, FactModel};

use super::Outcome;
use crate::{
	config::KcompatConfig,
	report::{self, ColorMode, OutputFormat},
};

#[derive(Args)]
pub struct CompareArgs {
	/// Facts of the cluster being migrated from
	pub source: PathBuf,

	/// Facts of the cluster being migrated to
	pub target: PathBuf,

	/// Report format
	#[arg(short, long, default_value = "table", value_enum)]
	pub output: OutputFormat,

	/// Controls color in table output, must be "auto", "always", or "never"
	#[arg(long, default_value = "auto", value_enum)]
	pub color: ColorMode,

	/// Exit with 0 even when an assessment fails
	#[arg(short = 'z', long)]
	pub exit_zero: bool,
}

/// Run the compare command.
pub fn run<W: Write>(args: CompareArgs, config: &KcompatConfig, writer: W) -> Result<Outcome> {
	let source = read_facts(&args.source)?;
	let target = read_facts(&args.target)?;

	let report = diff(&source, &target, &config.diff_options());
	report::write_diff(writer, &report, args.output, args.color).context("writing report")?;

	Ok(Outcome::new(report.has_failures(), args.exit_zero))
}

fn read_facts(path: &Path) -> Result<FactModel> {
	let text =
		fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
	parse(&text).with_context(|| format!("parsing {}", path.display()))
}
