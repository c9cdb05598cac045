//! Optional `.kcompat.yaml` settings.
//!
//! The file is looked up from the working directory upward to the filesystem
//! root, unless a path is given with `--config`. Command-line flags win over
//! values from the file.

use std::{
	collections::BTreeMap,
	fs,
	path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use kcompat_facts::DiffOptions;
use serde::Deserialize;

use crate::inventory::DEFAULT_SERVICE_ACCOUNT_CONCURRENCY;

/// The name of the config file kcompat looks for
pub const CONFIG_FILE_NAME: &str = ".kcompat.yaml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KcompatConfig {
	/// Plural resource names that `compare` requires on the target.
	#[serde(default)]
	pub must_have_resources: Option<Vec<String>>,

	/// Extra kube-system DaemonSet name fragments mapped to a CNI name.
	/// Checked before the built-in markers.
	#[serde(default)]
	pub cni_markers: BTreeMap<String, String>,

	/// Whether `check` runs the server-side dry-run pass.
	#[serde(default)]
	pub dry_run: Option<bool>,

	/// Parallel service account lookups during `check`.
	#[serde(default)]
	pub service_account_concurrency: Option<usize>,
}

impl KcompatConfig {
	/// Load `explicit` when given, else search upward from the working directory.
	/// No file found means defaults.
	pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
		if let Some(path) = explicit {
			return Self::load_from_file(path);
		}
		let cwd = std::env::current_dir().context("determining working directory")?;
		Ok(Self::load_from_directory(&cwd)?.unwrap_or_default())
	}

	/// Load config by searching from the given directory upward
	pub fn load_from_directory(start_dir: &Path) -> Result<Option<Self>> {
		match find_config_file(start_dir) {
			Some(path) => {
				tracing::debug!(path = %path.display(), "using config file");
				Self::load_from_file(&path).map(Some)
			}
			None => Ok(None),
		}
	}

	/// Load config from a specific file path
	pub fn load_from_file(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path)
			.with_context(|| format!("failed to read config file: {}", path.display()))?;
		if content.trim().is_empty() {
			return Ok(Self::default());
		}
		let config: KcompatConfig = serde_yaml_with_quirks::from_str(&content)
			.with_context(|| format!("failed to parse config file: {}", path.display()))?;
		Ok(config)
	}

	pub fn diff_options(&self) -> DiffOptions {
		match &self.must_have_resources {
			Some(resources) => DiffOptions {
				must_have_resources: resources.clone(),
			},
			None => DiffOptions::default(),
		}
	}

	/// The dry-run setting after applying `--skip-dry-run`.
	pub fn dry_run_enabled(&self, skip_flag: bool) -> bool {
		!skip_flag && self.dry_run.unwrap_or(true)
	}

	pub fn service_account_concurrency(&self) -> usize {
		self.service_account_concurrency
			.filter(|n| *n > 0)
			.unwrap_or(DEFAULT_SERVICE_ACCOUNT_CONCURRENCY)
	}
}

/// Search for a config file starting from `start_dir` and walking up to the filesystem root
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let start = start_dir
		.canonicalize()
		.unwrap_or_else(|_| start_dir.to_path_buf());

	start
		.ancestors()
		.map(|dir| dir.join(CONFIG_FILE_NAME))
		.find(|candidate| candidate.is_file())
}
