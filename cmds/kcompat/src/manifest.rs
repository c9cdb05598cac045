//! Loading manifest bundles from disk.
//!
//! A bundle is the ordered list of Kubernetes documents found in the given
//! files and directories. Directories are walked recursively and files are read
//! in path order, so the same inputs always produce the same bundle.

use std::{
	fs,
	path::{Path, PathBuf},
};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, trace};
use walkdir::WalkDir;

/// File extensions treated as manifests when walking directories.
const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

#[derive(Debug, Error)]
pub enum ManifestError {
	#[error("reading {}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("parsing {}: {message}", path.display())]
	Parse { path: PathBuf, message: String },

	#[error("walking {}", path.display())]
	Walk {
		path: PathBuf,
		#[source]
		source: walkdir::Error,
	},
}

/// An ordered sequence of manifest documents.
///
/// Every document is a JSON object. `List` wrappers are flattened into their
/// items when the bundle is built; `null` and scalar documents are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bundle {
	documents: Vec<Value>,
}

impl Bundle {
	pub fn new(documents: impl IntoIterator<Item = Value>) -> Self {
		let mut flat = Vec::new();
		for doc in documents {
			flatten_into(doc, &mut flat);
		}
		Self { documents: flat }
	}

	/// Parse a multi-document YAML (or JSON) string.
	pub fn from_yaml(text: &str) -> Result<Self, String> {
		parse_documents(text).map(Self::new)
	}

	pub fn documents(&self) -> &[Value] {
		&self.documents
	}

	pub fn len(&self) -> usize {
		self.documents.len()
	}

	pub fn is_empty(&self) -> bool {
		self.documents.is_empty()
	}
}

fn is_list_kind(doc: &Value) -> bool {
	doc.get("kind")
		.and_then(Value::as_str)
		.is_some_and(|kind| kind == "List" || kind.ends_with("List"))
}

fn flatten_into(doc: Value, out: &mut Vec<Value>) {
	if !doc.is_object() {
		return;
	}
	if is_list_kind(&doc) {
		if let Some(Value::Array(items)) = doc.get("items") {
			for item in items.clone() {
				flatten_into(item, out);
			}
			return;
		}
	}
	out.push(doc);
}

fn parse_documents(text: &str) -> Result<Vec<Value>, String> {
	let options = serde_saphyr::Options {
		legacy_octal_numbers: true,
		budget: None,
		..Default::default()
	};
	serde_saphyr::from_multiple_with_options(text, options).map_err(|e| e.to_string())
}

/// Load every manifest below `paths` into one bundle.
#[instrument(skip_all, fields(paths = paths.len()))]
pub fn load(paths: &[PathBuf]) -> Result<Bundle, ManifestError> {
	let mut documents = Vec::new();

	for path in paths {
		for file in manifest_files(path)? {
			trace!(file = %file.display(), "reading manifest file");
			let text = fs::read_to_string(&file).map_err(|source| ManifestError::Read {
				path: file.clone(),
				source,
			})?;
			let docs = parse_documents(&text).map_err(|message| ManifestError::Parse {
				path: file.clone(),
				message,
			})?;
			documents.extend(docs);
		}
	}

	let bundle = Bundle::new(documents);
	debug!(documents = bundle.len(), "loaded manifest bundle");
	Ok(bundle)
}

/// Files to read for one input path: the path itself when it is a file,
/// otherwise every manifest file below it in sorted order. Hidden directories
/// are skipped.
fn manifest_files(path: &Path) -> Result<Vec<PathBuf>, ManifestError> {
	let metadata = fs::metadata(path).map_err(|source| ManifestError::Read {
		path: path.to_path_buf(),
		source,
	})?;
	if metadata.is_file() {
		return Ok(vec![path.to_path_buf()]);
	}

	let walker = WalkDir::new(path)
		.follow_links(true)
		.sort_by_file_name()
		.into_iter()
		.filter_entry(|e| {
			e.depth() == 0
				|| !e.file_type().is_dir()
				|| !e.file_name().to_string_lossy().starts_with('.')
		});

	let mut files = Vec::new();
	for entry in walker {
		let entry = entry.map_err(|source| ManifestError::Walk {
			path: path.to_path_buf(),
			source,
		})?;
		let is_manifest = entry
			.path()
			.extension()
			.and_then(|ext| ext.to_str())
			.is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext));
		if entry.file_type().is_file() && is_manifest {
			files.push(entry.into_path());
		}
	}
	Ok(files)
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use indoc::indoc;
	use serde_json::json;

	use super::*;

	#[test]
	fn test_multi_document_yaml() {
		let bundle = Bundle::from_yaml(indoc! {"
			apiVersion: v1
			kind: Namespace
			metadata:
			  name: billing
			---
			---
			apiVersion: apps/v1
			kind: Deployment
			metadata:
			  name: api
			  namespace: billing
		"})
		.unwrap();

		assert_eq!(bundle.len(), 2);
		assert_eq!(bundle.documents()[1]["kind"], "Deployment");
	}

	#[test]
	fn test_lists_are_flattened() {
		let bundle = Bundle::new([
			json!({
				"apiVersion": "v1",
				"kind": "List",
				"items": [
					{ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "a" } },
					{ "apiVersion": "v1", "kind": "ConfigMapList", "items": [
						{ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "b" } }
					] }
				]
			}),
			json!(null),
			json!("scalar"),
		]);

		let names: Vec<_> = bundle
			.documents()
			.iter()
			.map(|d| d["metadata"]["name"].as_str().unwrap())
			.collect();
		assert_eq!(names, ["a", "b"]);
	}

	#[test]
	fn test_load_walks_directories_in_order() {
		let dir = tempfile::tempdir().unwrap();
		fs::create_dir(dir.path().join("nested")).unwrap();
		fs::create_dir(dir.path().join(".git")).unwrap();
		fs::write(
			dir.path().join("b.yaml"),
			"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n",
		)
		.unwrap();
		fs::write(
			dir.path().join("nested/a.json"),
			r#"{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}}"#,
		)
		.unwrap();
		fs::write(dir.path().join("notes.txt"), "not a manifest").unwrap();
		fs::write(dir.path().join(".git/c.yaml"), "kind: Secret\n").unwrap();

		let bundle = load(&[dir.path().to_path_buf()]).unwrap();
		let names: Vec<_> = bundle
			.documents()
			.iter()
			.map(|d| d["metadata"]["name"].as_str().unwrap())
			.collect();
		assert_eq!(names, ["b", "a"]);
	}

	#[test]
	fn test_load_reports_parse_errors_with_path() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("broken.yaml");
		fs::write(&file, "kind: [unterminated\n").unwrap();

		let err = load(&[file.clone()]).unwrap_err();
		assert_matches!(err, ManifestError::Parse { path, .. } if path == file);
	}

	#[test]
	fn test_load_missing_path() {
		let err = load(&[PathBuf::from("/nonexistent/manifests")]).unwrap_err();
		assert_matches!(err, ManifestError::Read { .. });
	}
}
