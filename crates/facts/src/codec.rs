//! Flat `key=value` text format for fact models.
//!
//! One fact per line. Blank lines and lines starting with `#` are ignored.
//! The value is everything after the first `=`, so values may contain `=`.

use std::io::Write;

use tracing::warn;

use crate::{
	model::{sanitize_value, validate_key, FactError, FactModel, FactSink},
	set::FactSet,
};

/// Render a model in the flat text format, sorted by key.
pub fn to_text(model: &FactModel) -> String {
	let mut out = String::new();
	for (key, value) in model.iter() {
		out.push_str(key);
		out.push('=');
		out.push_str(value);
		out.push('\n');
	}
	out
}

/// Parse the flat text format.
///
/// Later duplicates override earlier ones.
pub fn parse(text: &str) -> Result<FactModel, FactError> {
	let mut model = FactModel::new();

	for (idx, line) in text.lines().enumerate() {
		let trimmed = line.trim_end_matches('\r');
		if trimmed.trim().is_empty() || trimmed.starts_with('#') {
			continue;
		}

		let Some((key, value)) = trimmed.split_once('=') else {
			return Err(FactError::MalformedLine {
				line: idx + 1,
				content: trimmed.to_string(),
			});
		};
		validate_key(key)?;

		if model
			.insert_raw(key.to_string(), value.to_string())
			.is_some()
		{
			warn!(key, line = idx + 1, "duplicate fact key, keeping the later value");
		}
	}

	Ok(model)
}

/// A [`FactSink`] that writes each fact to the underlying writer as soon as it
/// is emitted.
pub struct FactWriter<W: Write> {
	inner: W,
	written: usize,
}

impl<W: Write> FactWriter<W> {
	pub fn new(inner: W) -> Self {
		Self { inner, written: 0 }
	}

	/// Number of facts written so far.
	pub fn written(&self) -> usize {
		self.written
	}

	pub fn into_inner(self) -> W {
		self.inner
	}

	fn write_line(&mut self, key: &str, encoded: &str) -> Result<(), FactError> {
		validate_key(key)?;
		writeln!(self.inner, "{key}={encoded}")?;
		self.inner.flush()?;
		self.written += 1;
		Ok(())
	}
}

impl<W: Write> FactSink for FactWriter<W> {
	fn emit(&mut self, key: &str, value: &str) -> Result<(), FactError> {
		self.write_line(key, &sanitize_value(value))
	}

	fn emit_set(&mut self, key: &str, items: &FactSet) -> Result<(), FactError> {
		self.write_line(key, &items.map(sanitize_value).encode())
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use indoc::indoc;

	use super::*;

	#[test]
	fn test_parse_skips_comments_and_blank_lines() {
		let model = parse(indoc! {"
			# snapshot of prod
			cluster.server_version=v1.29.4

			storage.default=gp3
			apis.preferred=apps/v1;batch/v1;v1
		"})
		.unwrap();

		assert_eq!(model.len(), 3);
		assert_eq!(model.get("storage.default"), Some("gp3"));
		assert_eq!(model.get_set("apis.preferred").unwrap().len(), 3);
	}

	#[test]
	fn test_parse_splits_at_first_equals() {
		let input = "addons.kube_system=DaemonSet/kube-proxy=registry.k8s.io/kube-proxy:v1.29.4\n";
		let model = parse(input).unwrap();
		assert_eq!(
			model.get("addons.kube_system"),
			Some("DaemonSet/kube-proxy=registry.k8s.io/kube-proxy:v1.29.4")
		);
	}

	#[test]
	fn test_parse_keeps_empty_values() {
		let model = parse("storage.default=\n").unwrap();
		assert_eq!(model.get("storage.default"), Some(""));
	}

	#[test]
	fn test_parse_rejects_line_without_separator() {
		assert_matches!(
			parse("nodes.count=3\ngarbage\n"),
			Err(FactError::MalformedLine { line: 2, content }) if content == "garbage"
		);
	}

	#[test]
	fn test_parse_last_duplicate_wins() {
		let model = parse("nodes.count=3\nnodes.count=5\n").unwrap();
		assert_eq!(model.get("nodes.count"), Some("5"));
	}

	#[test]
	fn test_text_round_trip() {
		let mut model = FactModel::new();
		model.insert("cluster.context", "prod-eu").unwrap();
		model.insert("network.cni", "cilium").unwrap();
		model
			.insert_set(
				"crds.names",
				&["certificates.cert-manager.io", "odd;name"].into_iter().collect(),
			)
			.unwrap();
		model.insert_set("storage.classes", &FactSet::new()).unwrap();

		let text = to_text(&model);
		assert_eq!(parse(&text).unwrap(), model);
	}

	#[test]
	fn test_writer_streams_each_fact() {
		let mut writer = FactWriter::new(Vec::new());
		writer.emit("nodes.count", "2").unwrap();
		writer
			.emit_set("ingress.classes", &["nginx", "alb"].into_iter().collect())
			.unwrap();
		writer.emit("cluster.platform", "linux/\namd64").unwrap();

		assert_eq!(writer.written(), 3);
		let out = String::from_utf8(writer.into_inner()).unwrap();
		assert_eq!(
			out,
			"nodes.count=2\ningress.classes=alb;nginx\ncluster.platform=linux/ amd64\n"
		);
	}

	#[test]
	fn test_writer_rejects_invalid_key() {
		let mut writer = FactWriter::new(Vec::new());
		assert_matches!(writer.emit("bad key", "x"), Err(FactError::InvalidKey(_)));
		// Would read back as a comment.
		assert_matches!(writer.emit("#weird", "x"), Err(FactError::InvalidKey(_)));
		assert_eq!(writer.written(), 0);
		assert!(writer.into_inner().is_empty());
	}
}
