//! Rendering of check reports and fact comparisons.

use std::io::{self, IsTerminal, Write};

use clap::ValueEnum;
use kcompat_facts::{Assessment, DiffReport, DiffRow};
use nu_ansi_term::Color;
use serde::Serialize;
use tabwriter::TabWriter;
use thiserror::Error;

use crate::evaluate::{Report, Status, Verdict};

#[derive(Debug, Error)]
pub enum ReportError {
	#[error("writing report")]
	Write(#[from] io::Error),

	#[error("serializing report")]
	Json(#[from] serde_json::Error),
}

/// Output format of `check` and `compare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
	/// Aligned columns
	#[default]
	Table,
	/// RFC 4180 comma separated values
	Csv,
	/// A single JSON document
	Json,
}

/// Whether to colour the result column of tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
	/// Colour when stdout is a terminal
	#[default]
	Auto,
	Always,
	Never,
}

impl ColorMode {
	pub fn should_colorize(self) -> bool {
		match self {
			ColorMode::Auto => io::stdout().is_terminal(),
			ColorMode::Always => true,
			ColorMode::Never => false,
		}
	}
}

/// A record that renders as one row.
trait Record {
	const HEADERS: &'static [&'static str];
	/// Index of the coloured column.
	const RESULT_COLUMN: usize;

	fn cells(&self) -> Vec<String>;
	fn color(&self) -> Option<Color>;
}

impl Record for Verdict {
	const HEADERS: &'static [&'static str] = &["Check", "Item", "Result", "Details"];
	const RESULT_COLUMN: usize = 2;

	fn cells(&self) -> Vec<String> {
		vec![
			self.check.to_string(),
			self.item.clone(),
			self.status.to_string(),
			self.details.clone(),
		]
	}

	fn color(&self) -> Option<Color> {
		Some(match self.status {
			Status::Ok => Color::Green,
			Status::Warn => Color::Yellow,
			Status::Fail => Color::Red,
			Status::Info => Color::Cyan,
		})
	}
}

impl Record for DiffRow {
	const HEADERS: &'static [&'static str] = &["Key", "Source", "Target", "Assessment", "Notes"];
	const RESULT_COLUMN: usize = 3;

	fn cells(&self) -> Vec<String> {
		vec![
			self.key.clone(),
			self.value_a.clone(),
			self.value_b.clone(),
			self.assessment.to_string(),
			self.notes.clone(),
		]
	}

	fn color(&self) -> Option<Color> {
		match self.assessment {
			Assessment::Ok => Some(Color::Green),
			Assessment::Warn => Some(Color::Yellow),
			Assessment::Fail => Some(Color::Red),
			Assessment::Diff => Some(Color::Purple),
			Assessment::Same => None,
		}
	}
}

/// Render the verdicts of `kcompat check`.
pub fn write_report<W: Write>(
	mut writer: W,
	report: &Report,
	format: OutputFormat,
	color: ColorMode,
) -> Result<(), ReportError> {
	match format {
		OutputFormat::Table => {
			write_table(&mut writer, &report.verdicts, color.should_colorize())?;
			writeln!(
				writer,
				"\n{} OK, {} WARN, {} FAIL, {} INFO",
				report.count(Status::Ok),
				report.count(Status::Warn),
				report.count(Status::Fail),
				report.count(Status::Info),
			)?;
		}
		OutputFormat::Csv => write_csv(&mut writer, &report.verdicts)?,
		OutputFormat::Json => write_json(&mut writer, report)?,
	}
	writer.flush()?;
	Ok(())
}

/// Render the rows of `kcompat compare`.
pub fn write_diff<W: Write>(
	mut writer: W,
	report: &DiffReport,
	format: OutputFormat,
	color: ColorMode,
) -> Result<(), ReportError> {
	match format {
		OutputFormat::Table => write_table(&mut writer, &report.rows, color.should_colorize())?,
		OutputFormat::Csv => write_csv(&mut writer, &report.rows)?,
		OutputFormat::Json => write_json(&mut writer, report)?,
	}
	writer.flush()?;
	Ok(())
}

fn write_table<W: Write, R: Record>(writer: W, records: &[R], use_color: bool) -> io::Result<()> {
	let mut tw = TabWriter::new(writer).padding(2).ansi(use_color);

	writeln!(tw, "{}", R::HEADERS.join("\t"))?;
	for record in records {
		let cells: Vec<String> = record
			.cells()
			.into_iter()
			.enumerate()
			.map(|(i, cell)| {
				let cell = cell.replace('\t', " ");
				match record.color() {
					Some(color) if use_color && i == R::RESULT_COLUMN => {
						color.bold().paint(cell).to_string()
					}
					_ => cell,
				}
			})
			.collect();
		writeln!(tw, "{}", cells.join("\t"))?;
	}
	tw.flush()
}

fn write_csv<W: Write, R: Record>(mut writer: W, records: &[R]) -> io::Result<()> {
	let header: Vec<String> = R::HEADERS.iter().map(|h| csv_field(h)).collect();
	writeln!(writer, "{}", header.join(","))?;
	for record in records {
		let row: Vec<String> = record.cells().iter().map(|c| csv_field(c)).collect();
		writeln!(writer, "{}", row.join(","))?;
	}
	Ok(())
}

/// Quote a field when it contains a separator, a quote or a line break.
fn csv_field(field: &str) -> String {
	if field.contains([',', '"', '\n', '\r']) {
		format!("\"{}\"", field.replace('"', "\"\""))
	} else {
		field.to_string()
	}
}

fn write_json<W: Write, T: Serialize>(mut writer: W, value: &T) -> Result<(), ReportError> {
	serde_json::to_writer_pretty(&mut writer, value)?;
	writeln!(writer)?;
	Ok(())
}
