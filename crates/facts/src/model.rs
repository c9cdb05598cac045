//! The flat fact model: dotted keys mapped to string values.

use std::collections::{btree_map, BTreeMap};

use thiserror::Error;

use crate::set::FactSet;

/// Errors produced while building or parsing a fact model.
#[derive(Debug, Error)]
pub enum FactError {
	#[error("invalid fact key {0:?}: keys must be non-empty, not start with '#' and contain no '=' or whitespace")]
	InvalidKey(String),

	#[error("line {line}: expected `key=value`, got {content:?}")]
	MalformedLine { line: usize, content: String },

	#[error("writing fact output")]
	Write(#[from] std::io::Error),
}

/// Check that a key can be represented in the flat text format.
pub fn validate_key(key: &str) -> Result<(), FactError> {
	if key.is_empty()
		|| key.starts_with('#')
		|| key.contains('=')
		|| key.chars().any(char::is_whitespace)
	{
		return Err(FactError::InvalidKey(key.to_string()));
	}
	Ok(())
}

/// Collapse a value to a single trimmed line.
pub fn sanitize_value(value: &str) -> String {
	value
		.replace("\r\n", " ")
		.replace(['\r', '\n'], " ")
		.trim()
		.to_string()
}

/// Receiver of collected facts.
///
/// Collectors emit every fact as soon as it is known; implementations decide
/// whether to buffer ([`FactModel`]) or stream ([`crate::codec::FactWriter`]).
pub trait FactSink {
	fn emit(&mut self, key: &str, value: &str) -> Result<(), FactError>;

	fn emit_set(&mut self, key: &str, items: &FactSet) -> Result<(), FactError> {
		self.emit(key, &items.encode())
	}

	fn emit_count(&mut self, key: &str, count: usize) -> Result<(), FactError> {
		self.emit(key, &count.to_string())
	}
}

/// A snapshot of one cluster's observable configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactModel {
	facts: BTreeMap<String, String>,
}

impl FactModel {
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert a scalar value, sanitizing it to a single line.
	pub fn insert(&mut self, key: &str, value: &str) -> Result<(), FactError> {
		validate_key(key)?;
		self.facts.insert(key.to_string(), sanitize_value(value));
		Ok(())
	}

	/// Insert an already encoded value without sanitizing it.
	pub(crate) fn insert_raw(&mut self, key: String, value: String) -> Option<String> {
		self.facts.insert(key, value)
	}

	/// Insert a set value; every item is sanitized before encoding.
	pub fn insert_set(&mut self, key: &str, items: &FactSet) -> Result<(), FactError> {
		validate_key(key)?;
		self.facts
			.insert(key.to_string(), items.map(sanitize_value).encode());
		Ok(())
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.facts.get(key).map(String::as_str)
	}

	/// Decode a set-valued fact. Returns `None` when the key is absent.
	pub fn get_set(&self, key: &str) -> Option<FactSet> {
		self.get(key).map(FactSet::decode)
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.facts.contains_key(key)
	}

	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.facts.keys().map(String::as_str)
	}

	pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
		self.facts.iter()
	}

	pub fn len(&self) -> usize {
		self.facts.len()
	}

	pub fn is_empty(&self) -> bool {
		self.facts.is_empty()
	}
}

impl FactSink for FactModel {
	fn emit(&mut self, key: &str, value: &str) -> Result<(), FactError> {
		self.insert(key, value)
	}

	fn emit_set(&mut self, key: &str, items: &FactSet) -> Result<(), FactError> {
		self.insert_set(key, items)
	}
}
