//! Set-valued facts.
//!
//! List-valued facts are stored as a single string: items sorted, deduplicated
//! and joined with [`DELIMITER`]. Items may themselves contain the delimiter or
//! the escape character; both are backslash-escaped so that decoding is exact.

use std::{collections::BTreeSet, fmt};

/// Separator between encoded set items.
pub const DELIMITER: char = ';';

const ESCAPE: char = '\\';

/// An ordered set of fact items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FactSet(BTreeSet<String>);

impl FactSet {
	pub fn new() -> Self {
		Self::default()
	}

	/// Decode an encoded set value.
	///
	/// The empty string decodes to the empty set.
	pub fn decode(encoded: &str) -> Self {
		let mut items = BTreeSet::new();
		if encoded.is_empty() {
			return Self(items);
		}

		let mut current = String::new();
		let mut chars = encoded.chars();
		while let Some(c) = chars.next() {
			match c {
				ESCAPE => {
					// A trailing lone escape is kept literally.
					current.push(chars.next().unwrap_or(ESCAPE));
				}
				DELIMITER => {
					items.insert(std::mem::take(&mut current));
				}
				other => current.push(other),
			}
		}
		items.insert(current);

		Self(items)
	}

	/// Encode the set into its single-string form.
	pub fn encode(&self) -> String {
		let mut out = String::new();
		for (i, item) in self.0.iter().enumerate() {
			if i > 0 {
				out.push(DELIMITER);
			}
			for c in item.chars() {
				if c == DELIMITER || c == ESCAPE {
					out.push(ESCAPE);
				}
				out.push(c);
			}
		}
		out
	}

	pub fn insert(&mut self, item: impl Into<String>) -> bool {
		self.0.insert(item.into())
	}

	pub fn contains(&self, item: &str) -> bool {
		self.0.contains(item)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(String::as_str)
	}

	/// Items of `self` that are missing from `other`, sorted.
	pub fn difference(&self, other: &FactSet) -> FactSet {
		Self(self.0.difference(&other.0).cloned().collect())
	}

	pub fn union(&self, other: &FactSet) -> FactSet {
		Self(self.0.union(&other.0).cloned().collect())
	}

	/// True when every item of `other` is present in `self`.
	pub fn is_superset_of(&self, other: &FactSet) -> bool {
		other.difference(self).is_empty()
	}

	/// Apply `f` to every item, collapsing duplicates produced by the mapping.
	pub fn map(&self, f: impl Fn(&str) -> String) -> FactSet {
		self.iter().map(f).collect()
	}

	pub fn into_inner(self) -> BTreeSet<String> {
		self.0
	}
}

impl<S: Into<String>> FromIterator<S> for FactSet {
	fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
		Self(iter.into_iter().map(Into::into).collect())
	}
}

impl<'a> IntoIterator for &'a FactSet {
	type Item = &'a String;
	type IntoIter = std::collections::btree_set::Iter<'a, String>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.iter()
	}
}

/// Renders items joined with `,` for human-readable notes.
impl fmt::Display for FactSet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, item) in self.0.iter().enumerate() {
			if i > 0 {
				f.write_str(",")?;
			}
			f.write_str(item)?;
		}
		Ok(())
	}
}
