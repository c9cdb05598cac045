//! The compatibility rules.
//!
//! [`evaluate`] maps every requirement of a bundle to exactly one [`Verdict`]
//! using only the requirements, the target [`Inventory`] and the outcome of
//! the dry-run pass. It does no I/O, so the same inputs always produce the
//! same report.

use std::{collections::BTreeSet, fmt};

use serde::Serialize;

use crate::{
	inventory::{Inventory, InventoryQuery},
	requirements::{ApiKindRef, Requirements},
};

/// Item used for checks that apply to PVCs without a class.
pub const IMPLICIT_DEFAULT: &str = "(implicit default)";
/// Item used for Ingresses without a class.
pub const UNSPECIFIED: &str = "(unspecified)";
/// Item used for checks over the whole bundle.
pub const BUNDLE: &str = "(bundle)";

const INVENTORY_UNAVAILABLE: &str = "(inventory unavailable)";

/// What a verdict is about. Reports list checks in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Check {
	Bundle,
	#[serde(rename = "API")]
	Api,
	StorageClass,
	IngressClass,
	Namespace,
	ServiceAccount,
	Inventory,
	DryRun,
}

impl fmt::Display for Check {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Check::Bundle => "Bundle",
			Check::Api => "API",
			Check::StorageClass => "StorageClass",
			Check::IngressClass => "IngressClass",
			Check::Namespace => "Namespace",
			Check::ServiceAccount => "ServiceAccount",
			Check::Inventory => "Inventory",
			Check::DryRun => "DryRun",
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
	Ok,
	Warn,
	Fail,
	Info,
}

impl fmt::Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Status::Ok => "OK",
			Status::Warn => "WARN",
			Status::Fail => "FAIL",
			Status::Info => "INFO",
		})
	}
}

/// Structured diagnostic attached to a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Hint {
	/// The API group is served, but not at the requested version.
	#[serde(rename_all = "camelCase")]
	GroupPresent { group: String, preferred: String },
	/// The cluster default class will be used instead.
	DefaultFallback { class: String },
}

impl fmt::Display for Hint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Hint::GroupPresent { preferred, .. } => {
				write!(f, "Group present; preferred={preferred}")
			}
			Hint::DefaultFallback { class } => write!(f, "default={class}"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
	pub check: Check,
	pub item: String,
	pub status: Status,
	pub details: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub hint: Option<Hint>,
}

impl Verdict {
	fn new(
		check: Check,
		item: impl Into<String>,
		status: Status,
		details: impl Into<String>,
	) -> Self {
		Self {
			check,
			item: item.into(),
			status,
			details: details.into(),
			hint: None,
		}
	}

	fn with_hint(mut self, hint: Hint) -> Self {
		self.hint = Some(hint);
		self
	}
}

/// Result of the server-side dry-run pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DryRunOutcome {
	Skipped,
	/// The cluster could not be reached.
	Unavailable(String),
	/// Error lines reported by the server, possibly with duplicates.
	Completed(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
	pub verdicts: Vec<Verdict>,
}

impl Report {
	/// Report for a bundle that contains no documents.
	pub fn empty_bundle() -> Self {
		Self {
			verdicts: vec![Verdict::new(
				Check::Bundle,
				BUNDLE,
				Status::Info,
				"no documents",
			)],
		}
	}

	pub fn has_failures(&self) -> bool {
		self.count(Status::Fail) > 0
	}

	pub fn count(&self, status: Status) -> usize {
		self.verdicts.iter().filter(|v| v.status == status).count()
	}
}

/// Produce one verdict per requirement, plus inventory and dry-run verdicts.
pub fn evaluate(
	requirements: &Requirements,
	inventory: &Inventory,
	dry_run: &DryRunOutcome,
) -> Report {
	let mut verdicts = Vec::new();

	verdicts.extend(
		requirements
			.api_kinds
			.iter()
			.map(|kind| evaluate_api_kind(kind, inventory)),
	);
	verdicts.extend(evaluate_storage_classes(requirements, inventory));
	verdicts.extend(evaluate_ingress_classes(requirements, inventory));
	verdicts.extend(evaluate_namespaces(requirements, inventory));
	verdicts.extend(evaluate_service_accounts(requirements, inventory));
	verdicts.extend(inventory.unavailable().iter().map(|(query, error)| {
		Verdict::new(Check::Inventory, query.to_string(), Status::Info, error)
	}));
	verdicts.extend(evaluate_dry_run(dry_run));

	// Stable: dry-run errors share one item and keep their sorted order.
	verdicts.sort_by(|a, b| (a.check, &a.item).cmp(&(b.check, &b.item)));

	Report { verdicts }
}

/// FAIL, noting when the answer rests on a failed inventory query.
fn fail(check: Check, item: impl Into<String>, details: &str, unknown: bool) -> Verdict {
	let details = if unknown {
		format!("{details} {INVENTORY_UNAVAILABLE}")
	} else {
		details.to_string()
	};
	Verdict::new(check, item, Status::Fail, details)
}

fn evaluate_api_kind(kind: &ApiKindRef, inventory: &Inventory) -> Verdict {
	if inventory.supports(kind) {
		return Verdict::new(Check::Api, kind.to_string(), Status::Ok, "served");
	}

	match inventory.group_hint(kind.group()) {
		Some(preferred) => {
			let hint = Hint::GroupPresent {
				group: kind.group().to_string(),
				preferred: preferred.to_string(),
			};
			Verdict::new(Check::Api, kind.to_string(), Status::Fail, hint.to_string())
				.with_hint(hint)
		}
		None => fail(
			Check::Api,
			kind.to_string(),
			"API group not served",
			inventory.is_unavailable(InventoryQuery::Discovery),
		),
	}
}

fn evaluate_storage_classes(requirements: &Requirements, inventory: &Inventory) -> Vec<Verdict> {
	let refs = &requirements.storage_classes;
	let default = inventory.default_storage_class();
	let mut verdicts = Vec::new();

	for name in &refs.explicit {
		let verdict = if inventory.storage_class_names().contains(name) {
			Verdict::new(Check::StorageClass, name, Status::Ok, "exists")
		} else if let Some(default) = default {
			Verdict::new(
				Check::StorageClass,
				name,
				Status::Warn,
				format!("not found; target default {default} would apply"),
			)
			.with_hint(Hint::DefaultFallback {
				class: default.to_string(),
			})
		} else {
			fail(
				Check::StorageClass,
				name,
				"not found and target has no default StorageClass",
				inventory.is_unavailable(InventoryQuery::StorageClasses),
			)
		};
		verdicts.push(verdict);
	}

	if refs.implicit {
		let verdict = match default {
			Some(default) => Verdict::new(
				Check::StorageClass,
				IMPLICIT_DEFAULT,
				Status::Ok,
				format!("target default {default}"),
			)
			.with_hint(Hint::DefaultFallback {
				class: default.to_string(),
			}),
			None => fail(
				Check::StorageClass,
				IMPLICIT_DEFAULT,
				"PVCs without storageClassName but target has no default StorageClass",
				inventory.is_unavailable(InventoryQuery::StorageClasses),
			),
		};
		verdicts.push(verdict);
	}

	verdicts
}

fn evaluate_ingress_classes(requirements: &Requirements, inventory: &Inventory) -> Vec<Verdict> {
	let refs = &requirements.ingress_classes;
	let mut verdicts: Vec<_> = refs
		.explicit
		.iter()
		.map(|name| {
			if inventory.ingress_class_names().contains(name) {
				Verdict::new(Check::IngressClass, name, Status::Ok, "exists")
			} else {
				fail(
					Check::IngressClass,
					name,
					"not found on target",
					inventory.is_unavailable(InventoryQuery::IngressClasses),
				)
			}
		})
		.collect();

	if refs.implicit {
		let details = match inventory.default_ingress_class_hint() {
			Some(default) => format!("no ingressClassName; target default is {default}"),
			None => "no ingressClassName; relies on a cluster-wide default controller".to_string(),
		};
		verdicts.push(Verdict::new(Check::IngressClass, UNSPECIFIED, Status::Info, details));
	}

	verdicts
}

/// Shared rule for objects a bundle may create itself.
fn created_or_present<T: Ord + fmt::Display>(
	check: Check,
	used: &BTreeSet<T>,
	created: &BTreeSet<T>,
	exists: impl Fn(&T) -> bool,
	unknown: impl Fn(&T) -> bool,
) -> Vec<Verdict> {
	used.iter()
		.map(|item| {
			if created.contains(item) {
				Verdict::new(check, item.to_string(), Status::Ok, "created by bundle")
			} else if exists(item) {
				Verdict::new(check, item.to_string(), Status::Ok, "exists on target")
			} else {
				fail(check, item.to_string(), "not found on target", unknown(item))
			}
		})
		.collect()
}

fn evaluate_namespaces(requirements: &Requirements, inventory: &Inventory) -> Vec<Verdict> {
	created_or_present(
		Check::Namespace,
		&requirements.namespaces_used,
		&requirements.namespaces_created,
		|ns| inventory.namespace_names().contains(ns),
		|_| inventory.is_unavailable(InventoryQuery::Namespaces),
	)
}

fn evaluate_service_accounts(requirements: &Requirements, inventory: &Inventory) -> Vec<Verdict> {
	created_or_present(
		Check::ServiceAccount,
		&requirements.service_accounts,
		&requirements.service_accounts_created,
		|sa| inventory.service_account_exists(sa),
		|sa| inventory.service_account_unknown(sa),
	)
}

fn evaluate_dry_run(outcome: &DryRunOutcome) -> Vec<Verdict> {
	match outcome {
		DryRunOutcome::Skipped => vec![Verdict::new(
			Check::DryRun,
			BUNDLE,
			Status::Info,
			"skipped",
		)],
		DryRunOutcome::Unavailable(error) => vec![Verdict::new(
			Check::DryRun,
			BUNDLE,
			Status::Info,
			format!("not run: {error}"),
		)],
		DryRunOutcome::Completed(errors) if errors.is_empty() => vec![Verdict::new(
			Check::DryRun,
			BUNDLE,
			Status::Ok,
			"server accepted all objects",
		)],
		DryRunOutcome::Completed(errors) => errors
			.iter()
			.map(String::as_str)
			.collect::<BTreeSet<_>>()
			.into_iter()
			.map(|error| Verdict::new(Check::DryRun, BUNDLE, Status::Fail, error))
			.collect(),
	}
}
