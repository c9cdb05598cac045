//! Cross-cluster fact comparison.
//!
//! A fixed set of named assessments reduces groups of related facts to a
//! single verdict each. Facts not consumed by any assessment are compared
//! verbatim and reported as `SAME` or `DIFF`.

use std::{collections::BTreeSet, fmt};

use serde::Serialize;

use crate::{
	keys::*,
	model::FactModel,
	quantity::{parse_cpu_millis, parse_memory_bytes},
	set::FactSet,
};

/// Outcome of comparing one key or one assessment dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Assessment {
	Ok,
	Warn,
	Fail,
	Same,
	Diff,
}

impl Assessment {
	fn severity(self) -> u8 {
		match self {
			Assessment::Ok | Assessment::Same => 0,
			Assessment::Diff => 1,
			Assessment::Warn => 2,
			Assessment::Fail => 3,
		}
	}

	/// Keep whichever of `self` and `other` is more severe.
	fn escalate(&mut self, other: Assessment) {
		if other.severity() > self.severity() {
			*self = other;
		}
	}
}

impl fmt::Display for Assessment {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Assessment::Ok => "OK",
			Assessment::Warn => "WARN",
			Assessment::Fail => "FAIL",
			Assessment::Same => "SAME",
			Assessment::Diff => "DIFF",
		})
	}
}

/// One row of a fact comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffRow {
	pub key: String,
	pub value_a: String,
	pub value_b: String,
	pub assessment: Assessment,
	pub notes: String,
}

/// All rows of a comparison, named assessments first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffReport {
	pub rows: Vec<DiffRow>,
}

impl DiffReport {
	pub fn has_failures(&self) -> bool {
		self.rows.iter().any(|r| r.assessment == Assessment::Fail)
	}

	pub fn row(&self, key: &str) -> Option<&DiffRow> {
		self.rows.iter().find(|r| r.key == key)
	}
}

/// Tunables for the named assessments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOptions {
	/// Plural resource names that must survive the migration.
	pub must_have_resources: Vec<String>,
}

impl Default for DiffOptions {
	fn default() -> Self {
		Self {
			must_have_resources: DEFAULT_MUST_HAVE_RESOURCES
				.iter()
				.map(|s| (*s).to_string())
				.collect(),
		}
	}
}

pub const ASSESS_API_SURFACE: &str = "assess.api_surface";
pub const ASSESS_CAPACITY: &str = "assess.capacity";
pub const ASSESS_STORAGE: &str = "assess.storage";
pub const ASSESS_NETWORK: &str = "assess.network";
pub const ASSESS_ADDONS: &str = "assess.addons";
pub const ASSESS_POLICY: &str = "assess.policy";

/// Keys folded into named assessments and therefore not diffed verbatim.
const CONSUMED_KEYS: &[&str] = &[
	APIS_PREFERRED,
	APIS_RESOURCES,
	CAPACITY_CPU,
	CAPACITY_MEMORY,
	STORAGE_DEFAULT,
	NETWORK_CNI,
	INGRESS_CONTROLLERS,
	ADDONS_KUBE_SYSTEM,
	POLICY_PSA_DEFAULT,
	ADMISSION_VALIDATING_WEBHOOKS,
];

/// Accumulates the verdict and notes of one named assessment.
struct Finding {
	key: &'static str,
	assessment: Assessment,
	notes: Vec<String>,
}

impl Finding {
	fn new(key: &'static str) -> Self {
		Self {
			key,
			assessment: Assessment::Ok,
			notes: Vec::new(),
		}
	}

	fn flag(&mut self, assessment: Assessment, note: impl Into<String>) {
		self.assessment.escalate(assessment);
		self.notes.push(note.into());
	}

	fn note(&mut self, note: impl Into<String>) {
		self.notes.push(note.into());
	}

	fn into_row(self, value_a: String, value_b: String) -> DiffRow {
		DiffRow {
			key: self.key.to_string(),
			value_a,
			value_b,
			assessment: self.assessment,
			notes: self.notes.join("; "),
		}
	}
}

/// Compare a source snapshot (`a`) against a target snapshot (`b`).
pub fn diff(a: &FactModel, b: &FactModel, opts: &DiffOptions) -> DiffReport {
	let mut rows = vec![
		assess_api_surface(a, b, opts),
		assess_capacity(a, b),
		assess_storage(a, b),
		assess_network(a, b),
		assess_addons(a, b),
		assess_policy(a, b),
	];
	rows.extend(residual_rows(a, b));

	DiffReport { rows }
}

fn set_or_empty(model: &FactModel, key: &str) -> FactSet {
	model.get_set(key).unwrap_or_default()
}

fn summarize_count(set: Option<&FactSet>, noun: &str) -> String {
	match set {
		Some(set) => format!("{} {noun}", set.len()),
		None => String::new(),
	}
}

fn assess_api_surface(a: &FactModel, b: &FactModel, opts: &DiffOptions) -> DiffRow {
	let mut finding = Finding::new(ASSESS_API_SURFACE);
	let source = a.get_set(APIS_PREFERRED);
	let target = b.get_set(APIS_PREFERRED);
	let value_a = summarize_count(source.as_ref(), "groupVersions");
	let value_b = summarize_count(target.as_ref(), "groupVersions");

	let (Some(source), Some(target)) = (source, target) else {
		finding.flag(Assessment::Warn, "API surface unknown");
		return finding.into_row(value_a, value_b);
	};

	let missing = source.difference(&target);
	if !missing.is_empty() {
		finding.flag(
			Assessment::Warn,
			format!("Preferred groupVersions missing on target: {missing}"),
		);
	}

	let source_resources = set_or_empty(a, APIS_RESOURCES);
	let target_resources = set_or_empty(b, APIS_RESOURCES);
	let missing_resources: Vec<&str> = opts
		.must_have_resources
		.iter()
		.map(String::as_str)
		.filter(|r| source_resources.contains(r) && !target_resources.contains(r))
		.collect();
	if !missing_resources.is_empty() {
		finding.flag(
			Assessment::Fail,
			format!(
				"Must-have resources missing on target: {}",
				missing_resources.join(",")
			),
		);
	}

	finding.into_row(value_a, value_b)
}

fn assess_capacity(a: &FactModel, b: &FactModel) -> DiffRow {
	let mut finding = Finding::new(ASSESS_CAPACITY);
	let summary = |m: &FactModel| {
		format!(
			"cpu={} memory={}",
			m.get(CAPACITY_CPU).unwrap_or("?"),
			m.get(CAPACITY_MEMORY).unwrap_or("?")
		)
	};

	let cpu = (
		a.get(CAPACITY_CPU).and_then(parse_cpu_millis),
		b.get(CAPACITY_CPU).and_then(parse_cpu_millis),
	);
	let memory = (
		a.get(CAPACITY_MEMORY).and_then(parse_memory_bytes),
		b.get(CAPACITY_MEMORY).and_then(parse_memory_bytes),
	);

	match cpu {
		(Some(source), Some(target)) if target < source => finding.flag(
			Assessment::Fail,
			format!("CPU target<source ({target}<{source})"),
		),
		(Some(_), Some(_)) => {}
		_ => finding.flag(Assessment::Warn, "CPU capacity unknown"),
	}
	match memory {
		(Some(source), Some(target)) if target < source => finding.flag(
			Assessment::Fail,
			format!("Memory target<source ({target}<{source})"),
		),
		(Some(_), Some(_)) => {}
		_ => finding.flag(Assessment::Warn, "Memory capacity unknown"),
	}

	finding.into_row(summary(a), summary(b))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
	value.filter(|v| !v.is_empty())
}

fn assess_storage(a: &FactModel, b: &FactModel) -> DiffRow {
	let mut finding = Finding::new(ASSESS_STORAGE);
	let source = non_empty(a.get(STORAGE_DEFAULT));
	let target = non_empty(b.get(STORAGE_DEFAULT));

	match (source, target) {
		(Some(source), None) => finding.flag(
			Assessment::Warn,
			format!("Target has no default StorageClass (source default: {source})"),
		),
		(Some(source), Some(target)) if source != target => {
			finding.note(format!("Default StorageClass differs ({source} -> {target})"))
		}
		(None, _) => finding.note("Source has no default StorageClass"),
		_ => {}
	}

	finding.into_row(
		source.unwrap_or_default().to_string(),
		target.unwrap_or_default().to_string(),
	)
}

fn assess_network(a: &FactModel, b: &FactModel) -> DiffRow {
	let mut finding = Finding::new(ASSESS_NETWORK);
	let source_cni = a.get(NETWORK_CNI).unwrap_or_default();
	let target_cni = b.get(NETWORK_CNI).unwrap_or_default();

	if source_cni != target_cni {
		finding.flag(
			Assessment::Warn,
			format!("CNI differs ({source_cni} -> {target_cni})"),
		);
	}

	let source_controllers = set_or_empty(a, INGRESS_CONTROLLERS);
	let target_controllers = set_or_empty(b, INGRESS_CONTROLLERS);
	let missing = source_controllers.difference(&target_controllers);
	if !missing.is_empty() {
		finding.flag(
			Assessment::Warn,
			format!("Ingress controllers missing on target: {missing}"),
		);
	}

	finding.into_row(
		format!("cni={source_cni} ingress={source_controllers}"),
		format!("cni={target_cni} ingress={target_controllers}"),
	)
}

/// Strip the `=image` part of an addon identifier.
fn addon_name(identifier: &str) -> String {
	identifier
		.split_once('=')
		.map_or(identifier, |(name, _)| name)
		.to_string()
}

fn assess_addons(a: &FactModel, b: &FactModel) -> DiffRow {
	let mut finding = Finding::new(ASSESS_ADDONS);
	let source = set_or_empty(a, ADDONS_KUBE_SYSTEM).map(addon_name);
	let target = set_or_empty(b, ADDONS_KUBE_SYSTEM).map(addon_name);

	let missing = source.difference(&target);
	if !missing.is_empty() {
		finding.flag(
			Assessment::Warn,
			format!("kube-system addons missing on target: {missing}"),
		);
	}

	finding.into_row(
		format!("{} addons", source.len()),
		format!("{} addons", target.len()),
	)
}

fn assess_policy(a: &FactModel, b: &FactModel) -> DiffRow {
	let mut finding = Finding::new(ASSESS_POLICY);
	let source_psa = set_or_empty(a, POLICY_PSA_DEFAULT);
	let target_psa = set_or_empty(b, POLICY_PSA_DEFAULT);

	let render_psa = |set: &FactSet| {
		if set.is_empty() {
			"none".to_string()
		} else {
			set.to_string()
		}
	};

	if source_psa != target_psa {
		finding.flag(
			Assessment::Warn,
			format!(
				"default namespace pod-security labels differ ({} -> {})",
				render_psa(&source_psa),
				render_psa(&target_psa)
			),
		);
	}

	let source_hooks = a
		.get(ADMISSION_VALIDATING_WEBHOOKS)
		.and_then(|v| v.parse::<usize>().ok());
	let target_hooks = b
		.get(ADMISSION_VALIDATING_WEBHOOKS)
		.and_then(|v| v.parse::<usize>().ok());
	match (source_hooks, target_hooks) {
		(Some(source), Some(target)) if target < source => finding.flag(
			Assessment::Warn,
			format!("Fewer validating webhooks on target ({target}<{source}) (advisory)"),
		),
		(Some(_), Some(_)) => {}
		_ => finding.flag(Assessment::Warn, "Validating webhook count unknown (advisory)"),
	}

	let summary = |psa: &FactSet, hooks: Option<usize>| {
		format!(
			"psa={} webhooks={}",
			render_psa(psa),
			hooks.map_or_else(|| "?".to_string(), |h| h.to_string())
		)
	};

	finding.into_row(
		summary(&source_psa, source_hooks),
		summary(&target_psa, target_hooks),
	)
}

fn residual_rows(a: &FactModel, b: &FactModel) -> Vec<DiffRow> {
	let keys: BTreeSet<&str> = a
		.keys()
		.chain(b.keys())
		.filter(|k| !CONSUMED_KEYS.contains(k))
		.collect();

	keys.into_iter()
		.map(|key| {
			let value_a = a.get(key);
			let value_b = b.get(key);
			let (assessment, notes) = match (value_a, value_b) {
				(Some(x), Some(y)) if x == y => (Assessment::Same, ""),
				(Some(_), Some(_)) => (Assessment::Diff, ""),
				(Some(_), None) => (Assessment::Diff, "missing on target"),
				(None, _) => (Assessment::Diff, "missing on source"),
			};
			DiffRow {
				key: key.to_string(),
				value_a: value_a.unwrap_or_default().to_string(),
				value_b: value_b.unwrap_or_default().to_string(),
				assessment,
				notes: notes.to_string(),
			}
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn model(pairs: &[(&str, &str)]) -> FactModel {
		let mut model = FactModel::new();
		for (k, v) in pairs {
			model.insert(k, v).unwrap();
		}
		model
	}

	#[test]
	fn test_capacity_flags_only_regressed_dimension() {
		let a = model(&[(CAPACITY_CPU, "4000m"), (CAPACITY_MEMORY, "8Gi")]);
		let b = model(&[(CAPACITY_CPU, "2000m"), (CAPACITY_MEMORY, "16Gi")]);

		let row = assess_capacity(&a, &b);
		assert_eq!(row.assessment, Assessment::Fail);
		assert_eq!(row.notes, "CPU target<source (2000<4000)");
	}

	#[test]
	fn test_capacity_accepts_whole_cores() {
		let a = model(&[(CAPACITY_CPU, "4"), (CAPACITY_MEMORY, "8Gi")]);
		let b = model(&[(CAPACITY_CPU, "4000m"), (CAPACITY_MEMORY, "8589934592")]);

		let row = assess_capacity(&a, &b);
		assert_eq!(row.assessment, Assessment::Ok);
		assert_eq!(row.notes, "");
	}

	#[test]
	fn test_capacity_unknown_is_warning() {
		let a = model(&[(CAPACITY_CPU, "4")]);
		let b = model(&[(CAPACITY_CPU, "8"), (CAPACITY_MEMORY, "lots")]);

		let row = assess_capacity(&a, &b);
		assert_eq!(row.assessment, Assessment::Warn);
		assert_eq!(row.notes, "Memory capacity unknown");
	}

	#[test]
	fn test_api_surface_missing_must_have_fails() {
		let a = model(&[
			(APIS_PREFERRED, "apps/v1;batch/v1;v1"),
			(APIS_RESOURCES, "cronjobs;deployments;jobs"),
		]);
		let b = model(&[
			(APIS_PREFERRED, "apps/v1;batch/v1;policy/v1;v1"),
			(APIS_RESOURCES, "deployments;jobs"),
		]);

		let row = assess_api_surface(&a, &b, &DiffOptions::default());
		assert_eq!(row.assessment, Assessment::Fail);
		assert_eq!(row.notes, "Must-have resources missing on target: cronjobs");
		assert_eq!(row.value_a, "3 groupVersions");
		assert_eq!(row.value_b, "4 groupVersions");
	}

	#[test]
	fn test_api_surface_missing_group_version_warns() {
		let a = model(&[(APIS_PREFERRED, "autoscaling/v2;v1")]);
		let b = model(&[(APIS_PREFERRED, "v1")]);

		let row = assess_api_surface(&a, &b, &DiffOptions::default());
		assert_eq!(row.assessment, Assessment::Warn);
		assert_eq!(
			row.notes,
			"Preferred groupVersions missing on target: autoscaling/v2"
		);
	}

	#[test]
	fn test_storage_requires_any_default_on_target() {
		let with_default = model(&[(STORAGE_DEFAULT, "gp2")]);
		let other_default = model(&[(STORAGE_DEFAULT, "standard")]);
		let without = model(&[(STORAGE_DEFAULT, "")]);

		assert_eq!(
			assess_storage(&with_default, &other_default).assessment,
			Assessment::Ok
		);
		let row = assess_storage(&with_default, &without);
		assert_eq!(row.assessment, Assessment::Warn);
		assert_eq!(
			row.notes,
			"Target has no default StorageClass (source default: gp2)"
		);
		assert_eq!(assess_storage(&without, &without).assessment, Assessment::Ok);
	}

	#[test]
	fn test_network_cni_and_controllers() {
		let a = model(&[
			(NETWORK_CNI, "calico"),
			(INGRESS_CONTROLLERS, "k8s.io/ingress-nginx"),
		]);
		let b = model(&[(NETWORK_CNI, "calico"), (INGRESS_CONTROLLERS, "")]);

		let row = assess_network(&a, &b);
		assert_eq!(row.assessment, Assessment::Warn);
		assert_eq!(
			row.notes,
			"Ingress controllers missing on target: k8s.io/ingress-nginx"
		);

		let c = model(&[
			(NETWORK_CNI, "cilium"),
			(INGRESS_CONTROLLERS, "k8s.io/ingress-nginx"),
		]);
		assert_eq!(assess_network(&a, &c).notes, "CNI differs (calico -> cilium)");
	}

	#[test]
	fn test_addons_ignore_images() {
		let a = model(&[(
			ADDONS_KUBE_SYSTEM,
			"DaemonSet/kube-proxy=registry.k8s.io/kube-proxy:v1.28.0;Deployment/coredns=coredns:1.10",
		)]);
		let b = model(&[(
			ADDONS_KUBE_SYSTEM,
			"DaemonSet/kube-proxy=registry.k8s.io/kube-proxy:v1.30.1;Deployment/coredns=coredns:1.11;Deployment/metrics-server=ms:0.7",
		)]);

		assert_eq!(assess_addons(&a, &b).assessment, Assessment::Ok);

		let row = assess_addons(&b, &a);
		assert_eq!(row.assessment, Assessment::Warn);
		assert_eq!(
			row.notes,
			"kube-system addons missing on target: Deployment/metrics-server"
		);
	}

	#[test]
	fn test_policy_webhook_count_is_advisory() {
		let a = model(&[
			(POLICY_PSA_DEFAULT, "enforce=baseline"),
			(ADMISSION_VALIDATING_WEBHOOKS, "3"),
		]);
		let b = model(&[
			(POLICY_PSA_DEFAULT, "enforce=baseline"),
			(ADMISSION_VALIDATING_WEBHOOKS, "1"),
		]);

		let row = assess_policy(&a, &b);
		assert_eq!(row.assessment, Assessment::Warn);
		assert_eq!(
			row.notes,
			"Fewer validating webhooks on target (1<3) (advisory)"
		);
	}

	#[test]
	fn test_policy_psa_difference() {
		let a = model(&[
			(POLICY_PSA_DEFAULT, "enforce=restricted"),
			(ADMISSION_VALIDATING_WEBHOOKS, "0"),
		]);
		let b = model(&[
			(POLICY_PSA_DEFAULT, ""),
			(ADMISSION_VALIDATING_WEBHOOKS, "0"),
		]);

		let row = assess_policy(&a, &b);
		assert_eq!(row.assessment, Assessment::Warn);
		assert_eq!(
			row.notes,
			"default namespace pod-security labels differ (enforce=restricted -> none)"
		);
	}

	#[test]
	fn test_residual_rows() {
		let a = model(&[
			(NODES_COUNT, "3"),
			(CLUSTER_SERVER_VERSION, "v1.28.3"),
			(CRDS_COUNT, "12"),
			(NETWORK_CNI, "calico"),
		]);
		let b = model(&[
			(NODES_COUNT, "3"),
			(CLUSTER_SERVER_VERSION, "v1.30.1"),
			(STORAGE_CLASSES, "gp3"),
			(NETWORK_CNI, "calico"),
		]);

		let rows = residual_rows(&a, &b);
		let summary: Vec<_> = rows
			.iter()
			.map(|r| (r.key.as_str(), r.assessment, r.notes.as_str()))
			.collect();
		assert_eq!(
			summary,
			vec![
				(CLUSTER_SERVER_VERSION, Assessment::Diff, ""),
				(CRDS_COUNT, Assessment::Diff, "missing on target"),
				(NODES_COUNT, Assessment::Same, ""),
				(STORAGE_CLASSES, Assessment::Diff, "missing on source"),
			]
		);
		assert_eq!(rows[1].value_b, "");
	}

	#[test]
	fn test_report_orders_named_assessments_first() {
		let a = model(&[(NODES_COUNT, "1")]);
		let report = diff(&a, &a, &DiffOptions::default());

		let keys: Vec<_> = report.rows.iter().map(|r| r.key.as_str()).collect();
		assert_eq!(
			keys,
			vec![
				ASSESS_API_SURFACE,
				ASSESS_CAPACITY,
				ASSESS_STORAGE,
				ASSESS_NETWORK,
				ASSESS_ADDONS,
				ASSESS_POLICY,
				NODES_COUNT,
			]
		);
		assert!(!report.has_failures());
	}
}
