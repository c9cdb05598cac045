//! Requirements a manifest bundle places on the cluster it is deployed to.
//!
//! Extraction is pure: the same bundle always yields the same sets, and every
//! set is ordered so downstream output is reproducible. Documents without an
//! `apiVersion` or `kind` are ignored.

use std::{collections::BTreeSet, fmt};

use serde::Serialize;
use serde_json::Value;

use crate::manifest::Bundle;

/// An `apiVersion`/`kind` pair used by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ApiKindRef {
	pub api_version: String,
	pub kind: String,
}

impl ApiKindRef {
	pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
		Self {
			api_version: api_version.into(),
			kind: kind.into(),
		}
	}

	/// API group, empty for the core group.
	pub fn group(&self) -> &str {
		self.api_version
			.split_once('/')
			.map_or("", |(group, _)| group)
	}

	pub fn version(&self) -> &str {
		self.api_version
			.split_once('/')
			.map_or(self.api_version.as_str(), |(_, version)| version)
	}
}

impl fmt::Display for ApiKindRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}", self.api_version, self.kind)
	}
}

/// A service account identified by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ServiceAccountRef {
	pub namespace: String,
	pub name: String,
}

impl ServiceAccountRef {
	pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			namespace: namespace.into(),
			name: name.into(),
		}
	}
}

impl fmt::Display for ServiceAccountRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.namespace, self.name)
	}
}

/// References to a class-like resource (StorageClass, IngressClass).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassRefs {
	/// Class names referenced explicitly.
	pub explicit: BTreeSet<String>,
	/// Whether any object left the class unset and defers to the cluster default.
	pub implicit: bool,
}

/// Everything a bundle requires from its target cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
	pub api_kinds: BTreeSet<ApiKindRef>,
	pub storage_classes: ClassRefs,
	pub ingress_classes: ClassRefs,
	pub namespaces_used: BTreeSet<String>,
	pub namespaces_created: BTreeSet<String>,
	pub service_accounts: BTreeSet<ServiceAccountRef>,
	pub service_accounts_created: BTreeSet<ServiceAccountRef>,
}

impl Requirements {
	pub fn extract(bundle: &Bundle) -> Self {
		Self {
			api_kinds: extract_api_kinds(bundle),
			storage_classes: extract_storage_class_refs(bundle),
			ingress_classes: extract_ingress_class_refs(bundle),
			namespaces_used: extract_namespace_usage(bundle),
			namespaces_created: extract_namespaces_created(bundle),
			service_accounts: extract_service_account_subjects(bundle),
			service_accounts_created: extract_service_accounts_created(bundle),
		}
	}

	/// Service account subjects that the bundle does not create itself.
	pub fn external_service_accounts(&self) -> impl Iterator<Item = &ServiceAccountRef> {
		self.service_accounts
			.iter()
			.filter(|sa| !self.service_accounts_created.contains(sa))
	}
}

fn str_at<'a>(doc: &'a Value, pointer: &str) -> &'a str {
	doc.pointer(pointer).and_then(Value::as_str).unwrap_or("")
}

/// Documents that carry both `apiVersion` and `kind`.
fn typed_documents(bundle: &Bundle) -> impl Iterator<Item = &Value> {
	bundle
		.documents()
		.iter()
		.filter(|doc| !str_at(doc, "/apiVersion").is_empty() && !str_at(doc, "/kind").is_empty())
}

fn documents_of_kind<'a>(bundle: &'a Bundle, kind: &'a str) -> impl Iterator<Item = &'a Value> {
	typed_documents(bundle).filter(move |doc| str_at(doc, "/kind") == kind)
}

pub fn extract_api_kinds(bundle: &Bundle) -> BTreeSet<ApiKindRef> {
	typed_documents(bundle)
		.map(|doc| ApiKindRef::new(str_at(doc, "/apiVersion"), str_at(doc, "/kind")))
		.collect()
}

fn class_refs(bundle: &Bundle, kind: &str, pointer: &str) -> ClassRefs {
	let mut refs = ClassRefs::default();
	for doc in documents_of_kind(bundle, kind) {
		match str_at(doc, pointer) {
			"" => refs.implicit = true,
			name => {
				refs.explicit.insert(name.to_string());
			}
		}
	}
	refs
}

/// `spec.storageClassName` of every PersistentVolumeClaim.
pub fn extract_storage_class_refs(bundle: &Bundle) -> ClassRefs {
	class_refs(bundle, "PersistentVolumeClaim", "/spec/storageClassName")
}

/// `spec.ingressClassName` of every Ingress.
pub fn extract_ingress_class_refs(bundle: &Bundle) -> ClassRefs {
	class_refs(bundle, "Ingress", "/spec/ingressClassName")
}

/// Namespaces that objects are placed in.
pub fn extract_namespace_usage(bundle: &Bundle) -> BTreeSet<String> {
	typed_documents(bundle)
		.map(|doc| str_at(doc, "/metadata/namespace"))
		.filter(|ns| !ns.is_empty())
		.map(str::to_string)
		.collect()
}

pub fn extract_namespaces_created(bundle: &Bundle) -> BTreeSet<String> {
	documents_of_kind(bundle, "Namespace")
		.map(|doc| str_at(doc, "/metadata/name"))
		.filter(|name| !name.is_empty())
		.map(str::to_string)
		.collect()
}

/// ServiceAccount subjects of every RoleBinding and ClusterRoleBinding.
pub fn extract_service_account_subjects(bundle: &Bundle) -> BTreeSet<ServiceAccountRef> {
	typed_documents(bundle)
		.filter(|doc| matches!(str_at(doc, "/kind"), "RoleBinding" | "ClusterRoleBinding"))
		.filter_map(|doc| doc.get("subjects").and_then(Value::as_array))
		.flatten()
		.filter(|subject| str_at(subject, "/kind") == "ServiceAccount")
		.filter_map(|subject| service_account_ref(subject, "/namespace", "/name"))
		.collect()
}

pub fn extract_service_accounts_created(bundle: &Bundle) -> BTreeSet<ServiceAccountRef> {
	documents_of_kind(bundle, "ServiceAccount")
		.filter_map(|doc| service_account_ref(doc, "/metadata/namespace", "/metadata/name"))
		.collect()
}

fn service_account_ref(
	value: &Value,
	namespace_pointer: &str,
	name_pointer: &str,
) -> Option<ServiceAccountRef> {
	let name = str_at(value, name_pointer);
	if name.is_empty() {
		return None;
	}
	let namespace = match str_at(value, namespace_pointer) {
		"" => "default",
		ns => ns,
	};
	Some(ServiceAccountRef::new(namespace, name))
}

#[cfg(test)]
mod tests {
	use indoc::indoc;
	use rstest::rstest;

	use super::*;

	fn bundle(yaml: &str) -> Bundle {
		Bundle::from_yaml(yaml).unwrap()
	}

	#[test]
	fn test_api_kinds_are_unique_and_sorted() {
		let bundle = bundle(indoc! {"
			apiVersion: apps/v1
			kind: Deployment
			metadata: { name: b }
			---
			apiVersion: v1
			kind: ConfigMap
			metadata: { name: a }
			---
			apiVersion: apps/v1
			kind: Deployment
			metadata: { name: a }
			---
			kind: Secret
			metadata: { name: no-api-version }
			---
			apiVersion: v1
			kind: ''
		"});

		let kinds: Vec<_> = extract_api_kinds(&bundle)
			.iter()
			.map(ToString::to_string)
			.collect();
		assert_eq!(kinds, ["apps/v1 Deployment", "v1 ConfigMap"]);
	}

	#[rstest]
	#[case::core("v1", "", "v1")]
	#[case::grouped("batch/v1beta1", "batch", "v1beta1")]
	fn test_api_kind_group_and_version(
		#[case] api_version: &str,
		#[case] group: &str,
		#[case] version: &str,
	) {
		let kind = ApiKindRef::new(api_version, "Thing");
		assert_eq!(kind.group(), group);
		assert_eq!(kind.version(), version);
	}

	#[test]
	fn test_storage_class_refs() {
		let bundle = bundle(indoc! {"
			apiVersion: v1
			kind: PersistentVolumeClaim
			metadata: { name: data }
			spec: { storageClassName: fast-ssd }
			---
			apiVersion: v1
			kind: PersistentVolumeClaim
			metadata: { name: scratch }
			spec: {}
			---
			apiVersion: apps/v1
			kind: StatefulSet
			metadata: { name: db }
			spec: { storageClassName: ignored }
		"});

		let refs = extract_storage_class_refs(&bundle);
		assert_eq!(refs.explicit, BTreeSet::from(["fast-ssd".to_string()]));
		assert!(refs.implicit);
	}

	#[test]
	fn test_ingress_class_refs_without_defaults() {
		let bundle = bundle(indoc! {"
			apiVersion: networking.k8s.io/v1
			kind: Ingress
			metadata: { name: web }
			spec: { ingressClassName: nginx }
		"});

		let refs = extract_ingress_class_refs(&bundle);
		assert_eq!(refs.explicit, BTreeSet::from(["nginx".to_string()]));
		assert!(!refs.implicit);
	}

	#[test]
	fn test_namespaces() {
		let bundle = bundle(indoc! {"
			apiVersion: v1
			kind: Namespace
			metadata: { name: billing }
			---
			apiVersion: apps/v1
			kind: Deployment
			metadata: { name: api, namespace: billing }
			---
			apiVersion: v1
			kind: ConfigMap
			metadata: { name: cfg, namespace: shared }
			---
			apiVersion: v1
			kind: ConfigMap
			metadata: { name: global }
		"});

		let requirements = Requirements::extract(&bundle);
		assert_eq!(
			requirements.namespaces_used,
			BTreeSet::from(["billing".to_string(), "shared".to_string()])
		);
		assert_eq!(
			requirements.namespaces_created,
			BTreeSet::from(["billing".to_string()])
		);
	}

	#[test]
	fn test_service_account_subjects() {
		let bundle = bundle(indoc! {"
			apiVersion: rbac.authorization.k8s.io/v1
			kind: RoleBinding
			metadata: { name: rb, namespace: ci }
			subjects:
			  - kind: ServiceAccount
			    name: builder
			    namespace: ci
			  - kind: User
			    name: alice
			  - kind: ServiceAccount
			    name: deployer
			---
			apiVersion: rbac.authorization.k8s.io/v1
			kind: ClusterRoleBinding
			metadata: { name: crb }
			subjects:
			  - kind: ServiceAccount
			    name: builder
			    namespace: ci
			---
			apiVersion: v1
			kind: ServiceAccount
			metadata: { name: builder, namespace: ci }
		"});

		let requirements = Requirements::extract(&bundle);
		let subjects: Vec<_> = requirements
			.service_accounts
			.iter()
			.map(ToString::to_string)
			.collect();
		assert_eq!(subjects, ["ci/builder", "default/deployer"]);

		let external: Vec<_> = requirements
			.external_service_accounts()
			.map(ToString::to_string)
			.collect();
		assert_eq!(external, ["default/deployer"]);
	}

	#[test]
	fn test_empty_bundle_has_no_requirements() {
		assert_eq!(
			Requirements::extract(&Bundle::default()),
			Requirements::default()
		);
	}
}
