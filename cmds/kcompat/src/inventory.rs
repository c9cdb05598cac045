//! What the target cluster can offer a bundle.
//!
//! An [`Inventory`] is built once per run and never changes afterwards. Each
//! cluster query that fails leaves its part of the inventory empty and is
//! recorded in [`Inventory::unavailable`], so evaluation always completes and
//! can say which answers are based on missing data.

use std::{
	collections::{BTreeMap, BTreeSet},
	fmt,
	sync::Arc,
};

use bon::Builder;
use k8s_openapi::api::{
	core::v1::{Namespace, ServiceAccount},
	networking::v1::IngressClass,
	storage::v1::StorageClass,
};
use kube::{
	api::{Api, ListParams},
	Client, Resource,
};
use serde::Serialize;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, instrument, warn};

use crate::{
	k8s::discovery::{ApiSurface, DiscoveryError},
	requirements::{ApiKindRef, Requirements, ServiceAccountRef},
};

const DEFAULT_STORAGE_CLASS_ANNOTATIONS: &[&str] = &[
	"storageclass.kubernetes.io/is-default-class",
	"storageclass.beta.kubernetes.io/is-default-class",
];
const DEFAULT_INGRESS_CLASS_ANNOTATION: &str = "ingressclass.kubernetes.io/is-default-class";

/// Default bound on concurrent service account lookups.
pub const DEFAULT_SERVICE_ACCOUNT_CONCURRENCY: usize = 8;

/// A cluster query the inventory depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum InventoryQuery {
	Discovery,
	StorageClasses,
	IngressClasses,
	Namespaces,
	ServiceAccounts,
}

impl fmt::Display for InventoryQuery {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			InventoryQuery::Discovery => "api discovery",
			InventoryQuery::StorageClasses => "storageclasses",
			InventoryQuery::IngressClasses => "ingressclasses",
			InventoryQuery::Namespaces => "namespaces",
			InventoryQuery::ServiceAccounts => "serviceaccounts",
		})
	}
}

/// Capabilities of one target cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Builder)]
pub struct Inventory {
	/// Kinds served at the preferred version of their group.
	#[builder(default)]
	supported_kinds: BTreeSet<ApiKindRef>,
	/// API group to its preferred `groupVersion`.
	#[builder(default)]
	preferred_versions: BTreeMap<String, String>,
	#[builder(default)]
	storage_classes: BTreeSet<String>,
	#[builder(into)]
	default_storage_class: Option<String>,
	#[builder(default)]
	ingress_classes: BTreeSet<String>,
	#[builder(into)]
	default_ingress_class: Option<String>,
	#[builder(default)]
	namespaces: BTreeSet<String>,
	/// Service accounts known to exist. Only the ones a bundle asked about
	/// are ever looked up.
	#[builder(default)]
	service_accounts: BTreeSet<ServiceAccountRef>,
	/// Service accounts whose own lookup failed.
	#[builder(default)]
	unresolved_service_accounts: BTreeSet<ServiceAccountRef>,
	#[builder(default)]
	unavailable: BTreeMap<InventoryQuery, String>,
}

impl Inventory {
	/// An inventory for a cluster that could not be reached at all.
	pub fn unreachable(message: &str) -> Self {
		let unavailable = [
			InventoryQuery::Discovery,
			InventoryQuery::StorageClasses,
			InventoryQuery::IngressClasses,
			InventoryQuery::Namespaces,
			InventoryQuery::ServiceAccounts,
		]
		.into_iter()
		.map(|query| (query, message.to_string()))
		.collect();
		Inventory::builder().unavailable(unavailable).build()
	}

	pub fn supports(&self, kind: &ApiKindRef) -> bool {
		self.supported_kinds.contains(kind)
	}

	pub fn supported_kinds(&self) -> &BTreeSet<ApiKindRef> {
		&self.supported_kinds
	}

	/// Preferred `groupVersion` of an API group, if the group is served at all.
	pub fn group_hint(&self, group: &str) -> Option<&str> {
		self.preferred_versions.get(group).map(String::as_str)
	}

	pub fn storage_class_names(&self) -> &BTreeSet<String> {
		&self.storage_classes
	}

	pub fn default_storage_class(&self) -> Option<&str> {
		self.default_storage_class.as_deref()
	}

	pub fn ingress_class_names(&self) -> &BTreeSet<String> {
		&self.ingress_classes
	}

	/// IngressClass marked as the cluster default, when one is annotated.
	pub fn default_ingress_class_hint(&self) -> Option<&str> {
		self.default_ingress_class.as_deref()
	}

	pub fn namespace_names(&self) -> &BTreeSet<String> {
		&self.namespaces
	}

	pub fn service_account_exists(&self, sa: &ServiceAccountRef) -> bool {
		self.service_accounts.contains(sa)
	}

	/// Whether the answer for `sa` rests on a failed lookup.
	///
	/// Without per-account records (the cluster was never reached) this is
	/// the state of the whole service account query.
	pub fn service_account_unknown(&self, sa: &ServiceAccountRef) -> bool {
		if self.unresolved_service_accounts.is_empty() {
			self.is_unavailable(InventoryQuery::ServiceAccounts)
		} else {
			self.unresolved_service_accounts.contains(sa)
		}
	}

	/// Queries that failed, with the error each one returned.
	pub fn unavailable(&self) -> &BTreeMap<InventoryQuery, String> {
		&self.unavailable
	}

	pub fn is_unavailable(&self, query: InventoryQuery) -> bool {
		self.unavailable.contains_key(&query)
	}
}

/// Name of the StorageClass annotated as default. Several defaults resolve to
/// the first by name.
pub fn default_storage_class(classes: &[StorageClass]) -> Option<String> {
	default_by_annotation(classes, DEFAULT_STORAGE_CLASS_ANNOTATIONS)
}

pub fn default_ingress_class(classes: &[IngressClass]) -> Option<String> {
	default_by_annotation(classes, &[DEFAULT_INGRESS_CLASS_ANNOTATION])
}

fn default_by_annotation<K: Resource>(objects: &[K], annotations: &[&str]) -> Option<String> {
	objects
		.iter()
		.filter(|obj| {
			let meta = obj.meta();
			meta.annotations.as_ref().is_some_and(|a| {
				annotations
					.iter()
					.any(|key| a.get(*key).is_some_and(|v| v == "true"))
			})
		})
		.filter_map(|obj| obj.meta().name.clone())
		.min()
}

fn names<K: Resource>(objects: &[K]) -> BTreeSet<String> {
	objects
		.iter()
		.filter_map(|obj| obj.meta().name.clone())
		.collect()
}

/// Render an error and its sources on one line.
pub fn describe_error(err: &dyn std::error::Error) -> String {
	let mut message = err.to_string();
	let mut source = err.source();
	while let Some(inner) = source {
		message.push_str(": ");
		message.push_str(&inner.to_string());
		source = inner.source();
	}
	message
}

/// Gathers an [`Inventory`] from a live cluster.
#[derive(Builder)]
pub struct Collector {
	client: Client,
	#[builder(default = DEFAULT_SERVICE_ACCOUNT_CONCURRENCY)]
	service_account_concurrency: usize,
}

impl Collector {
	/// Query the cluster for everything `requirements` needs.
	///
	/// Never fails: each failed query is logged, recorded as unavailable and
	/// contributes nothing.
	#[instrument(skip_all)]
	pub async fn collect(
		&self,
		surface: Result<&ApiSurface, &DiscoveryError>,
		requirements: &Requirements,
	) -> Inventory {
		let mut unavailable = BTreeMap::new();
		let mut record = |query: InventoryQuery, err: &dyn std::error::Error| {
			let message = describe_error(err);
			warn!(%query, error = %message, "inventory query failed");
			unavailable.insert(query, message);
		};

		let (supported_kinds, preferred_versions) = match surface {
			Ok(surface) => (surface.supported_kinds(), surface.preferred_by_group()),
			Err(e) => {
				record(InventoryQuery::Discovery, e);
				Default::default()
			}
		};

		let storage = Api::<StorageClass>::all(self.client.clone())
			.list(&ListParams::default())
			.await;
		let (storage_classes, default_storage) = match storage {
			Ok(list) => (names(&list.items), default_storage_class(&list.items)),
			Err(e) => {
				record(InventoryQuery::StorageClasses, &e);
				Default::default()
			}
		};

		let ingress = Api::<IngressClass>::all(self.client.clone())
			.list(&ListParams::default())
			.await;
		let (ingress_classes, default_ingress) = match ingress {
			Ok(list) => (names(&list.items), default_ingress_class(&list.items)),
			Err(e) => {
				record(InventoryQuery::IngressClasses, &e);
				Default::default()
			}
		};

		let namespaces = match Api::<Namespace>::all(self.client.clone())
			.list(&ListParams::default())
			.await
		{
			Ok(list) => names(&list.items),
			Err(e) => {
				record(InventoryQuery::Namespaces, &e);
				BTreeSet::new()
			}
		};

		let lookup = self
			.lookup_service_accounts(requirements.external_service_accounts().cloned())
			.await;
		if let Some(message) = lookup.first_error {
			let query = InventoryQuery::ServiceAccounts;
			warn!(%query, error = %message, "inventory query failed");
			unavailable.insert(query, message);
		}

		debug!(
			kinds = supported_kinds.len(),
			storage_classes = storage_classes.len(),
			ingress_classes = ingress_classes.len(),
			namespaces = namespaces.len(),
			service_accounts = lookup.found.len(),
			unavailable = unavailable.len(),
			"collected inventory"
		);

		Inventory::builder()
			.supported_kinds(supported_kinds)
			.preferred_versions(preferred_versions)
			.storage_classes(storage_classes)
			.maybe_default_storage_class(default_storage)
			.ingress_classes(ingress_classes)
			.maybe_default_ingress_class(default_ingress)
			.namespaces(namespaces)
			.service_accounts(lookup.found)
			.unresolved_service_accounts(lookup.unresolved)
			.unavailable(unavailable)
			.build()
	}

	/// Check which of `wanted` exist, one GET per service account, with
	/// bounded concurrency.
	#[instrument(skip_all)]
	async fn lookup_service_accounts(
		&self,
		wanted: impl Iterator<Item = ServiceAccountRef>,
	) -> ServiceAccountLookup {
		let semaphore = Arc::new(Semaphore::new(self.service_account_concurrency.max(1)));
		let mut join_set = JoinSet::new();
		// Accounts without a definite answer yet. A panicked task leaves its
		// account here.
		let mut unresolved = BTreeSet::new();

		for sa in wanted {
			let client = self.client.clone();
			let sem = semaphore.clone();
			unresolved.insert(sa.clone());

			join_set.spawn(async move {
				let _permit = sem.acquire().await.expect("semaphore closed");
				debug!(service_account = %sa, "looking up service account");

				let api = Api::<ServiceAccount>::namespaced(client, &sa.namespace);
				let result = api.get_opt(&sa.name).await;
				(sa, result)
			});
		}

		let mut found = BTreeSet::new();
		let mut first_error = None;

		while let Some(joined) = join_set.join_next().await {
			match joined {
				Ok((sa, Ok(exists))) => {
					unresolved.remove(&sa);
					if exists.is_some() {
						found.insert(sa);
					}
				}
				Ok((sa, Err(e))) => {
					debug!(service_account = %sa, error = %e, "service account lookup failed");
					first_error.get_or_insert_with(|| describe_error(&e));
				}
				Err(e) => {
					first_error.get_or_insert_with(|| describe_error(&e));
				}
			}
		}

		ServiceAccountLookup {
			found,
			unresolved,
			first_error,
		}
	}
}

struct ServiceAccountLookup {
	found: BTreeSet<ServiceAccountRef>,
	unresolved: BTreeSet<ServiceAccountRef>,
	first_error: Option<String>,
}

#[cfg(test)]
mod tests {
	use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

	use super::*;

	fn storage_class(name: &str, annotations: &[(&str, &str)]) -> StorageClass {
		StorageClass {
			metadata: ObjectMeta {
				name: Some(name.to_string()),
				annotations: Some(
					annotations
						.iter()
						.map(|(k, v)| ((*k).to_string(), (*v).to_string()))
						.collect::<BTreeMap<_, _>>(),
				),
				..Default::default()
			},
			provisioner: "ebs.csi.aws.com".to_string(),
			..Default::default()
		}
	}

	#[test]
	fn test_default_storage_class_annotations() {
		let classes = [
			storage_class("standard", &[]),
			storage_class(
				"gp3",
				&[("storageclass.kubernetes.io/is-default-class", "true")],
			),
			storage_class(
				"legacy",
				&[("storageclass.beta.kubernetes.io/is-default-class", "false")],
			),
		];
		assert_eq!(default_storage_class(&classes).as_deref(), Some("gp3"));
		assert_eq!(default_storage_class(&classes[..1]), None);
	}

	#[test]
	fn test_beta_default_annotation_and_tie_break() {
		let classes = [
			storage_class(
				"zonal",
				&[("storageclass.kubernetes.io/is-default-class", "true")],
			),
			storage_class(
				"basic",
				&[("storageclass.beta.kubernetes.io/is-default-class", "true")],
			),
		];
		assert_eq!(default_storage_class(&classes).as_deref(), Some("basic"));
	}

	#[test]
	fn test_builder_defaults_are_empty() {
		let inventory = Inventory::builder().default_storage_class("gp2").build();
		assert_eq!(inventory.default_storage_class(), Some("gp2"));
		assert!(inventory.storage_class_names().is_empty());
		assert!(inventory.unavailable().is_empty());
		assert!(!inventory.supports(&ApiKindRef::new("v1", "ConfigMap")));
	}

	#[test]
	fn test_service_account_unknown_is_per_account() {
		let failed = ServiceAccountRef::new("ci", "builder");
		let clean = ServiceAccountRef::new("ci", "ghost");
		let unavailable =
			BTreeMap::from([(InventoryQuery::ServiceAccounts, "forbidden".to_string())]);

		let inventory = Inventory::builder()
			.unresolved_service_accounts([failed.clone()].into())
			.unavailable(unavailable)
			.build();
		assert!(inventory.service_account_unknown(&failed));
		assert!(!inventory.service_account_unknown(&clean));

		let unreachable = Inventory::unreachable("connection refused");
		assert!(unreachable.service_account_unknown(&clean));
		assert!(!Inventory::default().service_account_unknown(&clean));
	}

	#[test]
	fn test_describe_error_includes_sources() {
		let err = crate::manifest::ManifestError::Read {
			path: "/srv/manifests".into(),
			source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
		};
		assert_eq!(describe_error(&err), "reading /srv/manifests: no such file");
	}
}
