//! The API surface a cluster serves.
//!
//! Discovery runs once per invocation. The result is normalized into an
//! [`ApiSurface`], which keeps every served version of every kind (dry-run
//! needs them to build requests) alongside the preferred version of each
//! group (compatibility only counts preferred versions).

use std::collections::{BTreeMap, BTreeSet};

use kube::{
	discovery::{ApiResource, Scope},
	Client, Discovery,
};
use thiserror::Error;
use tracing::instrument;

use super::ResourceScope;
use crate::requirements::ApiKindRef;

/// Errors that can occur during API resource discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("API discovery failed")]
	Discovery(#[source] kube::Error),
}

/// A kind served at one group version.
#[derive(Debug, Clone)]
pub struct ServedResource {
	/// The kube ApiResource for making API calls.
	pub api_resource: ApiResource,
	/// Whether this resource is namespaced or cluster-wide.
	pub scope: ResourceScope,
}

/// Normalized discovery data.
#[derive(Debug, Clone, Default)]
pub struct ApiSurface {
	/// Group name (`""` for core) to its preferred version.
	preferred: BTreeMap<String, String>,
	resources: BTreeMap<ApiKindRef, ServedResource>,
}

impl ApiSurface {
	/// Discover the cluster's API surface.
	///
	/// Uses the Aggregated Discovery API (K8s 1.26+) when available and falls
	/// back to walking every group version.
	#[instrument(skip(client))]
	pub async fn discover(client: &Client) -> Result<Self, DiscoveryError> {
		let discovery = match Discovery::new(client.clone()).run_aggregated().await {
			Ok(discovery) => {
				tracing::debug!("using aggregated discovery");
				discovery
			}
			Err(e) => {
				tracing::debug!(
					error = %e,
					"aggregated discovery not available, using full discovery"
				);
				Discovery::new(client.clone())
					.run()
					.await
					.map_err(DiscoveryError::Discovery)?
			}
		};

		let surface = Self::from_discovery(&discovery);
		tracing::debug!(
			groups = surface.preferred.len(),
			resources = surface.resources.len(),
			"discovered API surface"
		);
		Ok(surface)
	}

	/// Build from a completed kube Discovery.
	pub fn from_discovery(discovery: &Discovery) -> Self {
		let mut surface = Self::default();

		for group in discovery.groups() {
			surface.set_preferred(group.name(), group.preferred_version_or_latest());

			for version in group.versions() {
				for (ar, caps) in group.versioned_resources(version) {
					let scope = match caps.scope {
						Scope::Namespaced => ResourceScope::Namespaced,
						Scope::Cluster => ResourceScope::ClusterWide,
					};
					surface.insert(ar, scope);
				}
			}
		}

		surface
	}

	/// Record a served resource.
	pub fn insert(&mut self, api_resource: ApiResource, scope: ResourceScope) {
		let key = ApiKindRef::new(&api_resource.api_version, &api_resource.kind);
		self.preferred
			.entry(api_resource.group.clone())
			.or_insert_with(|| api_resource.version.clone());
		self.resources.insert(
			key,
			ServedResource {
				api_resource,
				scope,
			},
		);
	}

	/// Set the preferred version of a group.
	pub fn set_preferred(&mut self, group: &str, version: &str) {
		self.preferred
			.insert(group.to_string(), version.to_string());
	}

	/// Preferred `groupVersion` of every group, `v1` for the core group.
	pub fn preferred_group_versions(&self) -> BTreeSet<String> {
		self.preferred
			.iter()
			.map(|(group, version)| group_version(group, version))
			.collect()
	}

	/// Preferred `groupVersion` of one group.
	pub fn preferred_group_version(&self, group: &str) -> Option<String> {
		self.preferred
			.get(group)
			.map(|version| group_version(group, version))
	}

	/// Group name to preferred `groupVersion`, for every group.
	pub fn preferred_by_group(&self) -> BTreeMap<String, String> {
		self.preferred
			.iter()
			.map(|(group, version)| (group.clone(), group_version(group, version)))
			.collect()
	}

	/// Kinds served at a `groupVersion`.
	pub fn kinds_for(&self, group_version: &str) -> BTreeSet<String> {
		self.resources
			.keys()
			.filter(|k| k.api_version == group_version)
			.map(|k| k.kind.clone())
			.collect()
	}

	/// Every `groupVersion Kind` served at the preferred version of its group.
	pub fn supported_kinds(&self) -> BTreeSet<ApiKindRef> {
		self.preferred_group_versions()
			.into_iter()
			.flat_map(|gv| {
				self.kinds_for(&gv)
					.into_iter()
					.map(move |kind| ApiKindRef::new(gv.clone(), kind))
			})
			.collect()
	}

	/// Plural names of the resources served at preferred versions.
	pub fn preferred_resource_names(&self) -> BTreeSet<String> {
		let preferred = self.preferred_group_versions();
		self.resources
			.iter()
			.filter(|(k, _)| preferred.contains(&k.api_version))
			.map(|(_, served)| served.api_resource.plural.clone())
			.collect()
	}

	/// Look up a kind at any served version.
	pub fn lookup(&self, kind: &ApiKindRef) -> Option<&ServedResource> {
		self.resources.get(kind)
	}
}

fn group_version(group: &str, version: &str) -> String {
	if group.is_empty() {
		version.to_string()
	} else {
		format!("{group}/{version}")
	}
}
