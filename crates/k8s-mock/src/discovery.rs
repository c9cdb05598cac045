//! Mock Kubernetes API discovery data.
//!
//! Groups may serve several versions. The first version listed for a group is
//! its preferred version, both in the legacy `APIGroupList` response and in
//! the aggregated discovery document.

/// Discovery mode for the mock server.
#[derive(Clone, Copy, Default)]
pub enum DiscoveryMode {
	/// Support aggregated discovery (APIGroupDiscoveryList).
	#[default]
	Aggregated,
	/// Return 406 for aggregated discovery, forcing fallback to legacy endpoints.
	Legacy,
}

/// A mock API resource definition.
#[derive(Clone, Debug)]
pub struct MockApiResource {
	/// Plural resource name, used in request paths.
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

const STANDARD_VERBS: &[&str] = &[
	"create", "delete", "get", "list", "patch", "update", "watch",
];

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced: true,
			verbs: STANDARD_VERBS.iter().map(|v| (*v).to_string()).collect(),
		}
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self {
			namespaced: false,
			..Self::namespaced(name, kind)
		}
	}
}

/// One served version of an API group.
#[derive(Clone, Debug)]
pub struct MockGroupVersion {
	pub version: String,
	pub resources: Vec<MockApiResource>,
}

/// A named API group. `versions[0]` is the preferred version.
#[derive(Clone, Debug)]
pub struct MockApiGroup {
	pub name: String,
	pub versions: Vec<MockGroupVersion>,
}

impl MockApiGroup {
	pub fn new(name: &str, version: &str, resources: Vec<MockApiResource>) -> Self {
		Self {
			name: name.to_string(),
			versions: vec![MockGroupVersion {
				version: version.to_string(),
				resources,
			}],
		}
	}

	/// Serve an additional, non-preferred version.
	pub fn also_serving(mut self, version: &str, resources: Vec<MockApiResource>) -> Self {
		self.versions.push(MockGroupVersion {
			version: version.to_string(),
			resources,
		});
		self
	}

	pub fn preferred_version(&self) -> &str {
		self.versions
			.first()
			.map(|v| v.version.as_str())
			.unwrap_or_default()
	}
}

/// Pre-configured discovery responses.
#[derive(Clone, Debug)]
pub struct MockDiscovery {
	/// Resources of the core (`v1`) API.
	pub core_resources: Vec<MockApiResource>,
	pub groups: Vec<MockApiGroup>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		use MockApiResource as R;

		Self {
			core_resources: vec![
				R::namespaced("configmaps", "ConfigMap"),
				R::namespaced("secrets", "Secret"),
				R::namespaced("services", "Service"),
				R::namespaced("pods", "Pod"),
				R::namespaced("serviceaccounts", "ServiceAccount"),
				R::namespaced("persistentvolumeclaims", "PersistentVolumeClaim"),
				R::namespaced("resourcequotas", "ResourceQuota"),
				R::namespaced("limitranges", "LimitRange"),
				R::cluster_scoped("namespaces", "Namespace"),
				R::cluster_scoped("nodes", "Node"),
				R::cluster_scoped("persistentvolumes", "PersistentVolume"),
			],
			groups: vec![
				MockApiGroup::new(
					"apps",
					"v1",
					vec![
						R::namespaced("deployments", "Deployment"),
						R::namespaced("statefulsets", "StatefulSet"),
						R::namespaced("daemonsets", "DaemonSet"),
					],
				),
				MockApiGroup::new(
					"batch",
					"v1",
					vec![
						R::namespaced("jobs", "Job"),
						R::namespaced("cronjobs", "CronJob"),
					],
				),
				MockApiGroup::new(
					"networking.k8s.io",
					"v1",
					vec![
						R::namespaced("ingresses", "Ingress"),
						R::cluster_scoped("ingressclasses", "IngressClass"),
						R::namespaced("networkpolicies", "NetworkPolicy"),
					],
				),
				MockApiGroup::new(
					"storage.k8s.io",
					"v1",
					vec![
						R::cluster_scoped("storageclasses", "StorageClass"),
						R::cluster_scoped("csidrivers", "CSIDriver"),
					],
				),
				MockApiGroup::new(
					"rbac.authorization.k8s.io",
					"v1",
					vec![
						R::namespaced("roles", "Role"),
						R::namespaced("rolebindings", "RoleBinding"),
						R::cluster_scoped("clusterroles", "ClusterRole"),
						R::cluster_scoped("clusterrolebindings", "ClusterRoleBinding"),
					],
				),
				MockApiGroup::new(
					"admissionregistration.k8s.io",
					"v1",
					vec![
						R::cluster_scoped(
							"validatingwebhookconfigurations",
							"ValidatingWebhookConfiguration",
						),
						R::cluster_scoped(
							"mutatingwebhookconfigurations",
							"MutatingWebhookConfiguration",
						),
					],
				),
				MockApiGroup::new(
					"apiextensions.k8s.io",
					"v1",
					vec![R::cluster_scoped(
						"customresourcedefinitions",
						"CustomResourceDefinition",
					)],
				),
			],
		}
	}
}

impl MockDiscovery {
	/// Add a group, replacing any existing group of the same name.
	pub fn with_group(mut self, group: MockApiGroup) -> Self {
		self.groups.retain(|g| g.name != group.name);
		self.groups.push(group);
		self
	}

	/// Stop serving a group entirely.
	pub fn without_group(mut self, name: &str) -> Self {
		self.groups.retain(|g| g.name != name);
		self
	}

	/// Find the served resource for an `apiVersion`/`kind` pair.
	pub fn find(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		match api_version.split_once('/') {
			Some((group, version)) => self
				.groups
				.iter()
				.find(|g| g.name == group)?
				.versions
				.iter()
				.find(|v| v.version == version)?
				.resources
				.iter()
				.find(|r| r.kind == kind),
			None if api_version == "v1" => self.core_resources.iter().find(|r| r.kind == kind),
			None => None,
		}
	}

	/// Iterate `(groupVersion, resources)` for every served group version.
	pub fn group_versions(&self) -> impl Iterator<Item = (String, &MockGroupVersion)> {
		self.groups.iter().flat_map(|g| {
			g.versions
				.iter()
				.map(move |v| (format!("{}/{}", g.name, v.version), v))
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_find_respects_version() {
		let discovery = MockDiscovery::default().with_group(
			MockApiGroup::new(
				"batch",
				"v1",
				vec![MockApiResource::namespaced("cronjobs", "CronJob")],
			)
			.also_serving(
				"v1beta1",
				vec![MockApiResource::namespaced("cronjobs", "CronJob")],
			),
		);

		assert!(discovery.find("batch/v1beta1", "CronJob").is_some());
		assert!(discovery.find("batch/v2", "CronJob").is_none());
		assert!(discovery.find("v1", "Namespace").is_some());
		assert!(discovery.find("v2", "Namespace").is_none());
		assert_eq!(
			discovery
				.groups
				.iter()
				.find(|g| g.name == "batch")
				.unwrap()
				.preferred_version(),
			"v1"
		);
	}

	#[test]
	fn test_without_group() {
		let discovery = MockDiscovery::default().without_group("batch");
		assert!(discovery.find("batch/v1", "Job").is_none());
		assert!(discovery.find("apps/v1", "Deployment").is_some());
	}
}
