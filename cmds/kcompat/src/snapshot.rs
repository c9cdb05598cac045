//! Capture a cluster's observable configuration as facts.
//!
//! Facts are handed to a [`FactSink`] as soon as each query completes. A
//! failed query is logged and its keys are left out; only sink errors abort
//! the snapshot.

use std::collections::BTreeMap;

use k8s_openapi::{
	api::{
		admissionregistration::v1::{MutatingWebhookConfiguration, ValidatingWebhookConfiguration},
		apps::v1::{DaemonSet, Deployment},
		core::v1::{LimitRange, Namespace, Node, PodTemplateSpec, ResourceQuota},
		networking::v1::IngressClass,
		storage::v1::{CSIDriver, StorageClass},
	},
	apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
};
use kcompat_facts::{
	keys,
	quantity::{parse_cpu_millis, parse_memory_bytes},
	FactError, FactSet, FactSink,
};
use kube::{
	api::{Api, ListParams},
	Resource,
};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::{
	inventory::{default_ingress_class, default_storage_class},
	k8s::{
		client::ClusterConnection,
		discovery::{ApiSurface, DiscoveryError},
	},
};

const KUBE_SYSTEM: &str = "kube-system";
const PSA_LABEL_PREFIX: &str = "pod-security.kubernetes.io/";
const PSA_ENFORCE_LABEL: &str = "pod-security.kubernetes.io/enforce";
const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";

/// Substrings of kube-system DaemonSet names and the CNI they indicate.
/// Checked in order; `canal` bundles calico and flannel so it goes first.
const CNI_MARKERS: &[(&str, &str)] = &[
	("canal", "canal"),
	("calico", "calico"),
	("cilium", "cilium"),
	("flannel", "flannel"),
	("weave", "weave"),
	("kube-router", "kube-router"),
	("antrea", "antrea"),
	("aws-node", "aws-vpc-cni"),
	("azure-cni", "azure-cni"),
	("ovnkube", "ovn-kubernetes"),
];

/// Guess the CNI from kube-system DaemonSet names. `extra` markers take
/// precedence over the built-in ones.
pub fn guess_cni<'a>(
	daemonsets: impl IntoIterator<Item = &'a str> + Clone,
	extra: &BTreeMap<String, String>,
) -> String {
	let seen = |marker: &str| daemonsets.clone().into_iter().any(|name| name.contains(marker));

	if let Some((_, cni)) = extra.iter().find(|(marker, _)| seen(marker)) {
		return cni.clone();
	}
	CNI_MARKERS
		.iter()
		.find(|(marker, _)| seen(marker))
		.map_or("unknown", |&(_, cni)| cni)
		.to_string()
}

/// Guess the cluster DNS from kube-system Deployment names.
pub fn guess_dns<'a>(deployments: impl IntoIterator<Item = &'a str>) -> &'static str {
	let mut dns = "unknown";
	for name in deployments {
		if name.contains("coredns") {
			return "coredns";
		}
		if name.contains("kube-dns") {
			dns = "kube-dns";
		}
	}
	dns
}

fn images(template: Option<&PodTemplateSpec>) -> Vec<String> {
	template
		.and_then(|t| t.spec.as_ref())
		.map(|spec| {
			spec.containers
				.iter()
				.filter_map(|c| c.image.clone())
				.collect()
		})
		.unwrap_or_default()
}

/// `<Kind>/<name>=<image>[,<image>...]` for every workload.
pub fn addon_entries(daemonsets: &[DaemonSet], deployments: &[Deployment]) -> FactSet {
	let ds = daemonsets.iter().map(|d| {
		(
			"DaemonSet",
			d.metadata.name.clone().unwrap_or_default(),
			images(d.spec.as_ref().map(|s| &s.template)),
		)
	});
	let deploy = deployments.iter().map(|d| {
		(
			"Deployment",
			d.metadata.name.clone().unwrap_or_default(),
			images(d.spec.as_ref().map(|s| &s.template)),
		)
	});

	ds.chain(deploy)
		.map(|(kind, name, images)| format!("{kind}/{name}={}", images.join(",")))
		.collect()
}

/// Pod security labels of a namespace as `mode=level`.
pub fn psa_labels(namespace: &Namespace) -> FactSet {
	namespace
		.metadata
		.labels
		.iter()
		.flatten()
		.filter_map(|(k, v)| {
			k.strip_prefix(PSA_LABEL_PREFIX)
				.map(|mode| format!("{mode}={v}"))
		})
		.collect()
}

/// Aggregated node facts.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NodeSummary {
	pub count: usize,
	pub kubelet_versions: FactSet,
	pub os_images: FactSet,
	pub architectures: FactSet,
	pub container_runtimes: FactSet,
	pub zones: FactSet,
	pub instance_types: FactSet,
	pub cpu_millis: u64,
	pub memory_bytes: u64,
	pub pods: u64,
}

impl NodeSummary {
	pub fn from_nodes(nodes: &[Node]) -> Self {
		let mut summary = Self {
			count: nodes.len(),
			..Self::default()
		};

		for node in nodes {
			if let Some(labels) = &node.metadata.labels {
				if let Some(zone) = labels.get(ZONE_LABEL) {
					summary.zones.insert(zone.clone());
				}
				if let Some(instance_type) = labels.get(INSTANCE_TYPE_LABEL) {
					summary.instance_types.insert(instance_type.clone());
				}
			}

			let Some(status) = &node.status else {
				continue;
			};
			if let Some(info) = &status.node_info {
				summary.kubelet_versions.insert(info.kubelet_version.clone());
				summary.os_images.insert(info.os_image.clone());
				summary.architectures.insert(info.architecture.clone());
				summary
					.container_runtimes
					.insert(info.container_runtime_version.clone());
			}
			if let Some(allocatable) = &status.allocatable {
				let get = |name: &str| allocatable.get(name).map(|q| q.0.as_str());
				summary.cpu_millis += get("cpu").and_then(parse_cpu_millis).unwrap_or(0);
				summary.memory_bytes += get("memory").and_then(parse_memory_bytes).unwrap_or(0);
				summary.pods += get("pods").and_then(|p| p.parse().ok()).unwrap_or(0);
			}
		}

		summary
	}
}

fn count_by_namespace<K: Resource>(objects: &[K]) -> BTreeMap<String, usize> {
	let mut counts = BTreeMap::new();
	for obj in objects {
		if let Some(ns) = &obj.meta().namespace {
			*counts.entry(ns.clone()).or_insert(0) += 1;
		}
	}
	counts
}

fn names<K: Resource>(objects: &[K]) -> FactSet {
	objects
		.iter()
		.filter_map(|obj| obj.meta().name.clone())
		.collect()
}

/// Collects facts from one cluster.
pub struct FactCollector<'a> {
	connection: &'a ClusterConnection,
	cni_markers: &'a BTreeMap<String, String>,
}

impl<'a> FactCollector<'a> {
	pub fn new(
		connection: &'a ClusterConnection,
		cni_markers: &'a BTreeMap<String, String>,
	) -> Self {
		Self {
			connection,
			cni_markers,
		}
	}

	fn api<K: Resource>(&self) -> Api<K>
	where
		K::DynamicType: Default,
	{
		Api::all(self.connection.client().clone())
	}

	async fn list<K>(&self, api: Api<K>, query: &str) -> Option<Vec<K>>
	where
		K: Clone + DeserializeOwned + std::fmt::Debug,
	{
		match api.list(&ListParams::default()).await {
			Ok(list) => {
				debug!(%query, items = list.items.len(), "listed");
				Some(list.items)
			}
			Err(e) => {
				warn!(%query, error = %e, "fact query failed; omitting its facts");
				None
			}
		}
	}

	/// Emit every fact this cluster exposes.
	#[instrument(skip_all, fields(context = self.connection.context()))]
	pub async fn collect<S: FactSink>(
		&self,
		surface: Result<&ApiSurface, &DiscoveryError>,
		sink: &mut S,
	) -> Result<(), FactError> {
		let version = self.connection.server_version();
		sink.emit(keys::CLUSTER_CONTEXT, self.connection.context())?;
		sink.emit(keys::CLUSTER_SERVER_VERSION, &version.git_version)?;
		sink.emit(keys::CLUSTER_PLATFORM, &version.platform)?;

		match surface {
			Ok(surface) => {
				let preferred: FactSet = surface.preferred_group_versions().into_iter().collect();
				let resources: FactSet = surface.preferred_resource_names().into_iter().collect();
				sink.emit_set(keys::APIS_PREFERRED, &preferred)?;
				sink.emit_set(keys::APIS_RESOURCES, &resources)?;
			}
			Err(e) => warn!(error = %e, "discovery failed; omitting API facts"),
		}

		if let Some(nodes) = self.list(self.api::<Node>(), "nodes").await {
			let summary = NodeSummary::from_nodes(&nodes);
			sink.emit_count(keys::NODES_COUNT, summary.count)?;
			sink.emit_set(keys::NODES_KUBELET_VERSIONS, &summary.kubelet_versions)?;
			sink.emit_set(keys::NODES_OS_IMAGES, &summary.os_images)?;
			sink.emit_set(keys::NODES_ARCHITECTURES, &summary.architectures)?;
			sink.emit_set(keys::NODES_CONTAINER_RUNTIMES, &summary.container_runtimes)?;
			sink.emit_set(keys::NODES_ZONES, &summary.zones)?;
			sink.emit_set(keys::NODES_INSTANCE_TYPES, &summary.instance_types)?;
			sink.emit(keys::CAPACITY_CPU, &format!("{}m", summary.cpu_millis))?;
			sink.emit(keys::CAPACITY_MEMORY, &summary.memory_bytes.to_string())?;
			sink.emit(keys::CAPACITY_PODS, &summary.pods.to_string())?;
		}

		let namespaces = self.list(self.api::<Namespace>(), "namespaces").await;
		if let Some(namespaces) = &namespaces {
			sink.emit_set(keys::CLUSTER_NAMESPACES, &names(namespaces))?;

			let default_labels = namespaces
				.iter()
				.find(|ns| ns.metadata.name.as_deref() == Some("default"))
				.map(psa_labels)
				.unwrap_or_default();
			sink.emit_set(keys::POLICY_PSA_DEFAULT, &default_labels)?;

			let enforced = namespaces
				.iter()
				.filter(|ns| {
					ns.metadata
						.labels
						.as_ref()
						.is_some_and(|l| l.contains_key(PSA_ENFORCE_LABEL))
				})
				.count();
			sink.emit_count(keys::POLICY_PSA_ENFORCED_NAMESPACES, enforced)?;
		}

		if let Some(classes) = self.list(self.api::<StorageClass>(), "storageclasses").await {
			sink.emit_set(keys::STORAGE_CLASSES, &names(&classes))?;
			sink.emit_set(
				keys::STORAGE_PROVISIONERS,
				&classes.iter().map(|c| c.provisioner.clone()).collect(),
			)?;
			sink.emit(
				keys::STORAGE_DEFAULT,
				&default_storage_class(&classes).unwrap_or_default(),
			)?;
		}
		if let Some(drivers) = self.list(self.api::<CSIDriver>(), "csidrivers").await {
			sink.emit_set(keys::STORAGE_CSI_DRIVERS, &names(&drivers))?;
		}

		let client = self.connection.client().clone();
		let daemonsets = self
			.list(
				Api::<DaemonSet>::namespaced(client.clone(), KUBE_SYSTEM),
				"kube-system daemonsets",
			)
			.await;
		let deployments = self
			.list(
				Api::<Deployment>::namespaced(client, KUBE_SYSTEM),
				"kube-system deployments",
			)
			.await;
		if let Some(daemonsets) = &daemonsets {
			let ds_names: Vec<String> = daemonsets
				.iter()
				.filter_map(|d| d.metadata.name.clone())
				.collect();
			sink.emit(
				keys::NETWORK_CNI,
				&guess_cni(ds_names.iter().map(String::as_str), self.cni_markers),
			)?;
		}
		if let Some(deployments) = &deployments {
			let dns = guess_dns(deployments.iter().filter_map(|d| d.metadata.name.as_deref()));
			sink.emit(keys::NETWORK_DNS, dns)?;
		}
		if let (Some(daemonsets), Some(deployments)) = (&daemonsets, &deployments) {
			sink.emit_set(keys::ADDONS_KUBE_SYSTEM, &addon_entries(daemonsets, deployments))?;
		}

		if let Some(classes) = self.list(self.api::<IngressClass>(), "ingressclasses").await {
			sink.emit_set(keys::INGRESS_CLASSES, &names(&classes))?;
			sink.emit_set(
				keys::INGRESS_CONTROLLERS,
				&classes
					.iter()
					.filter_map(|c| c.spec.as_ref()?.controller.clone())
					.collect(),
			)?;
			sink.emit(
				keys::INGRESS_DEFAULT,
				&default_ingress_class(&classes).unwrap_or_default(),
			)?;
		}

		if let Some(configs) = self
			.list(self.api::<ValidatingWebhookConfiguration>(), "validatingwebhookconfigurations")
			.await
		{
			let webhooks: usize = configs
				.iter()
				.map(|c| c.webhooks.as_ref().map_or(0, Vec::len))
				.sum();
			sink.emit_count(keys::ADMISSION_VALIDATING_WEBHOOKS, webhooks)?;
			sink.emit_set(keys::ADMISSION_VALIDATING_CONFIGURATIONS, &names(&configs))?;
		}
		if let Some(configs) = self
			.list(self.api::<MutatingWebhookConfiguration>(), "mutatingwebhookconfigurations")
			.await
		{
			let webhooks: usize = configs
				.iter()
				.map(|c| c.webhooks.as_ref().map_or(0, Vec::len))
				.sum();
			sink.emit_count(keys::ADMISSION_MUTATING_WEBHOOKS, webhooks)?;
			sink.emit_set(keys::ADMISSION_MUTATING_CONFIGURATIONS, &names(&configs))?;
		}

		if let Some(crds) = self
			.list(self.api::<CustomResourceDefinition>(), "customresourcedefinitions")
			.await
		{
			sink.emit_count(keys::CRDS_COUNT, crds.len())?;
			sink.emit_set(keys::CRDS_NAMES, &names(&crds))?;
		}

		if let Some(namespaces) = &namespaces {
			let quotas = self.list(self.api::<ResourceQuota>(), "resourcequotas").await;
			let limits = self.list(self.api::<LimitRange>(), "limitranges").await;
			let quota_counts = quotas.as_deref().map(count_by_namespace);
			let limit_counts = limits.as_deref().map(count_by_namespace);

			for ns in namespaces.iter().filter_map(|ns| ns.metadata.name.as_deref()) {
				if let Some(counts) = &quota_counts {
					let count = counts.get(ns).copied().unwrap_or(0);
					sink.emit_count(&keys::namespaced(ns, "resourcequotas"), count)?;
				}
				if let Some(counts) = &limit_counts {
					let count = counts.get(ns).copied().unwrap_or(0);
					sink.emit_count(&keys::namespaced(ns, "limitranges"), count)?;
				}
			}
		}

		Ok(())
	}
}
