//! Well-known fact keys.
//!
//! The differ matches keys by exact string equality, so collectors and the
//! differ must agree on these names.

pub const CLUSTER_CONTEXT: &str = "cluster.context";
pub const CLUSTER_SERVER_VERSION: &str = "cluster.server_version";
pub const CLUSTER_PLATFORM: &str = "cluster.platform";
pub const CLUSTER_NAMESPACES: &str = "cluster.namespaces";

pub const APIS_PREFERRED: &str = "apis.preferred";
pub const APIS_RESOURCES: &str = "apis.resources";

pub const NODES_COUNT: &str = "nodes.count";
pub const NODES_KUBELET_VERSIONS: &str = "nodes.kubelet_versions";
pub const NODES_OS_IMAGES: &str = "nodes.os_images";
pub const NODES_ARCHITECTURES: &str = "nodes.architectures";
pub const NODES_CONTAINER_RUNTIMES: &str = "nodes.container_runtimes";
pub const NODES_ZONES: &str = "nodes.zones";
pub const NODES_INSTANCE_TYPES: &str = "nodes.instance_types";

pub const CAPACITY_CPU: &str = "capacity.cpu";
pub const CAPACITY_MEMORY: &str = "capacity.memory";
pub const CAPACITY_PODS: &str = "capacity.pods";

pub const STORAGE_CLASSES: &str = "storage.classes";
pub const STORAGE_DEFAULT: &str = "storage.default";
pub const STORAGE_PROVISIONERS: &str = "storage.provisioners";
pub const STORAGE_CSI_DRIVERS: &str = "storage.csi_drivers";

pub const NETWORK_CNI: &str = "network.cni";
pub const NETWORK_DNS: &str = "network.dns";

pub const INGRESS_CLASSES: &str = "ingress.classes";
pub const INGRESS_CONTROLLERS: &str = "ingress.controllers";
pub const INGRESS_DEFAULT: &str = "ingress.default";

pub const ADDONS_KUBE_SYSTEM: &str = "addons.kube_system";

pub const POLICY_PSA_DEFAULT: &str = "policy.psa.default";
pub const POLICY_PSA_ENFORCED_NAMESPACES: &str = "policy.psa.enforced_namespaces";

pub const ADMISSION_VALIDATING_WEBHOOKS: &str = "admission.validating_webhooks";
pub const ADMISSION_MUTATING_WEBHOOKS: &str = "admission.mutating_webhooks";
pub const ADMISSION_VALIDATING_CONFIGURATIONS: &str = "admission.validating_configurations";
pub const ADMISSION_MUTATING_CONFIGURATIONS: &str = "admission.mutating_configurations";

pub const CRDS_COUNT: &str = "crds.count";
pub const CRDS_NAMES: &str = "crds.names";

/// Per-namespace key, e.g. `ns.kube-system.resourcequotas`.
pub fn namespaced(namespace: &str, leaf: &str) -> String {
	format!("ns.{namespace}.{leaf}")
}

/// Resource kinds whose disappearance makes a migration impossible for
/// ordinary workloads. Stored as plural resource names, as in `apis.resources`.
pub const DEFAULT_MUST_HAVE_RESOURCES: &[&str] = &[
	"deployments",
	"statefulsets",
	"daemonsets",
	"jobs",
	"cronjobs",
	"ingresses",
];
