//! Read-only access to the target cluster.
//!
//! Everything here goes through kube-rs; nothing mutates cluster state. The
//! only writes are server-side apply requests with `dryRun=All`.

pub mod client;
pub mod discovery;
pub mod dry_run;

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, ConfigMap).
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, ClusterRole).
	ClusterWide,
}
