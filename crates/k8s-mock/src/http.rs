//! HTTP-based mock Kubernetes server using wiremock.
//!
//! Serves discovery, typed resource lists and single objects from a fixed set
//! of manifests, and answers server-side apply dry-runs. Individual objects can
//! be made to fail dry-run validation, and path prefixes can be made to answer
//! 403 to simulate missing RBAC permissions.

use std::{
	collections::HashMap,
	sync::{Arc, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::discovery::{DiscoveryMode, MockApiResource, MockDiscovery};

/// An object stored by the mock server.
#[derive(Clone, Debug)]
struct StoredObject {
	/// `/api/v1` or `/apis/<group>/<version>`.
	base: String,
	namespace: Option<String>,
	plural: String,
	name: String,
	body: Value,
}

type SharedObjects = Arc<RwLock<Vec<StoredObject>>>;

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery_mode: DiscoveryMode,
	#[builder(default)]
	discovery: MockDiscovery,
	/// Objects to serve as raw manifests. Paths are derived from
	/// apiVersion/kind using the discovery data; unknown kinds are dropped.
	#[builder(default)]
	resources: Vec<Value>,
	/// Object name → message. Dry-run applies of these objects are rejected
	/// with 422 Invalid.
	#[builder(default)]
	dry_run_rejections: HashMap<String, String>,
	/// Request path prefixes answered with 403 Forbidden.
	#[builder(default)]
	forbidden_paths: Vec<String>,
	#[builder(into, default = "v1.28.0")]
	git_version: String,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	objects: SharedObjects,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;

		debug!(uri = %server.uri(), "started mock K8s server");

		let mut objects: Vec<StoredObject> = self
			.resources
			.into_iter()
			.filter_map(|manifest| store_manifest(manifest, &self.discovery))
			.collect();

		if !objects
			.iter()
			.any(|o| o.plural == "namespaces" && o.name == "default")
		{
			objects.extend(store_manifest(
				json!({
					"apiVersion": "v1",
					"kind": "Namespace",
					"metadata": { "name": "default" }
				}),
				&self.discovery,
			));
		}

		let objects = Arc::new(RwLock::new(objects));

		// Forbidden paths are mounted first so they take precedence.
		for prefix in &self.forbidden_paths {
			mount_forbidden(&server, prefix).await;
		}
		mount_version(&server, &self.git_version).await;
		mount_discovery(&server, &self.discovery, self.discovery_mode).await;
		mount_objects(&server, &objects, Arc::new(self.dry_run_rejections)).await;

		RunningHttpMockK8sServer { server, objects }
	}
}

fn store_manifest(manifest: Value, discovery: &MockDiscovery) -> Option<StoredObject> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.pointer("/metadata/name")?.as_str()?.to_string();
	let resource = discovery.find(api_version, kind)?;

	let base = if api_version.contains('/') {
		format!("/apis/{api_version}")
	} else {
		format!("/api/{api_version}")
	};
	let namespace = resource.namespaced.then(|| {
		manifest
			.pointer("/metadata/namespace")
			.and_then(Value::as_str)
			.unwrap_or("default")
			.to_string()
	});

	trace!(%base, plural = %resource.name, %name, "registered object");

	Some(StoredObject {
		base,
		namespace,
		plural: resource.name.clone(),
		name,
		body: manifest,
	})
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Number of objects currently stored.
	pub fn object_count(&self) -> usize {
		self.objects.read().map_or(0, |o| o.len())
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}
}

fn status(code: u16, reason: &str, message: &str) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

fn list(items: Vec<Value>) -> ResponseTemplate {
	ResponseTemplate::new(200).set_body_json(json!({
		"kind": "List",
		"apiVersion": "v1",
		"metadata": { "resourceVersion": "1" },
		"items": items
	}))
}

async fn mount_forbidden(server: &MockServer, prefix: &str) {
	let prefix = prefix.to_string();
	Mock::given(method("GET"))
		.and(move |req: &Request| req.url.path().starts_with(&prefix))
		.respond_with(status(403, "Forbidden", "access denied by mock RBAC"))
		.with_priority(1)
		.mount(server)
		.await;
}

async fn mount_version(server: &MockServer, git_version: &str) {
	let mut parts = git_version.trim_start_matches('v').split('.');
	let major = parts.next().unwrap_or("1");
	let minor = parts.next().unwrap_or("0");

	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"major": major,
			"minor": minor,
			"gitVersion": git_version,
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-01-01T00:00:00Z",
			"goVersion": "go1.21.0",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

fn aggregated_resource(group: &str, version: &str, r: &MockApiResource) -> Value {
	json!({
		"resource": r.name,
		"responseKind": { "group": group, "version": version, "kind": r.kind },
		"scope": if r.namespaced { "Namespaced" } else { "Cluster" },
		"verbs": r.verbs,
	})
}

fn legacy_resource_list(group_version: &str, resources: &[MockApiResource]) -> Value {
	let resources: Vec<_> = resources
		.iter()
		.map(|r| {
			json!({
				"name": r.name,
				"singularName": "",
				"namespaced": r.namespaced,
				"kind": r.kind,
				"verbs": r.verbs,
			})
		})
		.collect();

	json!({
		"kind": "APIResourceList",
		"apiVersion": "v1",
		"groupVersion": group_version,
		"resources": resources
	})
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	const AGGREGATED_DISCOVERY_CONTENT_TYPE: &str =
		"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

	match mode {
		DiscoveryMode::Aggregated => {
			let core_body = json!({
				"kind": "APIGroupDiscoveryList",
				"apiVersion": "apidiscovery.k8s.io/v2",
				"items": [{
					"metadata": { "name": "" },
					"versions": [{
						"version": "v1",
						"resources": discovery
							.core_resources
							.iter()
							.map(|r| aggregated_resource("", "v1", r))
							.collect::<Vec<_>>(),
						"freshness": "Current"
					}]
				}]
			});

			let groups: Vec<_> = discovery
				.groups
				.iter()
				.map(|g| {
					// Aggregated discovery lists versions in preference order.
					let versions: Vec<_> = g
						.versions
						.iter()
						.map(|v| {
							json!({
								"version": v.version,
								"resources": v
									.resources
									.iter()
									.map(|r| aggregated_resource(&g.name, &v.version, r))
									.collect::<Vec<_>>(),
								"freshness": "Current"
							})
						})
						.collect();
					json!({ "metadata": { "name": g.name }, "versions": versions })
				})
				.collect();
			let apis_body = json!({
				"kind": "APIGroupDiscoveryList",
				"apiVersion": "apidiscovery.k8s.io/v2",
				"items": groups
			});

			// set_body_json would overwrite the Content-Type the client
			// needs to recognise the aggregated format.
			for (route, body) in [("/api", core_body), ("/apis", apis_body)] {
				let body = serde_json::to_vec(&body)
					.expect("serializing discovery JSON should never fail");
				Mock::given(method("GET"))
					.and(path(route))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(
						ResponseTemplate::new(200)
							.set_body_raw(body, AGGREGATED_DISCOVERY_CONTENT_TYPE),
					)
					.mount(server)
					.await;
			}
		}
		DiscoveryMode::Legacy => {
			for route in ["/api", "/apis"] {
				Mock::given(method("GET"))
					.and(path(route))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(ResponseTemplate::new(406))
					.mount(server)
					.await;
			}
		}
	}

	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": []
		})))
		.mount(server)
		.await;

	let groups: Vec<_> = discovery
		.groups
		.iter()
		.map(|g| {
			let versions: Vec<_> = g
				.versions
				.iter()
				.map(|v| {
					json!({
						"groupVersion": format!("{}/{}", g.name, v.version),
						"version": v.version
					})
				})
				.collect();
			json!({
				"name": g.name,
				"versions": versions,
				"preferredVersion": {
					"groupVersion": format!("{}/{}", g.name, g.preferred_version()),
					"version": g.preferred_version()
				}
			})
		})
		.collect();

	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIGroupList",
			"apiVersion": "v1",
			"groups": groups
		})))
		.mount(server)
		.await;

	Mock::given(method("GET"))
		.and(path("/api/v1"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(legacy_resource_list("v1", &discovery.core_resources)),
		)
		.mount(server)
		.await;

	for (gv, version) in discovery.group_versions() {
		Mock::given(method("GET"))
			.and(path(format!("/apis/{gv}")))
			.respond_with(
				ResponseTemplate::new(200)
					.set_body_json(legacy_resource_list(&gv, &version.resources)),
			)
			.mount(server)
			.await;
	}
}

/// What a resource request path refers to.
#[derive(Debug, PartialEq, Eq)]
enum Target {
	Collection {
		base: String,
		namespace: Option<String>,
		plural: String,
	},
	Object {
		base: String,
		namespace: Option<String>,
		plural: String,
		name: String,
	},
}

/// Classify a request path.
///
/// - `/api/v1/namespaces` → collection of namespaces
/// - `/api/v1/namespaces/kube-system` → the `kube-system` Namespace
/// - `/apis/apps/v1/namespaces/prod/deployments` → namespaced collection
/// - `/apis/apps/v1/deployments` → collection across all namespaces
/// - `/apis/apps/v1/namespaces/prod/deployments/web` → object
fn classify(path: &str) -> Option<Target> {
	let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
	let base_len = match segments.first() {
		Some(&"api") => 2,
		Some(&"apis") => 3,
		_ => return None,
	};
	if segments.len() <= base_len {
		return None;
	}
	let base = format!("/{}", segments[..base_len].join("/"));
	let owned = |s: &str| s.to_string();

	Some(match &segments[base_len..] {
		[plural] => Target::Collection {
			base,
			namespace: None,
			plural: owned(plural),
		},
		[plural, name] => Target::Object {
			base,
			namespace: None,
			plural: owned(plural),
			name: owned(name),
		},
		["namespaces", ns, plural] => Target::Collection {
			base,
			namespace: Some(owned(ns)),
			plural: owned(plural),
		},
		["namespaces", ns, plural, name] => Target::Object {
			base,
			namespace: Some(owned(ns)),
			plural: owned(plural),
			name: owned(name),
		},
		_ => return None,
	})
}

/// Overlay `patch` onto `base`, recursing into objects.
fn merge_json(base: Value, patch: Value) -> Value {
	match (base, patch) {
		(Value::Object(mut base_map), Value::Object(patch_map)) => {
			for (key, patch_value) in patch_map {
				let base_value = base_map.remove(&key).unwrap_or(Value::Null);
				base_map.insert(key, merge_json(base_value, patch_value));
			}
			Value::Object(base_map)
		}
		(_, patch) => patch,
	}
}

async fn mount_objects(
	server: &MockServer,
	objects: &SharedObjects,
	rejections: Arc<HashMap<String, String>>,
) {
	let get_objects = Arc::clone(objects);
	let patch_objects = Arc::clone(objects);

	Mock::given(method("PATCH"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let Some(Target::Object {
				base,
				namespace,
				plural,
				name,
			}) = classify(req.url.path())
			else {
				return status(404, "NotFound", "the server could not find the requested resource");
			};
			let is_dry_run = req.url.query().unwrap_or("").contains("dryRun");

			if let Some(message) = rejections.get(&name) {
				return status(422, "Invalid", message);
			}

			let patch: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
			let mut objects = patch_objects.write().expect("object store poisoned");
			let existing = objects.iter().position(|o| {
				o.base == base && o.namespace == namespace && o.plural == plural && o.name == name
			});
			let merged = match existing {
				Some(idx) => merge_json(objects[idx].body.clone(), patch),
				None => patch,
			};

			if !is_dry_run {
				let stored = StoredObject {
					base,
					namespace,
					plural,
					name,
					body: merged.clone(),
				};
				match existing {
					Some(idx) => objects[idx] = stored,
					None => objects.push(stored),
				}
			}

			ResponseTemplate::new(200).set_body_json(merged)
		})
		.mount(server)
		.await;

	Mock::given(method("GET"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let objects = get_objects.read().expect("object store poisoned");

			match classify(req.url.path()) {
				Some(Target::Collection {
					base,
					namespace,
					plural,
				}) => list(
					objects
						.iter()
						.filter(|o| o.base == base && o.plural == plural)
						.filter(|o| namespace.is_none() || o.namespace == namespace)
						.map(|o| o.body.clone())
						.collect(),
				),
				Some(Target::Object {
					base,
					namespace,
					plural,
					name,
				}) => objects
					.iter()
					.find(|o| {
						o.base == base
							&& o.namespace == namespace
							&& o.plural == plural
							&& o.name == name
					})
					.map_or_else(
						|| status(404, "NotFound", &format!("{plural} \"{name}\" not found")),
						|o| ResponseTemplate::new(200).set_body_json(o.body.clone()),
					),
				None => status(404, "NotFound", "the server could not find the requested resource"),
			}
		})
		.mount(server)
		.await;
}
