//! End-to-end `check` against the HTTP mock server.

use std::{collections::HashMap, fs, net::TcpListener};

use indoc::indoc;
use k8s_mock::{
	discovery::{DiscoveryMode, MockApiGroup, MockApiResource, MockDiscovery},
	http::HttpMockK8sServer,
};
use kcompat::{
	commands::{
		check::{self, assess, assess_connection, CheckArgs},
		Outcome,
	},
	config::KcompatConfig,
	evaluate::{Check, Hint, Report, Status},
	k8s::client::ClusterConnection,
	manifest::Bundle,
	report::{ColorMode, OutputFormat},
};
use serde_json::json;

const BUNDLE: &str = indoc! {r#"
	apiVersion: apps/v1
	kind: Deployment
	metadata:
	  name: web
	  namespace: prod
	spec:
	  selector:
	    matchLabels: { app: web }
	  template:
	    metadata:
	      labels: { app: web }
	    spec:
	      containers:
	        - name: web
	          image: nginx:1.25
	---
	apiVersion: v1
	kind: ConfigMap
	metadata:
	  name: bad-config
	  namespace: prod
	data:
	  key: value
	---
	apiVersion: v1
	kind: PersistentVolumeClaim
	metadata:
	  name: data
	  namespace: prod
	spec:
	  storageClassName: fast-ssd
	  accessModes: [ReadWriteOnce]
	  resources:
	    requests: { storage: 1Gi }
	---
	apiVersion: networking.k8s.io/v1
	kind: Ingress
	metadata:
	  name: web
	  namespace: prod
	spec:
	  ingressClassName: nginx
	---
	apiVersion: rbac.authorization.k8s.io/v1
	kind: RoleBinding
	metadata:
	  name: deployers
	  namespace: prod
	roleRef:
	  apiGroup: rbac.authorization.k8s.io
	  kind: Role
	  name: deployer
	subjects:
	  - kind: ServiceAccount
	    name: builder
	    namespace: ci
	  - kind: ServiceAccount
	    name: ghost
	    namespace: ci
	---
	apiVersion: batch/v1beta1
	kind: CronJob
	metadata:
	  name: nightly
	  namespace: prod
	spec:
	  schedule: "0 0 * * *"
"#};

fn target_objects() -> Vec<serde_json::Value> {
	vec![
		json!({
			"apiVersion": "v1",
			"kind": "Namespace",
			"metadata": { "name": "prod" }
		}),
		json!({
			"apiVersion": "v1",
			"kind": "ServiceAccount",
			"metadata": { "name": "builder", "namespace": "ci" }
		}),
		json!({
			"apiVersion": "storage.k8s.io/v1",
			"kind": "StorageClass",
			"metadata": {
				"name": "gp3",
				"annotations": { "storageclass.kubernetes.io/is-default-class": "true" }
			},
			"provisioner": "ebs.csi.aws.com"
		}),
		json!({
			"apiVersion": "networking.k8s.io/v1",
			"kind": "IngressClass",
			"metadata": { "name": "nginx" },
			"spec": { "controller": "k8s.io/ingress-nginx" }
		}),
	]
}

fn rows(report: &Report, check: Check) -> Vec<(String, Status, String)> {
	report
		.verdicts
		.iter()
		.filter(|v| v.check == check)
		.map(|v| (v.item.clone(), v.status, v.details.clone()))
		.collect()
}

fn row(item: &str, status: Status, details: &str) -> (String, Status, String) {
	(item.to_string(), status, details.to_string())
}

async fn check_against(server: HttpMockK8sServer, dry_run: bool) -> Report {
	let server = server.start().await;
	let connection = ClusterConnection::connect_with_kubeconfig(server.kubeconfig(), None)
		.await
		.expect("connection should succeed");
	let bundle = Bundle::from_yaml(BUNDLE).unwrap();

	assess(&connection, &bundle, &KcompatConfig::default(), dry_run).await
}

async fn test_check_end_to_end_impl(discovery_mode: DiscoveryMode) {
	let server = HttpMockK8sServer::builder()
		.discovery_mode(discovery_mode)
		.resources(target_objects())
		.dry_run_rejections(HashMap::from([(
			"bad-config".to_string(),
			"ConfigMap \"bad-config\" is invalid: data[key]: denied by policy".to_string(),
		)]))
		.build();

	let report = check_against(server, true).await;

	assert_eq!(
		rows(&report, Check::Api),
		[
			row("apps/v1 Deployment", Status::Ok, "served"),
			row(
				"batch/v1beta1 CronJob",
				Status::Fail,
				"Group present; preferred=batch/v1"
			),
			row("networking.k8s.io/v1 Ingress", Status::Ok, "served"),
			row("rbac.authorization.k8s.io/v1 RoleBinding", Status::Ok, "served"),
			row("v1 ConfigMap", Status::Ok, "served"),
			row("v1 PersistentVolumeClaim", Status::Ok, "served"),
		]
	);
	let cronjob = report
		.verdicts
		.iter()
		.find(|v| v.item == "batch/v1beta1 CronJob")
		.unwrap();
	assert_eq!(
		cronjob.hint,
		Some(Hint::GroupPresent {
			group: "batch".to_string(),
			preferred: "batch/v1".to_string(),
		})
	);

	assert_eq!(
		rows(&report, Check::StorageClass),
		[row(
			"fast-ssd",
			Status::Warn,
			"not found; target default gp3 would apply"
		)]
	);
	assert_eq!(
		rows(&report, Check::IngressClass),
		[row("nginx", Status::Ok, "exists")]
	);
	assert_eq!(
		rows(&report, Check::Namespace),
		[row("prod", Status::Ok, "exists on target")]
	);
	assert_eq!(
		rows(&report, Check::ServiceAccount),
		[
			row("ci/builder", Status::Ok, "exists on target"),
			row("ci/ghost", Status::Fail, "not found on target"),
		]
	);
	assert!(rows(&report, Check::Inventory).is_empty());
	assert_eq!(
		rows(&report, Check::DryRun),
		[
			row(
				"(bundle)",
				Status::Fail,
				"ConfigMap/bad-config: ConfigMap \"bad-config\" is invalid: data[key]: denied by policy"
			),
			row(
				"(bundle)",
				Status::Fail,
				"CronJob/nightly: no matches for kind \"CronJob\" in version \"batch/v1beta1\""
			),
		]
	);
	assert!(report.has_failures());
}

#[tokio::test]
async fn test_check_end_to_end_aggregated() {
	test_check_end_to_end_impl(DiscoveryMode::Aggregated).await;
}

#[tokio::test]
async fn test_check_end_to_end_legacy() {
	test_check_end_to_end_impl(DiscoveryMode::Legacy).await;
}

#[tokio::test]
async fn test_non_preferred_version_is_served_but_unsupported() {
	let discovery = MockDiscovery::default().with_group(
		MockApiGroup::new(
			"batch",
			"v1",
			vec![
				MockApiResource::namespaced("jobs", "Job"),
				MockApiResource::namespaced("cronjobs", "CronJob"),
			],
		)
		.also_serving(
			"v1beta1",
			vec![MockApiResource::namespaced("cronjobs", "CronJob")],
		),
	);
	let server = HttpMockK8sServer::builder()
		.discovery_mode(DiscoveryMode::Legacy)
		.discovery(discovery)
		.resources(target_objects())
		.build();

	let report = check_against(server, true).await;

	let cronjob = report
		.verdicts
		.iter()
		.find(|v| v.item == "batch/v1beta1 CronJob")
		.unwrap();
	assert_eq!(cronjob.status, Status::Fail);
	assert_eq!(cronjob.details, "Group present; preferred=batch/v1");

	// The server still accepts the old version, so dry-run has nothing to say about it.
	assert!(rows(&report, Check::DryRun)
		.iter()
		.all(|(_, _, details)| !details.starts_with("CronJob/")));
}

#[tokio::test]
async fn test_forbidden_query_is_reported_and_marks_failures() {
	let server = HttpMockK8sServer::builder()
		.resources(target_objects())
		.forbidden_paths(vec!["/apis/storage.k8s.io/v1/storageclasses".to_string()])
		.build();

	let report = check_against(server, false).await;

	let inventory = rows(&report, Check::Inventory);
	assert_eq!(inventory.len(), 1);
	assert_eq!(inventory[0].0, "storageclasses");
	assert_eq!(inventory[0].1, Status::Info);
	assert!(inventory[0].2.contains("access denied by mock RBAC"));

	assert_eq!(
		rows(&report, Check::StorageClass),
		[row(
			"fast-ssd",
			Status::Fail,
			"not found and target has no default StorageClass (inventory unavailable)"
		)]
	);
	assert_eq!(
		rows(&report, Check::DryRun),
		[row("(bundle)", Status::Info, "skipped")]
	);
}

#[tokio::test]
async fn test_failed_service_account_lookup_is_reported_per_account() {
	let server = HttpMockK8sServer::builder()
		.resources(target_objects())
		.forbidden_paths(vec!["/api/v1/namespaces/ci/serviceaccounts/builder".to_string()])
		.build();

	let report = check_against(server, false).await;

	assert_eq!(
		rows(&report, Check::ServiceAccount),
		[
			row(
				"ci/builder",
				Status::Fail,
				"not found on target (inventory unavailable)"
			),
			row("ci/ghost", Status::Fail, "not found on target"),
		]
	);
	let inventory = rows(&report, Check::Inventory);
	assert_eq!(inventory.len(), 1);
	assert_eq!(inventory[0].0, "serviceaccounts");
}

/// A kubeconfig whose server refuses connections.
async fn unreachable_kubeconfig() -> kube::config::Kubeconfig {
	let server = HttpMockK8sServer::builder().build().start().await;
	let mut kubeconfig = server.kubeconfig();

	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let closed = format!("http://{}", listener.local_addr().unwrap());
	drop(listener);

	for named in &mut kubeconfig.clusters {
		if let Some(cluster) = named.cluster.as_mut() {
			cluster.server = Some(closed.clone());
		}
	}
	kubeconfig
}

#[tokio::test]
async fn test_unreachable_cluster_still_reports_every_requirement() {
	let kubeconfig = unreachable_kubeconfig().await;
	let connection = ClusterConnection::connect_with_kubeconfig(kubeconfig, None).await;
	let bundle = Bundle::from_yaml(BUNDLE).unwrap();

	let report = assess_connection(connection, &bundle, &KcompatConfig::default(), true)
		.await
		.expect("unreachable cluster should still produce a report");

	assert_eq!(rows(&report, Check::Api).len(), 6);
	assert_eq!(rows(&report, Check::ServiceAccount).len(), 2);
	assert_eq!(rows(&report, Check::Inventory).len(), 5);
	for verdict in &report.verdicts {
		match verdict.status {
			Status::Fail => assert!(
				verdict.details.ends_with("(inventory unavailable)"),
				"{verdict:?}"
			),
			Status::Info => {}
			other => panic!("unexpected {other} for {verdict:?}"),
		}
	}

	let dry_run = rows(&report, Check::DryRun);
	assert_eq!(dry_run.len(), 1);
	assert_eq!(dry_run[0].1, Status::Info);
	assert!(dry_run[0].2.starts_with("not run: "));
	assert!(report.has_failures());
}

#[tokio::test]
async fn test_kubeconfig_error_is_not_degraded() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let connection =
		ClusterConnection::connect_with_kubeconfig(server.kubeconfig(), Some("staging")).await;
	let bundle = Bundle::from_yaml(BUNDLE).unwrap();

	let err = assess_connection(connection, &bundle, &KcompatConfig::default(), true)
		.await
		.unwrap_err();
	let message = format!("{err:#}");
	assert!(message.contains("connecting to cluster"));
	assert!(message.contains("staging"));
}

#[tokio::test]
async fn test_failed_discovery_degrades_api_and_dry_run() {
	let server = HttpMockK8sServer::builder()
		.resources(target_objects())
		.forbidden_paths(vec!["/apis".to_string()])
		.build()
		.start()
		.await;
	let connection = ClusterConnection::connect_with_kubeconfig(server.kubeconfig(), None).await;
	let bundle = Bundle::from_yaml(BUNDLE).unwrap();

	let report = assess_connection(connection, &bundle, &KcompatConfig::default(), true)
		.await
		.unwrap();

	let api = rows(&report, Check::Api);
	assert_eq!(api.len(), 6);
	assert!(api.iter().all(|(_, status, details)| {
		*status == Status::Fail && details == "API group not served (inventory unavailable)"
	}));

	let dry_run = rows(&report, Check::DryRun);
	assert_eq!(dry_run.len(), 1);
	assert_eq!(dry_run[0].1, Status::Info);
	assert!(dry_run[0].2.starts_with("not run: API discovery failed"));

	let inventory: Vec<_> = rows(&report, Check::Inventory)
		.into_iter()
		.map(|(item, _, _)| item)
		.collect();
	assert_eq!(inventory, ["api discovery", "ingressclasses", "storageclasses"]);

	// Core resources are outside /apis and still answer.
	assert_eq!(
		rows(&report, Check::Namespace),
		[row("prod", Status::Ok, "exists on target")]
	);
	assert_eq!(
		rows(&report, Check::ServiceAccount),
		[
			row("ci/builder", Status::Ok, "exists on target"),
			row("ci/ghost", Status::Fail, "not found on target"),
		]
	);
}

#[tokio::test]
async fn test_dry_run_does_not_persist_objects() {
	let server = HttpMockK8sServer::builder()
		.resources(target_objects())
		.build()
		.start()
		.await;
	let before = server.object_count();

	let connection = ClusterConnection::connect_with_kubeconfig(server.kubeconfig(), None)
		.await
		.unwrap();
	let bundle = Bundle::from_yaml(BUNDLE).unwrap();
	assess(&connection, &bundle, &KcompatConfig::default(), true).await;

	assert_eq!(server.object_count(), before);
}

#[test]
fn test_empty_bundle_does_not_contact_cluster() {
	let dir = tempfile::tempdir().unwrap();
	fs::write(dir.path().join("README.md"), "not a manifest").unwrap();
	fs::write(dir.path().join("empty.yaml"), "---\n").unwrap();

	let args = CheckArgs {
		paths: vec![dir.path().to_path_buf()],
		context: Some("does-not-exist".to_string()),
		skip_dry_run: false,
		output: OutputFormat::Csv,
		color: ColorMode::Never,
		exit_zero: false,
	};
	let mut out = Vec::new();
	let outcome = check::run(args, &KcompatConfig::default(), &mut out).unwrap();

	assert_eq!(outcome, Outcome::Clean);
	assert_eq!(
		String::from_utf8(out).unwrap(),
		"Check,Item,Result,Details\nBundle,(bundle),INFO,no documents\n"
	);
}
