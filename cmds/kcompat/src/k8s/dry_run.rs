//! Server-side dry-run validation of a whole bundle.
//!
//! Every object is sent as a server-side apply with `dryRun=All`, so the API
//! server runs schema validation and admission webhooks without persisting
//! anything. Objects are submitted one at a time in bundle order.

use kube::{
	api::{Api, DynamicObject, Patch, PatchParams},
	Client,
};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{discovery::ApiSurface, ResourceScope};
use crate::{manifest::Bundle, requirements::ApiKindRef};

/// Field manager recorded on dry-run applies.
pub const FIELD_MANAGER: &str = "kcompat";

/// Runs dry-run applies against one cluster.
pub struct DryRunValidator<'a> {
	client: Client,
	surface: &'a ApiSurface,
	default_namespace: String,
}

impl<'a> DryRunValidator<'a> {
	pub fn new(client: Client, surface: &'a ApiSurface, default_namespace: String) -> Self {
		Self {
			client,
			surface,
			default_namespace,
		}
	}

	/// Validate every typed document of the bundle.
	///
	/// Returns one line per rejected object, formatted as
	/// `<Kind>/<name>: <message>`, in bundle order.
	#[instrument(skip_all, fields(documents = bundle.len()))]
	pub async fn validate(&self, bundle: &Bundle) -> Vec<String> {
		let mut errors = Vec::new();

		for doc in bundle.documents() {
			let api_version = doc.get("apiVersion").and_then(Value::as_str).unwrap_or("");
			let kind = doc.get("kind").and_then(Value::as_str).unwrap_or("");
			if api_version.is_empty() || kind.is_empty() {
				continue;
			}
			let name = doc
				.pointer("/metadata/name")
				.and_then(Value::as_str)
				.unwrap_or("");

			if let Err(message) = self.validate_one(doc, api_version, kind, name).await {
				debug!(%kind, %name, %message, "dry-run rejected object");
				errors.push(format!("{kind}/{name}: {message}"));
			}
		}

		errors
	}

	async fn validate_one(
		&self,
		doc: &Value,
		api_version: &str,
		kind: &str,
		name: &str,
	) -> Result<(), String> {
		let served = self
			.surface
			.lookup(&ApiKindRef::new(api_version, kind))
			.ok_or_else(|| format!("no matches for kind \"{kind}\" in version \"{api_version}\""))?;
		if name.is_empty() {
			return Err("metadata.name is required".to_string());
		}

		let api: Api<DynamicObject> = match served.scope {
			ResourceScope::Namespaced => {
				let namespace = doc
					.pointer("/metadata/namespace")
					.and_then(Value::as_str)
					.unwrap_or(&self.default_namespace);
				Api::namespaced_with(self.client.clone(), namespace, &served.api_resource)
			}
			ResourceScope::ClusterWide => Api::all_with(self.client.clone(), &served.api_resource),
		};

		let params = PatchParams {
			dry_run: true,
			field_manager: Some(FIELD_MANAGER.to_string()),
			force: true,
			..Default::default()
		};

		match api.patch(name, &params, &Patch::Apply(doc)).await {
			Ok(_) => Ok(()),
			Err(kube::Error::Api(err)) => Err(single_line(&err.message)),
			Err(e) => Err(single_line(&e.to_string())),
		}
	}
}

fn single_line(message: &str) -> String {
	message.split_whitespace().collect::<Vec<_>>().join(" ")
}
