use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::authz;
use crate::models;
use crate::routes::{admin, health, permissions};

#[derive(OpenApi)]
#[openapi(
	paths(
		health::health,
		permissions::check_permission,
		permissions::current_phase,
		admin::get_config,
		admin::update_config,
		admin::invalidate_phase_cache,
		admin::get_permissions,
		admin::update_permissions,
		admin::reset_permissions,
		admin::grant_temporary_access,
		admin::revoke_temporary_access,
		admin::list_temporary_access,
		admin::list_audit_logs
	),
	components(
		schemas(
			health::HealthResponse,
			permissions::PermissionCheckRequest,
			permissions::PhaseResponse,
			admin::GrantRequest,
			models::system_config::SystemConfig,
			models::system_config::SystemConfigUpdateRequest,
			authz::PermissionResult,
			authz::BypassReason,
			authz::EventPhase,
			authz::ResourceContext,
			authz::Role,
			authz::GrantStatus,
			authz::TemporaryAccessGrant,
			authz::AuditLogType,
			authz::AuditLogPage,
			authz::audit::DenialRecord,
			authz::audit::BypassRecord
		)
	),
	tags(
		(name = "Health", description = "Liveness"),
		(name = "Permissions", description = "Permission checks and event phase"),
		(name = "Admin", description = "Dates, permission matrix, temporary access and audit trail")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	ensure_security_components(&mut doc);
	ensure_global_security(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = {
		let doc_json = Arc::clone(&doc_json);
		get(move || {
			let doc_json = Arc::clone(&doc_json);
			async move { Json((*doc_json).clone()) }
		})
	};

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}

fn root_object(doc: &mut Value) -> &mut Map<String, Value> {
	if !doc.is_object() {
		*doc = Value::Object(Map::new());
	}
	match doc {
		Value::Object(map) => map,
		_ => unreachable!("replaced with an object above"),
	}
}

fn ensure_security_components(doc: &mut Value) {
	let components = root_object(doc)
		.entry("components")
		.or_insert_with(|| json!({}));
	if !components.is_object() {
		*components = json!({});
	}

	let schemes = &mut components["securitySchemes"];
	if !schemes.is_object() {
		*schemes = json!({});
	}
	schemes["bearerAuth"] = json!({
		"type": "http",
		"scheme": "bearer",
		"bearerFormat": "JWT"
	});
}

fn ensure_global_security(doc: &mut Value) {
	root_object(doc)
		.entry("security")
		.or_insert_with(|| json!([{ "bearerAuth": [] }]));
}

fn ensure_servers(doc: &mut Value, port: u16) {
	let server_url = format!("http://localhost:{}", port);

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}
