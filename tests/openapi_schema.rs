use serde_json::Value;

#[test]
fn openapi_has_permission_result_fields() -> anyhow::Result<()> {
    // Build the OpenAPI document the same way the server does
    let doc = regatta::docs::build_openapi(8000)?;
    let v = serde_json::to_value(&doc)?;

    let props = v
        .get("components")
        .and_then(Value::as_object)
        .and_then(|c| c.get("schemas"))
        .and_then(Value::as_object)
        .and_then(|s| s.get("PermissionResult"))
        .and_then(Value::as_object)
        .and_then(|t| t.get("properties"))
        .and_then(Value::as_object)
        .expect("components.schemas.PermissionResult.properties must exist");

    let keys = ["is_permitted", "denial_reason", "denial_reason_key", "bypass_reason"];
    for k in &keys {
        assert!(props.contains_key(*k), "OpenAPI PermissionResult schema missing '{}'", k);
    }

    Ok(())
}

#[test]
fn openapi_documents_impersonation_header() -> anyhow::Result<()> {
    let doc = regatta::docs::build_openapi(8000)?;
    let v = serde_json::to_value(&doc)?;

    let params = v["paths"]["/permissions/check"]["post"]["parameters"]
        .as_array()
        .expect("check endpoint must declare parameters");
    assert!(params
        .iter()
        .any(|p| p["name"] == "X-Impersonate-Team-Manager" && p["in"] == "header"));

    Ok(())
}
