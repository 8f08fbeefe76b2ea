//! baiducloud.cert - SSL certificate used by HTTPS/SSL listeners

use bcform_core::provider::{ProviderResult, ResourceType};
use bcform_core::resource::{Resource, ResourceId, State, Value};
use bcform_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use regex::Regex;

use super::{Attrs, changed, fail, opt_str, require_str};
use crate::api::cert::CertArgs;
use crate::connectivity::BaiduClient;
use crate::connectivity::client::new_client_token;
use crate::retry::retry_bce;

const DATA_FIELDS: &[&str] = &[
    "cert_server_data",
    "cert_private_data",
    "cert_link_data",
    "cert_type",
];

fn validate_cert_name(value: &Value) -> Result<(), String> {
    let Value::String(name) = value else {
        return Err("Expected string".to_string());
    };
    let pattern = Regex::new(r"^[A-Za-z][A-Za-z0-9_/.\-]{0,64}$").map_err(|e| e.to_string())?;
    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(format!(
            "'{}' must be 1-65 characters, start with a letter and contain only letters, digits, '-', '_', '/' or '.'",
            name
        ))
    }
}

pub struct CertType;

impl ResourceType for CertType {
    fn name(&self) -> &'static str {
        "cert"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("cert")
            .with_description("SSL certificate")
            .attribute(
                AttributeSchema::new(
                    "cert_name",
                    AttributeType::Custom {
                        name: "CertName".to_string(),
                        base: Box::new(AttributeType::String),
                        validate: validate_cert_name,
                    },
                )
                .required()
                .with_provider_name("certName"),
            )
            .attribute(
                AttributeSchema::new("cert_server_data", AttributeType::String)
                    .required()
                    .sensitive()
                    .with_description("Server certificate in PEM format"),
            )
            .attribute(
                AttributeSchema::new("cert_private_data", AttributeType::String)
                    .required()
                    .sensitive()
                    .with_description("Private key in PEM format"),
            )
            .attribute(
                AttributeSchema::new("cert_link_data", AttributeType::String)
                    .write_only()
                    .with_description("Intermediate certificate chain"),
            )
            .attribute(
                AttributeSchema::new("cert_type", AttributeType::IntRange { min: 1, max: 2 })
                    .with_default(Value::Int(1)),
            )
            .attribute(AttributeSchema::new("cert_common_name", AttributeType::String).output())
            .attribute(AttributeSchema::new("cert_start_time", AttributeType::String).output())
            .attribute(AttributeSchema::new("cert_stop_time", AttributeType::String).output())
            .attribute(AttributeSchema::new("cert_create_time", AttributeType::String).output())
            .attribute(AttributeSchema::new("cert_update_time", AttributeType::String).output())
    }
}

fn cert_args(resource: &Resource) -> ProviderResult<CertArgs> {
    Ok(CertArgs {
        cert_name: require_str(resource, "cert_name")?,
        cert_server_data: require_str(resource, "cert_server_data")?,
        cert_private_data: require_str(resource, "cert_private_data")?,
        cert_link_data: opt_str(resource, "cert_link_data"),
        cert_type: resource.get_int("cert_type").unwrap_or(1),
    })
}

pub async fn create(client: &BaiduClient, resource: &Resource) -> ProviderResult<State> {
    let id = &resource.id;
    let args = cert_args(resource)?;
    let token = new_client_token();
    let created = retry_bce(std::time::Duration::from_secs(5 * 60), || {
        client.cert().create_cert(&args, &token)
    })
    .await
    .map_err(fail("Failed to create certificate", id))?;
    log::info!("Created certificate {} ({})", created.cert_id, id);

    read(client, id, &created.cert_id).await
}

pub async fn read(client: &BaiduClient, id: &ResourceId, cert_id: &str) -> ProviderResult<State> {
    let meta = match client.cert().get_cert(cert_id).await {
        Ok(meta) => meta,
        Err(e) if e.is_not_found() => return Ok(State::not_found(id.clone())),
        Err(e) => return Err(e.into_provider_error("Failed to read certificate", id)),
    };

    let mut attrs = Attrs::new();
    attrs
        .set_str("cert_name", &meta.cert_name)
        .set_str("cert_common_name", &meta.cert_common_name)
        .set_str("cert_start_time", &meta.cert_start_time)
        .set_str("cert_stop_time", &meta.cert_stop_time)
        .set_str("cert_create_time", &meta.cert_create_time)
        .set_str("cert_update_time", &meta.cert_update_time);
    if meta.cert_type != 0 {
        attrs.set("cert_type", meta.cert_type);
    }
    Ok(State::existing(id.clone(), attrs.into_map()).with_identifier(cert_id))
}

pub async fn update(
    client: &BaiduClient,
    id: &ResourceId,
    cert_id: &str,
    from: &State,
    to: &Resource,
) -> ProviderResult<State> {
    if changed(&from.attributes, to, DATA_FIELDS) {
        client
            .cert()
            .update_cert_data(cert_id, &cert_args(to)?)
            .await
            .map_err(fail("Failed to update certificate data", id))?;
    } else if changed(&from.attributes, to, &["cert_name"]) {
        let name = require_str(to, "cert_name")?;
        client
            .cert()
            .update_cert_name(cert_id, &name)
            .await
            .map_err(fail("Failed to rename certificate", id))?;
    }
    read(client, id, cert_id).await
}

pub async fn delete(client: &BaiduClient, id: &ResourceId, cert_id: &str) -> ProviderResult<()> {
    match client.cert().delete_cert(cert_id).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into_provider_error("Failed to delete certificate", id)),
    }
}
