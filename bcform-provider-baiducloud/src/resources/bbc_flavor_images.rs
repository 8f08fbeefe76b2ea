//! baiducloud.bbc_flavor_images - images usable with a bare-metal flavor (data source)

use std::collections::HashMap;

use bcform_core::provider::{ProviderResult, ResourceType};
use bcform_core::resource::{Resource, State, Value};
use bcform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::{fail, require_str};
use crate::api::bbc::ImageModel;
use crate::connectivity::BaiduClient;

const IMAGE_FIELDS: &[&str] = &[
    "id",
    "name",
    "type",
    "os_type",
    "os_version",
    "os_arch",
    "os_name",
    "os_build",
    "create_time",
    "status",
    "description",
    "special_version",
];

pub struct FlavorImagesType;

impl ResourceType for FlavorImagesType {
    fn name(&self) -> &'static str {
        "bbc_flavor_images"
    }

    fn schema(&self) -> ResourceSchema {
        let image = types::blocks(
            IMAGE_FIELDS
                .iter()
                .map(|field| AttributeSchema::new(*field, AttributeType::String))
                .collect(),
        );
        ResourceSchema::new("bbc_flavor_images")
            .with_description("Custom and public images available for a BBC flavor")
            .as_data_source()
            .attribute(AttributeSchema::new("flavor_id", AttributeType::String).required())
            .attribute(AttributeSchema::new("images", image).output())
    }
}

fn image_value(image: &ImageModel) -> Value {
    let fields = [
        &image.id,
        &image.name,
        &image.image_type,
        &image.os_type,
        &image.os_version,
        &image.os_arch,
        &image.os_name,
        &image.os_build,
        &image.create_time,
        &image.status,
        &image.desc,
        &image.special_version,
    ];
    Value::Map(
        IMAGE_FIELDS
            .iter()
            .zip(fields)
            .map(|(key, value)| (key.to_string(), Value::String(value.clone())))
            .collect::<HashMap<_, _>>(),
    )
}

pub async fn read(client: &BaiduClient, resource: &Resource) -> ProviderResult<State> {
    let id = &resource.id;
    let flavor_id = require_str(resource, "flavor_id")?;
    let images = client
        .bbc()
        .list_flavor_images(&flavor_id)
        .await
        .map_err(fail("Failed to list flavor images", id))?;

    let attributes = HashMap::from([
        ("flavor_id".to_string(), Value::String(flavor_id.clone())),
        (
            "images".to_string(),
            Value::List(images.iter().map(image_value).collect()),
        ),
    ]);
    Ok(State::existing(id.clone(), attributes).with_identifier(flavor_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::testing::FakeTransport;
    use crate::resources::test_support::client;
    use reqwest::Method;
    use serde_json::json;

    #[tokio::test]
    async fn flattens_custom_then_public_images() {
        let fake = FakeTransport::new();
        fake.on(
            Method::GET,
            "/v1/customFlavor/image",
            200,
            json!({ "result": [{ "flavorId": "BBC-I3-01", "images": [{ "id": "m-custom", "type": "custom" }] }] }),
        )
        .on(
            Method::GET,
            "/v1/flavor/image",
            200,
            json!({ "result": [{ "flavorId": "BBC-I3-01", "images": [
                { "id": "m-public", "type": "common", "osName": "CentOS", "desc": "stock image" }
            ] }] }),
        );
        let query = Resource::new("bbc_flavor_images", "images")
            .with_attribute("flavor_id", Value::from("BBC-I3-01"))
            .with_read_only(true);

        let state = read(&client(&fake), &query).await.unwrap();

        let images = state.get("images").and_then(Value::as_list).unwrap();
        assert_eq!(images.len(), 2);
        let public = images[1].as_map().unwrap();
        assert_eq!(public.get("os_name"), Some(&Value::from("CentOS")));
        assert_eq!(public.get("description"), Some(&Value::from("stock image")));
        assert_eq!(public.get("type"), Some(&Value::from("common")));
    }
}
