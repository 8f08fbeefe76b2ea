use serde::Deserialize;

use crate::connectivity::ServiceClient;
use crate::error::BceResult;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageModel {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub image_type: String,
    pub os_type: String,
    pub os_version: String,
    pub os_arch: String,
    pub os_name: String,
    pub os_build: String,
    pub create_time: String,
    pub status: String,
    pub desc: String,
    pub special_version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FlavorImages {
    flavor_id: String,
    images: Vec<ImageModel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FlavorImageResult {
    result: Vec<FlavorImages>,
}

pub struct BbcClient {
    client: ServiceClient,
}

impl BbcClient {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    async fn flavor_images(&self, path: &str, flavor_id: &str) -> BceResult<Vec<ImageModel>> {
        let result: FlavorImageResult = self.client.get(path, &[]).await?;
        Ok(result
            .result
            .into_iter()
            .filter(|f| f.flavor_id == flavor_id)
            .flat_map(|f| f.images)
            .collect())
    }

    /// Custom images usable with the flavor followed by public ones
    pub async fn list_flavor_images(&self, flavor_id: &str) -> BceResult<Vec<ImageModel>> {
        let mut images = self.flavor_images("/v1/customFlavor/image", flavor_id).await?;
        images.extend(self.flavor_images("/v1/flavor/image", flavor_id).await?);
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::testing::FakeTransport;
    use crate::connectivity::{BaiduClient, Config, Region};
    use reqwest::Method;
    use serde_json::json;

    #[tokio::test]
    async fn custom_images_come_first() {
        let fake = FakeTransport::new();
        fake.on(
            Method::GET,
            "/v1/customFlavor/image",
            200,
            json!({ "result": [
                { "flavorId": "BBC-I3-01", "images": [{ "id": "m-custom", "type": "custom" }] },
                { "flavorId": "BBC-G4-01", "images": [{ "id": "m-other" }] }
            ]}),
        )
        .on(
            Method::GET,
            "/v1/flavor/image",
            200,
            json!({ "result": [
                { "flavorId": "BBC-I3-01", "images": [{ "id": "m-public", "type": "common", "desc": "centos" }] }
            ]}),
        );
        let baidu = BaiduClient::with_transport(Config::new("ak", "sk", Region::BeiJing), fake.clone());

        let images = baidu.bbc().list_flavor_images("BBC-I3-01").await.unwrap();
        let ids: Vec<&str> = images.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["m-custom", "m-public"]);
        assert_eq!(images[1].desc, "centos");
    }
}
