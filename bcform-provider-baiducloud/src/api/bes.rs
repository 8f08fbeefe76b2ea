//! Elasticsearch (BES) cluster endpoints
//!
//! BES answers most calls with HTTP 200 and reports failure in the body as
//! `success: false` plus an `error` document; [`envelope`] turns those into
//! regular service errors.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::connectivity::ServiceClient;
use crate::error::{BceError, BceResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Billing {
    pub payment_type: String,
    pub time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskSlotInfo {
    #[serde(rename = "type")]
    pub disk_type: String,
    pub size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterModule {
    #[serde(rename = "type")]
    pub module_type: String,
    pub instance_num: i64,
    pub slot_type: String,
    pub disk_slot_info: DiskSlotInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClusterArgs {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub modules: Vec<ClusterModule>,
    pub version: String,
    pub available_zone: String,
    pub security_group_id: String,
    pub subnet_uuid: String,
    pub vpc_id: String,
    pub billing: Billing,
    pub is_old_package: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateClusterResult {
    pub cluster_id: String,
    pub order_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterDetail {
    pub cluster_id: String,
    pub cluster_name: String,
    pub actual_status: String,
    pub admin_username: String,
    #[serde(rename = "kibanaURL")]
    pub kibana_url: String,
    pub kibana_eip: String,
    #[serde(rename = "esURL")]
    pub es_url: String,
    pub es_eip: String,
    pub vpc_id: String,
    pub subnet_id: String,
    pub available_zone: String,
    pub security_group_id: String,
    pub es_version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSummary {
    pub cluster_id: String,
    pub cluster_name: String,
    pub actual_status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ClusterPage {
    total_count: i64,
    clusters: Vec<ClusterSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ErrorDocument {
    code: String,
    message: String,
    request_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Envelope<T> {
    success: bool,
    status: u16,
    result: Option<T>,
    error: Option<ErrorDocument>,
}

impl<T> Default for Envelope<T> {
    fn default() -> Self {
        Self {
            success: true,
            status: 200,
            result: None,
            error: None,
        }
    }
}

/// Unwrap a BES response body
fn envelope<T: Default>(envelope: Envelope<T>) -> BceResult<T> {
    if !envelope.success {
        let error = envelope.error.unwrap_or_default();
        let status = if envelope.status == 0 || envelope.status == 200 {
            400
        } else {
            envelope.status
        };
        return Err(BceError::service(status, error.code, error.message, error.request_id));
    }
    Ok(envelope.result.unwrap_or_default())
}

pub struct BesClient {
    client: ServiceClient,
}

impl BesClient {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    async fn call<T>(&self, path: &str, body: &serde_json::Value) -> BceResult<T>
    where
        T: DeserializeOwned + Default,
    {
        let response: Envelope<T> = self.client.post(path, &[], body).await?;
        envelope(response)
    }

    pub async fn create_cluster(&self, args: &CreateClusterArgs) -> BceResult<CreateClusterResult> {
        let body = serde_json::to_value(args)?;
        self.call("/api/bes/cluster/create", &body).await
    }

    pub async fn get_cluster(&self, cluster_id: &str) -> BceResult<ClusterDetail> {
        self.call(
            "/api/bes/cluster/detail",
            &serde_json::json!({ "clusterId": cluster_id }),
        )
        .await
    }

    pub async fn delete_cluster(&self, cluster_id: &str) -> BceResult<()> {
        let _: serde_json::Value = self
            .call(
                "/api/bes/cluster/delete",
                &serde_json::json!({ "clusterId": cluster_id }),
            )
            .await?;
        Ok(())
    }

    pub async fn list_clusters(&self) -> BceResult<Vec<ClusterSummary>> {
        const PAGE_SIZE: i64 = 100;
        let mut all = Vec::new();
        let mut page_no = 1;
        loop {
            let page: ClusterPage = self
                .call(
                    "/api/bes/cluster/list",
                    &serde_json::json!({ "pageNo": page_no, "pageSize": PAGE_SIZE }),
                )
                .await?;
            let received = page.clusters.len() as i64;
            all.extend(page.clusters);
            if received < PAGE_SIZE || all.len() as i64 >= page.total_count {
                return Ok(all);
            }
            page_no += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::testing::FakeTransport;
    use crate::connectivity::{BaiduClient, Config, Region};
    use reqwest::Method;
    use serde_json::json;

    fn baidu(fake: &std::sync::Arc<FakeTransport>) -> BaiduClient {
        BaiduClient::with_transport(Config::new("ak", "sk", Region::BeiJing), fake.clone())
    }

    #[tokio::test]
    async fn unsuccessful_body_is_an_error() {
        let fake = FakeTransport::new();
        fake.on(
            Method::POST,
            "/api/bes/cluster/create",
            200,
            json!({
                "success": false,
                "status": 400,
                "error": { "code": "InvalidParameter", "message": "bad slot", "requestId": "r-1" }
            }),
        );

        let err = baidu(&fake)
            .bes()
            .create_cluster(&CreateClusterArgs::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("InvalidParameter"));
        assert!(err.to_string().contains("bad slot"));
        assert!(err.to_string().contains("r-1"));
    }

    #[tokio::test]
    async fn detail_reads_result() {
        let fake = FakeTransport::new();
        fake.on(
            Method::POST,
            "/api/bes/cluster/detail",
            200,
            json!({
                "success": true,
                "status": 200,
                "result": { "clusterId": "es-1", "actualStatus": "Running", "esURL": "http://es", "adminUsername": "superuser" }
            }),
        );

        let detail = baidu(&fake).bes().get_cluster("es-1").await.unwrap();
        assert_eq!(detail.actual_status, "Running");
        assert_eq!(detail.es_url, "http://es");
        assert_eq!(detail.admin_username, "superuser");
        assert_eq!(
            fake.requests()[0].body_json(),
            Some(json!({ "clusterId": "es-1" }))
        );
    }

    #[test]
    fn create_body_shape() {
        let args = CreateClusterArgs {
            name: "es".to_string(),
            modules: vec![ClusterModule {
                module_type: "es_node".to_string(),
                instance_num: 3,
                slot_type: "bes.g3.c2m8".to_string(),
                disk_slot_info: DiskSlotInfo {
                    disk_type: "ssd".to_string(),
                    size: 40,
                },
            }],
            billing: Billing {
                payment_type: "postpay".to_string(),
                time: 12,
            },
            ..Default::default()
        };
        let body = serde_json::to_value(&args).unwrap();
        assert_eq!(body["modules"][0]["diskSlotInfo"], json!({ "type": "ssd", "size": 40 }));
        assert_eq!(body["billing"]["paymentType"], "postpay");
        assert_eq!(body["isOldPackage"], false);
        assert!(body.get("password").is_none());
    }
}
