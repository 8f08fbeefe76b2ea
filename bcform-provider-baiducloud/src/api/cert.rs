use serde::{Deserialize, Serialize};

use crate::connectivity::client::token_query;
use crate::connectivity::{Empty, ServiceClient};
use crate::error::BceResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertArgs {
    pub cert_name: String,
    pub cert_server_data: String,
    pub cert_private_data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_link_data: Option<String>,
    pub cert_type: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateCertResult {
    pub cert_id: String,
    pub cert_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CertMeta {
    pub cert_id: String,
    pub cert_name: String,
    pub cert_common_name: String,
    pub cert_start_time: String,
    pub cert_stop_time: String,
    pub cert_create_time: String,
    pub cert_update_time: String,
    pub cert_type: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListCertResult {
    certs: Vec<CertMeta>,
}

pub struct CertClient {
    client: ServiceClient,
}

impl CertClient {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    pub async fn create_cert(&self, args: &CertArgs, client_token: &str) -> BceResult<CreateCertResult> {
        self.client
            .post("/v1/certificate", &token_query(client_token), args)
            .await
    }

    pub async fn get_cert(&self, cert_id: &str) -> BceResult<CertMeta> {
        self.client
            .get(&format!("/v1/certificate/{}", cert_id), &[])
            .await
    }

    pub async fn list_certs(&self) -> BceResult<Vec<CertMeta>> {
        let result: ListCertResult = self.client.get("/v1/certificate", &[]).await?;
        Ok(result.certs)
    }

    pub async fn update_cert_name(&self, cert_id: &str, name: &str) -> BceResult<()> {
        let body = serde_json::json!({ "certName": name });
        let _: Empty = self
            .client
            .put(
                &format!("/v1/certificate/{}", cert_id),
                &[("updateCertName", String::new())],
                &body,
            )
            .await?;
        Ok(())
    }

    /// Replace the certificate content; the name is sent along unchanged
    pub async fn update_cert_data(&self, cert_id: &str, args: &CertArgs) -> BceResult<()> {
        let _: Empty = self
            .client
            .put(
                &format!("/v1/certificate/{}", cert_id),
                &[("certData", String::new())],
                args,
            )
            .await?;
        Ok(())
    }

    pub async fn delete_cert(&self, cert_id: &str) -> BceResult<()> {
        let _: Empty = self
            .client
            .delete(&format!("/v1/certificate/{}", cert_id), &[])
            .await?;
        Ok(())
    }
}
