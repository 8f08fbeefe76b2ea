//! Compute (BCC) endpoints: deploy sets and billing changes on instances

use serde::{Deserialize, Serialize};

use crate::connectivity::client::token_query;
use crate::connectivity::{Empty, ServiceClient};
use crate::error::{BceError, BceResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploySetArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    pub strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CreateDeploySetResult {
    deploy_set_ids: Vec<String>,
    deploy_set_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploySetInstance {
    pub instance_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploySet {
    #[serde(alias = "shortId")]
    pub deploy_set_id: String,
    pub name: String,
    pub desc: String,
    pub strategy: String,
    pub concurrency: i64,
    pub instance_list: Vec<DeploySetInstance>,
    pub bcc_instance_cnt: i64,
    pub bbc_instance_cnt: i64,
    pub instance_total: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListDeploySetResult {
    #[serde(alias = "deploySets")]
    deploy_set_list: Vec<DeploySet>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyDeploySetArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

pub struct BccClient {
    client: ServiceClient,
}

impl BccClient {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    /// Returns the id of the new deploy set
    pub async fn create_deploy_set(
        &self,
        args: &CreateDeploySetArgs,
        client_token: &str,
    ) -> BceResult<String> {
        let result: CreateDeploySetResult = self
            .client
            .post("/v2/instance/deployset/create", &token_query(client_token), args)
            .await?;
        result
            .deploy_set_ids
            .into_iter()
            .next()
            .or_else(|| (!result.deploy_set_id.is_empty()).then_some(result.deploy_set_id))
            .ok_or_else(|| BceError::Decode("create deploy set returned no id".to_string()))
    }

    pub async fn get_deploy_set(&self, id: &str) -> BceResult<DeploySet> {
        self.client
            .get(&format!("/v2/instance/deployset/{}", id), &[])
            .await
    }

    pub async fn list_deploy_sets(&self) -> BceResult<Vec<DeploySet>> {
        let result: ListDeploySetResult = self.client.get("/v2/instance/deployset/list", &[]).await?;
        Ok(result.deploy_set_list)
    }

    pub async fn modify_deploy_set(&self, id: &str, args: &ModifyDeploySetArgs) -> BceResult<()> {
        let _: Empty = self
            .client
            .put(
                &format!("/v2/instance/deployset/{}", id),
                &[("modify", String::new())],
                args,
            )
            .await?;
        Ok(())
    }

    pub async fn delete_deploy_set(&self, id: &str) -> BceResult<()> {
        let _: Empty = self
            .client
            .delete(&format!("/v2/instance/deployset/{}", id), &[])
            .await?;
        Ok(())
    }

    /// Switch a postpaid instance to a one-month prepaid term
    pub async fn change_to_prepaid(&self, instance_id: &str) -> BceResult<()> {
        let body = serde_json::json!({ "duration": 1, "relationCds": true });
        let _: Empty = self
            .client
            .post(
                &format!("/v2/instance/{}", instance_id),
                &[("toPrepay", String::new())],
                &body,
            )
            .await?;
        Ok(())
    }

    /// Monthly auto-renew rule for a prepaid instance
    pub async fn enable_auto_renew(&self, instance_id: &str) -> BceResult<()> {
        let body = serde_json::json!({
            "instanceId": instance_id,
            "renewTimeUnit": "month",
            "renewTime": 1
        });
        let _: Empty = self
            .client
            .post("/v2/instance/batchCreateAutoRenewRules", &[], &body)
            .await?;
        Ok(())
    }

    pub async fn enable_prepaid_and_auto_renew(&self, instance_id: &str) -> BceResult<()> {
        self.change_to_prepaid(instance_id).await?;
        self.enable_auto_renew(instance_id).await
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
        BaiduClient::with_transport(Config::new("ak", "sk", Region::GuangZhou), fake.clone())
    }

    #[tokio::test]
    async fn create_accepts_either_id_shape() {
        let fake = FakeTransport::new();
        fake.on(
            Method::POST,
            "/v2/instance/deployset/create",
            200,
            json!({ "deploySetIds": ["dset-1"] }),
        )
        .on(
            Method::POST,
            "/v2/instance/deployset/create",
            200,
            json!({ "deploySetId": "dset-2" }),
        );
        let baidu = baidu(&fake);
        let args = CreateDeploySetArgs {
            strategy: "HOST_HA".to_string(),
            ..Default::default()
        };

        assert_eq!(baidu.bcc().create_deploy_set(&args, "tok-1").await.unwrap(), "dset-1");
        assert_eq!(baidu.bcc().create_deploy_set(&args, "tok-2").await.unwrap(), "dset-2");
        assert!(fake.requests()[0].url.starts_with("https://bcc.gz.baidubce.com/"));
    }

    #[tokio::test]
    async fn prepaid_then_auto_renew() {
        let fake = FakeTransport::new();
        fake.on(Method::POST, "/v2/instance/i-1", 200, serde_json::Value::Null)
            .on(
                Method::POST,
                "/v2/instance/batchCreateAutoRenewRules",
                200,
                serde_json::Value::Null,
            );

        baidu(&fake).bcc().enable_prepaid_and_auto_renew("i-1").await.unwrap();

        let requests = fake.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].query_param("toPrepay").as_deref(), Some(""));
        assert_eq!(requests[1].body_json().unwrap()["instanceId"], "i-1");
    }

    #[tokio::test]
    async fn prepaid_failure_skips_auto_renew() {
        let fake = FakeTransport::new();
        fake.on(
            Method::POST,
            "/v2/instance/i-1",
            400,
            json!({ "code": "Instance.StatusError", "message": "busy", "requestId": "r" }),
        );

        assert!(baidu(&fake).bcc().enable_prepaid_and_auto_renew("i-1").await.is_err());
        assert_eq!(fake.requests().len(), 1);
    }
}
