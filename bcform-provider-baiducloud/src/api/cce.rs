//! Container engine endpoints: the v2 cluster/instance group API and the
//! legacy v1 cluster API still serving `c-` clusters

use serde::{Deserialize, Serialize};

use crate::connectivity::{Empty, ServiceClient};
use crate::error::BceResult;

const V2: &str = "/api/cce/service/v2";

/// Instance group role of worker nodes
pub const ROLE_NODE: &str = "node";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterStatus {
    pub cluster_phase: String,
    pub node_num: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterV2 {
    pub status: ClusterStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct GetClusterV2Result {
    cluster: ClusterV2,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceGroupSpec {
    #[serde(rename = "cceInstanceGroupID")]
    pub cce_instance_group_id: String,
    pub instance_group_name: String,
    pub cluster_role: String,
    pub replicas: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceGroupStatus {
    pub ready_replicas: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceGroup {
    pub spec: InstanceGroupSpec,
    pub status: InstanceGroupStatus,
    pub created_at: String,
}

impl InstanceGroup {
    pub fn is_worker(&self) -> bool {
        self.spec.cluster_role == ROLE_NODE
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Page<T> {
    pub page_no: i64,
    pub page_size: i64,
    pub total_count: i64,
    pub list: Vec<T>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            page_no: 0,
            page_size: 0,
            total_count: 0,
            list: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct PageResult<T> {
    page: Page<T>,
}

impl<T> Default for PageResult<T> {
    fn default() -> Self {
        Self { page: Page::default() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GetInstanceGroupResult {
    instance_group: InstanceGroup,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOption {
    pub delete_resource: bool,
    #[serde(rename = "deleteCDSSnapshot")]
    pub delete_cds_snapshot: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReplicasArgs {
    pub replicas: i64,
    pub delete_instance: bool,
    pub delete_option: DeleteOption,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Machine {
    #[serde(rename = "instanceID")]
    pub instance_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceStatus {
    pub machine: Machine,
    pub instance_phase: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
    pub status: InstanceStatus,
    pub created_at: String,
}

/// `GET /v1/cluster/{id}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterV1 {
    pub cluster_uuid: String,
    pub status: String,
    pub slave_vm_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeV1 {
    pub instance_short_id: String,
    pub status: String,
    pub create_time: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListNodeResult {
    nodes: Vec<NodeV1>,
    is_truncated: bool,
    next_marker: String,
}

pub struct CceClient {
    client: ServiceClient,
}

impl CceClient {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    pub async fn get_cluster_v2(&self, cluster_id: &str) -> BceResult<ClusterV2> {
        let result: GetClusterV2Result = self
            .client
            .get(&format!("{}/cluster/{}", V2, cluster_id), &[])
            .await?;
        Ok(result.cluster)
    }

    /// One page of instance groups; `page_no`/`page_size` of 0 leave paging to the server
    pub async fn list_instance_groups(
        &self,
        cluster_id: &str,
        page_no: i64,
        page_size: i64,
    ) -> BceResult<Page<InstanceGroup>> {
        let mut query = Vec::new();
        if page_no > 0 {
            query.push(("pageNo", page_no.to_string()));
        }
        if page_size > 0 {
            query.push(("pageSize", page_size.to_string()));
        }
        let result: PageResult<InstanceGroup> = self
            .client
            .get(&format!("{}/cluster/{}/instancegroups", V2, cluster_id), &query)
            .await?;
        Ok(result.page)
    }

    pub async fn get_instance_group(&self, cluster_id: &str, group_id: &str) -> BceResult<InstanceGroup> {
        let result: GetInstanceGroupResult = self
            .client
            .get(
                &format!("{}/cluster/{}/instancegroup/{}", V2, cluster_id, group_id),
                &[],
            )
            .await?;
        Ok(result.instance_group)
    }

    pub async fn update_instance_group_replicas(
        &self,
        cluster_id: &str,
        group_id: &str,
        args: &UpdateReplicasArgs,
    ) -> BceResult<()> {
        let _: Empty = self
            .client
            .put(
                &format!("{}/cluster/{}/instancegroup/{}/replicas", V2, cluster_id, group_id),
                &[],
                args,
            )
            .await?;
        Ok(())
    }

    pub async fn list_instance_group_instances(
        &self,
        cluster_id: &str,
        group_id: &str,
    ) -> BceResult<Vec<Instance>> {
        let result: PageResult<Instance> = self
            .client
            .get(
                &format!("{}/cluster/{}/instancegroup/{}/instances", V2, cluster_id, group_id),
                &[("pageNo", "1".to_string()), ("pageSize", "1000".to_string())],
            )
            .await?;
        Ok(result.page.list)
    }

    pub async fn get_cluster_v1(&self, cluster_id: &str) -> BceResult<ClusterV1> {
        self.client
            .get(&format!("/v1/cluster/{}", cluster_id), &[])
            .await
    }

    /// Nodes of a v1 cluster, newest first
    pub async fn list_nodes_v1(&self, cluster_id: &str) -> BceResult<Vec<NodeV1>> {
        let mut all = Vec::new();
        let mut marker = String::new();
        loop {
            let mut query = vec![("clusterUuid", cluster_id.to_string())];
            if !marker.is_empty() {
                query.push(("marker", marker.clone()));
            }
            let page: ListNodeResult = self.client.get("/v1/node", &query).await?;
            all.extend(page.nodes);
            if !page.is_truncated || page.next_marker.is_empty() {
                break;
            }
            marker = page.next_marker;
        }
        // RFC 3339 timestamps in one zone sort lexically
        all.sort_by(|a, b| b.create_time.cmp(&a.create_time));
        Ok(all)
    }

    /// Submit a rendered scaling-up document
    pub async fn scale_up_v1(&self, args: &serde_json::Value) -> BceResult<()> {
        let _: Empty = self
            .client
            .post("/v1/cluster", &[("scalingUp", String::new())], args)
            .await?;
        Ok(())
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

    #[derive(Debug, Deserialize)]
    struct Bare {
        id: String,
    }

    #[test]
    fn page_of_items_without_default() {
        let empty: PageResult<Bare> = serde_json::from_str("{}").unwrap();
        assert!(empty.page.list.is_empty());

        let one: PageResult<Bare> =
            serde_json::from_value(json!({ "page": { "totalCount": 1, "list": [{ "id": "a" }] } }))
                .unwrap();
        assert_eq!(one.page.total_count, 1);
        assert_eq!(one.page.list[0].id, "a");
    }

    #[tokio::test]
    async fn instance_groups_decode() {
        let fake = FakeTransport::new();
        fake.on(
            Method::GET,
            "/api/cce/service/v2/cluster/cce-1/instancegroups",
            200,
            json!({
                "page": {
                    "pageNo": 1,
                    "pageSize": 10,
                    "totalCount": 1,
                    "list": [{
                        "spec": { "cceInstanceGroupID": "cce-ig-1", "instanceGroupName": "workers", "clusterRole": "node", "replicas": 3 },
                        "status": { "readyReplicas": 2 },
                        "createdAt": "2021-01-01T00:00:00Z"
                    }]
                }
            }),
        );

        let page = baidu(&fake)
            .cce()
            .list_instance_groups("cce-1", 1, 10)
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
        let group = &page.list[0];
        assert!(group.is_worker());
        assert_eq!(group.spec.cce_instance_group_id, "cce-ig-1");
        assert_eq!(group.status.ready_replicas, 2);

        let request = &fake.requests()[0];
        assert_eq!(request.query_param("pageSize").as_deref(), Some("10"));
    }

    #[test]
    fn replicas_body() {
        let args = UpdateReplicasArgs {
            replicas: 4,
            delete_instance: true,
            delete_option: DeleteOption {
                delete_resource: true,
                delete_cds_snapshot: true,
            },
        };
        assert_eq!(
            serde_json::to_value(&args).unwrap(),
            json!({
                "replicas": 4,
                "deleteInstance": true,
                "deleteOption": { "deleteResource": true, "deleteCDSSnapshot": true }
            })
        );
    }

    #[tokio::test]
    async fn v1_nodes_newest_first() {
        let fake = FakeTransport::new();
        fake.on(
            Method::GET,
            "/v1/node",
            200,
            json!({
                "nodes": [
                    { "instanceShortId": "i-old", "status": "RUNNING", "createTime": "2021-01-01T00:00:00Z" },
                    { "instanceShortId": "i-new", "status": "CREATING", "createTime": "2021-03-01T00:00:00Z" }
                ]
            }),
        );

        let nodes = baidu(&fake).cce().list_nodes_v1("c-1").await.unwrap();
        assert_eq!(nodes[0].instance_short_id, "i-new");
        assert_eq!(
            fake.requests()[0].query_param("clusterUuid").as_deref(),
            Some("c-1")
        );
    }
}
