//! Load balancer (BLB) endpoints: instances, listeners, backend servers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Tag, int_or_string};
use crate::connectivity::client::token_query;
use crate::connectivity::{Empty, ServiceClient};
use crate::error::{BceError, BceResult};

const PAGE_SIZE: i64 = 1000;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBlbArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "desc", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub vpc_id: String,
    pub subnet_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eip: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateBlbResult {
    pub blb_id: String,
    pub name: String,
    pub address: String,
}

/// Entry of `GET /v1/blb`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlbModel {
    pub blb_id: String,
    pub name: String,
    pub desc: String,
    pub address: String,
    pub status: String,
    pub vpc_id: String,
    pub subnet_id: String,
    pub public_ip: String,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListBlbResult {
    blb_list: Vec<BlbModel>,
    is_truncated: bool,
    next_marker: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ListenerSummary {
    #[serde(deserialize_with = "int_or_string")]
    pub port: i64,
    #[serde(rename = "type")]
    pub listener_type: String,
}

/// `GET /v1/blb/{id}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlbDetail {
    pub blb_id: String,
    pub name: String,
    pub status: String,
    pub desc: String,
    pub address: String,
    pub public_ip: String,
    pub cidr: String,
    pub vpc_name: String,
    pub create_time: String,
    pub listener: Vec<ListenerSummary>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBlbArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "desc", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerProtocol {
    Tcp,
    Udp,
    Http,
    Https,
    Ssl,
}

impl ListenerProtocol {
    pub const ALL: [ListenerProtocol; 5] = [
        ListenerProtocol::Tcp,
        ListenerProtocol::Udp,
        ListenerProtocol::Http,
        ListenerProtocol::Https,
        ListenerProtocol::Ssl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerProtocol::Tcp => "TCP",
            ListenerProtocol::Udp => "UDP",
            ListenerProtocol::Http => "HTTP",
            ListenerProtocol::Https => "HTTPS",
            ListenerProtocol::Ssl => "SSL",
        }
    }

    fn path(&self, blb_id: &str) -> String {
        format!("/v1/blb/{}/{}listener", blb_id, self.as_str())
    }
}

impl fmt::Display for ListenerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListenerProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ListenerProtocol::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "listener only supports protocol [TCP, UDP, HTTP, HTTPS, SSL], got: {}",
                    s
                )
            })
    }
}

/// Listener body shared by every protocol; each protocol uses a subset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListenerModel {
    pub listener_port: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_port: Option<i64>,
    pub scheduler: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_session_timeout: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_timeout_in_second: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_interval: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unhealthy_threshold: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthy_threshold: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_port: Option<i64>,
    #[serde(rename = "healthCheckURI", skip_serializing_if = "Option::is_none")]
    pub health_check_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_normal_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_session: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_session_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_session_duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_session_cookie_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_forwarded_for: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_timeout: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_port: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cert_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub encryption_protocols: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dual_auth: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub client_cert_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListListenerResult {
    listener_list: Vec<ListenerModel>,
    is_truncated: bool,
    next_marker: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendServer {
    pub instance_id: String,
    pub weight: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListBackendResult {
    backend_server_list: Vec<BackendServer>,
    is_truncated: bool,
    next_marker: String,
}

pub struct BlbClient {
    client: ServiceClient,
}

impl BlbClient {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    pub async fn create_blb(
        &self,
        args: &CreateBlbArgs,
        client_token: &str,
    ) -> BceResult<CreateBlbResult> {
        self.client
            .post("/v1/blb", &token_query(client_token), args)
            .await
    }

    /// Summary entry of one load balancer, or not-found
    pub async fn describe_blb(&self, blb_id: &str) -> BceResult<BlbModel> {
        let result: ListBlbResult = self
            .client
            .get("/v1/blb", &[("blbId", blb_id.to_string())])
            .await?;
        result
            .blb_list
            .into_iter()
            .find(|b| b.blb_id == blb_id)
            .ok_or_else(|| not_found(format!("blb {} not found", blb_id)))
    }

    pub async fn describe_blb_detail(&self, blb_id: &str) -> BceResult<BlbDetail> {
        self.client.get(&format!("/v1/blb/{}", blb_id), &[]).await
    }

    pub async fn list_blbs(&self) -> BceResult<Vec<BlbModel>> {
        let mut all = Vec::new();
        let mut marker = String::new();
        loop {
            let mut query = vec![("maxKeys", PAGE_SIZE.to_string())];
            if !marker.is_empty() {
                query.push(("marker", marker.clone()));
            }
            let page: ListBlbResult = self.client.get("/v1/blb", &query).await?;
            all.extend(page.blb_list);
            if !page.is_truncated || page.next_marker.is_empty() {
                return Ok(all);
            }
            marker = page.next_marker;
        }
    }

    pub async fn update_blb(&self, blb_id: &str, args: &UpdateBlbArgs) -> BceResult<()> {
        let _: Empty = self.client.put(&format!("/v1/blb/{}", blb_id), &[], args).await?;
        Ok(())
    }

    pub async fn delete_blb(&self, blb_id: &str) -> BceResult<()> {
        let _: Empty = self.client.delete(&format!("/v1/blb/{}", blb_id), &[]).await?;
        Ok(())
    }

    pub async fn create_listener(
        &self,
        blb_id: &str,
        protocol: ListenerProtocol,
        args: &ListenerModel,
        client_token: &str,
    ) -> BceResult<()> {
        let _: Empty = self
            .client
            .post(&protocol.path(blb_id), &token_query(client_token), args)
            .await?;
        Ok(())
    }

    pub async fn update_listener(
        &self,
        blb_id: &str,
        protocol: ListenerProtocol,
        args: &ListenerModel,
    ) -> BceResult<()> {
        let query = [("listenerPort", args.listener_port.to_string())];
        let _: Empty = self.client.put(&protocol.path(blb_id), &query, args).await?;
        Ok(())
    }

    /// Listeners of one protocol, optionally restricted to a port
    pub async fn list_listeners(
        &self,
        blb_id: &str,
        protocol: ListenerProtocol,
        port: Option<i64>,
    ) -> BceResult<Vec<ListenerModel>> {
        let mut all = Vec::new();
        let mut marker = String::new();
        loop {
            let mut query = vec![("maxKeys", PAGE_SIZE.to_string())];
            if let Some(port) = port {
                query.push(("listenerPort", port.to_string()));
            }
            if !marker.is_empty() {
                query.push(("marker", marker.clone()));
            }
            let page: ListListenerResult = self.client.get(&protocol.path(blb_id), &query).await?;
            all.extend(page.listener_list);
            if !page.is_truncated || page.next_marker.is_empty() {
                return Ok(all);
            }
            marker = page.next_marker;
        }
    }

    /// Listeners of every protocol when `protocol` is `None`
    pub async fn list_all_listeners(
        &self,
        blb_id: &str,
        protocol: Option<ListenerProtocol>,
    ) -> BceResult<Vec<(ListenerProtocol, ListenerModel)>> {
        let protocols: Vec<ListenerProtocol> = match protocol {
            Some(p) => vec![p],
            None => ListenerProtocol::ALL.to_vec(),
        };
        let mut all = Vec::new();
        for protocol in protocols {
            for listener in self.list_listeners(blb_id, protocol, None).await? {
                all.push((protocol, listener));
            }
        }
        Ok(all)
    }

    /// The listener on `port`, or not-found
    pub async fn describe_listener(
        &self,
        blb_id: &str,
        protocol: ListenerProtocol,
        port: i64,
    ) -> BceResult<ListenerModel> {
        self.list_listeners(blb_id, protocol, Some(port))
            .await?
            .into_iter()
            .find(|l| l.listener_port == port)
            .ok_or_else(|| {
                not_found(format!(
                    "{} listener {} of blb {} not found",
                    protocol, port, blb_id
                ))
            })
    }

    pub async fn delete_listeners(&self, blb_id: &str, ports: &[i64]) -> BceResult<()> {
        let body = serde_json::json!({ "portList": ports });
        let _: Empty = self
            .client
            .put(
                &format!("/v1/blb/{}/listener", blb_id),
                &[("batchdelete", String::new())],
                &body,
            )
            .await?;
        Ok(())
    }

    pub async fn add_backend_servers(
        &self,
        blb_id: &str,
        servers: &[BackendServer],
        client_token: &str,
    ) -> BceResult<()> {
        let body = serde_json::json!({ "backendServerList": servers });
        let _: Empty = self
            .client
            .post(
                &format!("/v1/blb/{}/backendserver", blb_id),
                &token_query(client_token),
                &body,
            )
            .await?;
        Ok(())
    }

    pub async fn list_backend_servers(&self, blb_id: &str) -> BceResult<Vec<BackendServer>> {
        let mut all = Vec::new();
        let mut marker = String::new();
        loop {
            let mut query = vec![("maxKeys", PAGE_SIZE.to_string())];
            if !marker.is_empty() {
                query.push(("marker", marker.clone()));
            }
            let page: ListBackendResult = self
                .client
                .get(&format!("/v1/blb/{}/backendserver", blb_id), &query)
                .await?;
            all.extend(page.backend_server_list);
            if !page.is_truncated || page.next_marker.is_empty() {
                return Ok(all);
            }
            marker = page.next_marker;
        }
    }

    pub async fn update_backend_servers(&self, blb_id: &str, servers: &[BackendServer]) -> BceResult<()> {
        let body = serde_json::json!({ "backendServerList": servers });
        let _: Empty = self
            .client
            .put(
                &format!("/v1/blb/{}/backendserver", blb_id),
                &[("update", String::new())],
                &body,
            )
            .await?;
        Ok(())
    }

    pub async fn remove_backend_servers(&self, blb_id: &str, instance_ids: &[String]) -> BceResult<()> {
        let body = serde_json::json!({ "backendServerList": instance_ids });
        let _: Empty = self
            .client
            .put(
                &format!("/v1/blb/{}/backendserver", blb_id),
                &[("remove", String::new())],
                &body,
            )
            .await?;
        Ok(())
    }
}

fn not_found(message: String) -> BceError {
    BceError::service(404, "ResourceNotFound", message, "")
}
