//! bcform Baidu Cloud provider
//!
//! Resource handlers for load balancers, container cluster scaling,
//! Elasticsearch clusters, certificates and deploy sets, on top of a signed
//! BCE HTTP client with retry and state polling helpers.

pub mod api;
pub mod connectivity;
pub mod error;
pub mod provider;
pub mod resources;
pub mod retry;
pub mod sweeper;

pub use connectivity::{BaiduClient, Config, Region};
pub use error::{BceError, BceResult};
pub use provider::{BaiduCloudProvider, PROVIDER_NAME};
