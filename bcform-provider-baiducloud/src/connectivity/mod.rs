//! Connectivity - credentials, region, signing and lazily built service clients

pub mod auth;
pub mod client;
pub mod config;
pub mod region;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{BceSigner, Credentials};
pub use client::{
    BaiduClient, Empty, HttpRequest, HttpResponse, ReqwestTransport, Service, ServiceClient,
    Transport,
};
pub use config::{Config, ConfigError};
pub use region::Region;
