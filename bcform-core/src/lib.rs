//! bcform Core
//!
//! Core library for a declarative Baidu Cloud provisioning tool that treats
//! side effects as values: configuration is parsed into resources, diffed
//! against remote state into a plan of effects, and the plan is interpreted
//! by a provider.

pub mod differ;
pub mod effect;
pub mod interpreter;
pub mod parser;
pub mod plan;
pub mod provider;
pub mod resolver;
pub mod resource;
pub mod schema;
