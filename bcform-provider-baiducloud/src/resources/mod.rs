//! Resource types of the Baidu Cloud provider
//!
//! Each module holds one resource type: a unit struct implementing
//! `ResourceType` for its schema, plus free async handlers taking the shared
//! `BaiduClient`. `BaiduCloudProvider` dispatches to them by type name.

pub mod bbc_flavor_images;
pub mod blb;
pub mod blb_backend;
pub mod blb_listener;
pub mod ccev2_instance_group_replica;
pub mod ccev2_instance_groups;
pub mod cert;
pub mod deployset;
pub mod es_cluster;

use std::collections::HashMap;

use bcform_core::provider::{ProviderError, ProviderResult, ResourceType};
use bcform_core::resource::{Resource, ResourceId, Value};

use crate::error::BceError;

/// Every managed resource type and data source
pub fn all_types() -> Vec<Box<dyn ResourceType>> {
    vec![
        Box::new(blb::BlbType),
        Box::new(blb_listener::BlbListenerType),
        Box::new(blb_backend::BlbBackendType),
        Box::new(ccev2_instance_group_replica::InstanceGroupReplicaType),
        Box::new(es_cluster::EsClusterType),
        Box::new(cert::CertType),
        Box::new(deployset::DeploySetType),
        Box::new(ccev2_instance_groups::InstanceGroupsType),
        Box::new(bbc_flavor_images::FlavorImagesType),
    ]
}

/// Attribute map of a state under construction
#[derive(Debug, Default)]
pub(crate) struct Attrs(HashMap<String, Value>);

impl Attrs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Set only non-empty strings
    pub(crate) fn set_str(&mut self, key: &str, value: &str) -> &mut Self {
        if !value.is_empty() {
            self.0.insert(key.to_string(), Value::String(value.to_string()));
        }
        self
    }

    pub(crate) fn set_opt<V: Into<Value>>(&mut self, key: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.0.insert(key.to_string(), value.into());
        }
        self
    }

    pub(crate) fn into_map(self) -> HashMap<String, Value> {
        self.0
    }
}

pub(crate) fn require_str(resource: &Resource, key: &str) -> ProviderResult<String> {
    resource
        .get_str(key)
        .map(str::to_string)
        .ok_or_else(|| {
            ProviderError::new(format!("Attribute '{}' is required", key))
                .for_resource(resource.id.clone())
        })
}

pub(crate) fn require_int(resource: &Resource, key: &str) -> ProviderResult<i64> {
    resource.get_int(key).ok_or_else(|| {
        ProviderError::new(format!("Attribute '{}' is required", key))
            .for_resource(resource.id.clone())
    })
}

pub(crate) fn opt_str(resource: &Resource, key: &str) -> Option<String> {
    resource.get_str(key).map(str::to_string)
}

pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_list)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn list_value(items: &[String]) -> Value {
    Value::List(items.iter().map(|s| Value::String(s.clone())).collect())
}

/// Map attribute as sorted key/value pairs
pub(crate) fn string_pairs(value: Option<&Value>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = value
        .and_then(Value::as_map)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();
    pairs.sort();
    pairs
}

/// Nested block list as maps
pub(crate) fn blocks(value: Option<&Value>) -> Vec<&HashMap<String, Value>> {
    value
        .and_then(Value::as_list)
        .map(|items| items.iter().filter_map(Value::as_map).collect())
        .unwrap_or_default()
}

pub(crate) fn block_str(block: &HashMap<String, Value>, key: &str) -> Option<String> {
    block.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn block_int(block: &HashMap<String, Value>, key: &str) -> Option<i64> {
    block.get(key).and_then(Value::as_int)
}

/// Attributes whose value differs between the stored state and the desired resource
pub(crate) fn changed(from: &HashMap<String, Value>, to: &Resource, keys: &[&str]) -> bool {
    keys.iter().any(|key| from.get(*key) != to.get(key))
}

/// Error mapper for `map_err`: `.map_err(fail("create blb", &id))`
pub(crate) fn fail<'a>(action: &'a str, id: &'a ResourceId) -> impl FnOnce(BceError) -> ProviderError + 'a {
    move |err| err.into_provider_error(action, id)
}

pub(crate) fn invalid(id: &ResourceId, message: impl Into<String>) -> ProviderError {
    ProviderError::new(message).for_resource(id.clone())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::connectivity::testing::FakeTransport;
    use crate::connectivity::{BaiduClient, Config, Region};

    pub(crate) fn client(fake: &Arc<FakeTransport>) -> BaiduClient {
        BaiduClient::with_transport(Config::new("ak", "sk", Region::BeiJing), fake.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_are_unique() {
        let mut names: Vec<&str> = all_types().iter().map(|t| t.name()).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn schema_type_matches_registered_name() {
        for t in all_types() {
            assert_eq!(t.schema().resource_type, t.name());
        }
    }

    #[test]
    fn attribute_helpers() {
        let resource = Resource::new("blb", "web")
            .with_attribute("tags", Value::Map(HashMap::from([
                ("b".to_string(), Value::from("2")),
                ("a".to_string(), Value::from("1")),
            ])))
            .with_attribute("ids", Value::List(vec![Value::from("x"), Value::from("y")]));

        assert_eq!(
            string_pairs(resource.get("tags")),
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
        assert_eq!(string_list(resource.get("ids")), vec!["x", "y"]);
        assert!(require_str(&resource, "name").is_err());
    }

    #[test]
    fn changed_compares_only_listed_keys() {
        let from = HashMap::from([("name".to_string(), Value::from("a"))]);
        let to = Resource::new("blb", "web")
            .with_attribute("name", Value::from("a"))
            .with_attribute("description", Value::from("new"));
        assert!(!changed(&from, &to, &["name"]));
        assert!(changed(&from, &to, &["name", "description"]));
    }
}
