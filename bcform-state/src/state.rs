//! State file structures for persisting infrastructure state

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use bcform_core::resource::{ResourceId, State, Value};

/// The main state file structure that persists to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Monotonically increasing number for each state modification
    pub serial: u64,
    /// Unique identifier for this state lineage (prevents accidental overwrites)
    pub lineage: String,
    /// Version of bcform that last modified this state
    pub bcform_version: String,
    /// All managed resources and their current state
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    /// Current state file format version
    pub const CURRENT_VERSION: u32 = 1;

    /// Create a new empty state file
    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    /// Create a new state file with a specific lineage
    pub fn with_lineage(lineage: String) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage,
            bcform_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    /// Increment serial and update bcform version for a new state write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.bcform_version = env!("CARGO_PKG_VERSION").to_string();
    }

    /// Find a resource by type and name
    pub fn find_resource(&self, resource_type: &str, name: &str) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| r.resource_type == resource_type && r.name == name)
    }

    /// Find a resource mutably by type and name
    pub fn find_resource_mut(
        &mut self,
        resource_type: &str,
        name: &str,
    ) -> Option<&mut ResourceState> {
        self.resources
            .iter_mut()
            .find(|r| r.resource_type == resource_type && r.name == name)
    }

    /// Add or update a resource in the state
    ///
    /// The `protected` flag of an existing entry survives updates.
    pub fn upsert_resource(&mut self, mut resource: ResourceState) {
        if let Some(existing) = self.find_resource_mut(&resource.resource_type, &resource.name) {
            resource.protected |= existing.protected;
            *existing = resource;
        } else {
            self.resources.push(resource);
        }
    }

    /// Remove a resource from the state
    pub fn remove_resource(&mut self, resource_type: &str, name: &str) -> Option<ResourceState> {
        let pos = self
            .resources
            .iter()
            .position(|r| r.resource_type == resource_type && r.name == name)?;
        Some(self.resources.remove(pos))
    }

    /// Current states keyed by resource id, as the differ expects them
    pub fn current_states(&self) -> HashMap<ResourceId, State> {
        self.resources
            .iter()
            .map(|r| (r.resource_id(), r.to_state()))
            .collect()
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a single managed resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type (e.g., "blb", "blb_listener")
    pub resource_type: String,
    /// Resource name (binding name in the configuration)
    pub name: String,
    /// Provider name (e.g., "baiducloud")
    pub provider: String,
    /// Vendor-assigned identifier (e.g., lb-xxxx)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// All attributes of the resource as JSON values
    pub attributes: HashMap<String, serde_json::Value>,
    /// Whether this resource is protected from deletion
    #[serde(default)]
    pub protected: bool,
}

impl ResourceState {
    /// Create a new resource state
    pub fn new(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            provider: provider.into(),
            identifier: None,
            attributes: HashMap::new(),
            protected: false,
        }
    }

    /// Build from a state returned by a provider
    pub fn from_state(state: &State, provider: impl Into<String>) -> Self {
        let mut resource = Self::new(&state.id.resource_type, &state.id.name, provider);
        resource.identifier = state.identifier.clone();
        resource.attributes = state
            .attributes
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), value_to_json(v)))
            .collect();
        resource
    }

    /// Set an attribute value
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Mark this resource as protected
    pub fn with_protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    pub fn resource_id(&self) -> ResourceId {
        ResourceId::new(&self.resource_type, &self.name)
    }

    /// Convert back to a core State; a stored entry always exists
    pub fn to_state(&self) -> State {
        let attributes = self
            .attributes
            .iter()
            .filter_map(|(k, v)| json_to_value(v).map(|v| (k.clone(), v)))
            .collect();
        let state = State::existing(self.resource_id(), attributes);
        match &self.identifier {
            Some(identifier) => state.with_identifier(identifier),
            None => state,
        }
    }
}

/// Convert a core Value to JSON
///
/// References never reach state after apply; if one does it is stored in
/// `${binding.attribute}` form.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Int(n) => serde_json::Value::from(*n),
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
        Value::ResourceRef(binding, attr) => {
            serde_json::Value::String(format!("${{{}.{}}}", binding, attr))
        }
    }
}

/// Convert JSON to a core Value; `null` has no counterpart and yields `None`
pub fn json_to_value(json: &serde_json::Value) -> Option<Value> {
    match json {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => Some(match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::String(n.to_string()),
        }),
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        serde_json::Value::Array(items) => {
            Some(Value::List(items.iter().filter_map(json_to_value).collect()))
        }
        serde_json::Value::Object(map) => Some(Value::Map(
            map.iter()
                .filter_map(|(k, v)| json_to_value(v).map(|v| (k.clone(), v)))
                .collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_file_new() {
        let state = StateFile::new();
        assert_eq!(state.version, StateFile::CURRENT_VERSION);
        assert_eq!(state.serial, 0);
        assert!(!state.lineage.is_empty());
        assert!(state.resources.is_empty());
    }

    #[test]
    fn test_state_file_increment_serial() {
        let mut state = StateFile::new();
        state.increment_serial();
        state.increment_serial();
        assert_eq!(state.serial, 2);
    }

    #[test]
    fn test_state_file_upsert_resource_keeps_protection() {
        let mut state = StateFile::new();

        state.upsert_resource(
            ResourceState::new("blb", "lb", "baiducloud")
                .with_identifier("lb-1")
                .with_protected(true),
        );
        state.upsert_resource(
            ResourceState::new("blb", "lb", "baiducloud")
                .with_identifier("lb-1")
                .with_attribute("name", serde_json::json!("web-2")),
        );

        assert_eq!(state.resources.len(), 1);
        assert!(state.resources[0].protected);
        assert_eq!(
            state.resources[0].attributes.get("name"),
            Some(&serde_json::json!("web-2"))
        );
    }

    #[test]
    fn test_state_file_remove_resource() {
        let mut state = StateFile::new();
        state.upsert_resource(ResourceState::new("cert", "tls", "baiducloud"));

        assert!(state.remove_resource("cert", "tls").is_some());
        assert!(state.resources.is_empty());
        assert!(state.remove_resource("cert", "other").is_none());
    }

    #[test]
    fn test_resource_state_from_core_state() {
        let mut server = HashMap::new();
        server.insert("instance_id".to_string(), Value::from("i-1"));
        server.insert("weight".to_string(), Value::Int(50));

        let mut attrs = HashMap::new();
        attrs.insert("_binding".to_string(), Value::from("servers"));
        attrs.insert("blb_id".to_string(), Value::from("lb-1"));
        attrs.insert("server".to_string(), Value::List(vec![Value::Map(server)]));
        let state = State::existing(ResourceId::new("blb_backend", "servers"), attrs)
            .with_identifier("lb-1");

        let stored = ResourceState::from_state(&state, "baiducloud");
        assert_eq!(stored.identifier.as_deref(), Some("lb-1"));
        assert!(!stored.attributes.contains_key("_binding"));
        assert_eq!(
            stored.attributes.get("server"),
            Some(&serde_json::json!([{ "instance_id": "i-1", "weight": 50 }]))
        );

        let restored = stored.to_state();
        assert!(restored.exists);
        assert_eq!(restored.identifier.as_deref(), Some("lb-1"));
        assert_eq!(restored.get("server"), state.get("server"));
    }

    #[test]
    fn test_json_null_and_floats() {
        assert_eq!(json_to_value(&serde_json::Value::Null), None);
        assert_eq!(
            json_to_value(&serde_json::json!(1.5)),
            Some(Value::from("1.5"))
        );
        assert_eq!(
            json_to_value(&serde_json::json!({"a": null, "b": 1})),
            Some(Value::Map(
                [("b".to_string(), Value::Int(1))].into_iter().collect()
            ))
        );
    }

    #[test]
    fn test_state_file_serialization() {
        let mut state = StateFile::new();
        state.upsert_resource(
            ResourceState::new("deployset", "ha", "baiducloud")
                .with_identifier("dset-1")
                .with_attribute("strategy", serde_json::json!("HOST_HA")),
        );

        let json = serde_json::to_string_pretty(&state).unwrap();
        let deserialized: StateFile = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.lineage, state.lineage);
        assert_eq!(deserialized.resources.len(), 1);
        let states = deserialized.current_states();
        let ha = &states[&ResourceId::new("deployset", "ha")];
        assert_eq!(ha.identifier.as_deref(), Some("dset-1"));
    }
}
