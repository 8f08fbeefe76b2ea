//! Resolver - Dependency ordering and reference resolution
//!
//! Resources refer to each other with `binding.attribute`. This module sorts
//! resources so that dependencies come first, and substitutes references
//! with values known from state or from effects applied so far.

use std::collections::{HashMap, HashSet};

use crate::resource::{Resource, ResourceId, State, Value};

/// binding name -> attributes visible through that binding
pub type Bindings = HashMap<String, HashMap<String, Value>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Key used for dependency tracking: binding name, or `type:name` for anonymous resources
pub fn binding_key(resource: &Resource) -> String {
    resource
        .binding()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}:{}", resource.id.resource_type, resource.id.name))
}

/// Extract binding names that a resource depends on
pub fn get_resource_dependencies(resource: &Resource) -> HashSet<String> {
    let mut deps = HashSet::new();
    for value in resource.attributes.values() {
        collect_dependencies(value, &mut deps);
    }
    deps
}

fn collect_dependencies(value: &Value, deps: &mut HashSet<String>) {
    match value {
        Value::ResourceRef(binding_name, _) => {
            deps.insert(binding_name.clone());
        }
        Value::List(items) => {
            for item in items {
                collect_dependencies(item, deps);
            }
        }
        Value::Map(map) => {
            for v in map.values() {
                collect_dependencies(v, deps);
            }
        }
        _ => {}
    }
}

/// Sort resources topologically based on dependencies
///
/// Independent resources keep their declaration order.
pub fn sort_resources_by_dependencies(resources: &[Resource]) -> Result<Vec<Resource>, ResolveError> {
    let mut binding_to_resource: HashMap<String, &Resource> = HashMap::new();
    for resource in resources {
        if let Some(binding_name) = resource.binding() {
            binding_to_resource.insert(binding_name.to_string(), resource);
        }
    }

    let mut sorted = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut visiting: Vec<String> = Vec::new();

    fn visit<'a>(
        resource: &'a Resource,
        binding_to_resource: &HashMap<String, &'a Resource>,
        visited: &mut HashSet<String>,
        visiting: &mut Vec<String>,
        sorted: &mut Vec<Resource>,
    ) -> Result<(), ResolveError> {
        let key = binding_key(resource);

        if visited.contains(&key) {
            return Ok(());
        }
        if let Some(pos) = visiting.iter().position(|k| k == &key) {
            let mut cycle = visiting[pos..].to_vec();
            cycle.push(key);
            return Err(ResolveError::Cycle(cycle));
        }

        visiting.push(key.clone());

        let mut deps: Vec<String> = get_resource_dependencies(resource).into_iter().collect();
        deps.sort();
        for dep in deps {
            if let Some(dep_resource) = binding_to_resource.get(&dep) {
                visit(dep_resource, binding_to_resource, visited, visiting, sorted)?;
            }
        }

        visiting.pop();
        visited.insert(key);
        sorted.push(resource.clone());
        Ok(())
    }

    for resource in resources {
        visit(
            resource,
            &binding_to_resource,
            &mut visited,
            &mut visiting,
            &mut sorted,
        )?;
    }

    Ok(sorted)
}

/// Replace references with known values; unknown references are kept as-is
pub fn resolve_ref_value(value: &Value, bindings: &Bindings) -> Value {
    match value {
        Value::ResourceRef(binding_name, attr_name) => {
            if let Some(attrs) = bindings.get(binding_name)
                && let Some(attr_value) = attrs.get(attr_name)
                && attr_value != value
            {
                return resolve_ref_value(attr_value, bindings);
            }
            value.clone()
        }
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|v| resolve_ref_value(v, bindings))
                .collect(),
        ),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_ref_value(v, bindings)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// Copy of `resource` with every resolvable reference substituted
pub fn resolve_resource(resource: &Resource, bindings: &Bindings) -> Resource {
    let mut resolved = resource.clone();
    for (key, value) in &resource.attributes {
        resolved
            .attributes
            .insert(key.clone(), resolve_ref_value(value, bindings));
    }
    resolved
}

/// Record what a binding exposes: desired attributes overlaid with the
/// observed state, plus `id` holding the vendor identifier
pub fn bind_state(bindings: &mut Bindings, resource: &Resource, state: &State) {
    let Some(binding_name) = resource.binding() else {
        return;
    };
    let mut attrs = resource.attributes.clone();
    if state.exists {
        for (k, v) in &state.attributes {
            attrs.insert(k.clone(), v.clone());
        }
        if let Some(identifier) = &state.identifier {
            attrs.insert("id".to_string(), Value::String(identifier.clone()));
        }
    }
    bindings.insert(binding_name.to_string(), attrs);
}

/// Build bindings for every declared resource from the states read before planning
pub fn seed_bindings(resources: &[Resource], current_states: &HashMap<ResourceId, State>) -> Bindings {
    let mut bindings = Bindings::new();
    for resource in resources {
        let state = current_states
            .get(&resource.id)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.id.clone()));
        bind_state(&mut bindings, resource, &state);
    }
    bindings
}

/// Resolve references in all resources using states read before planning
pub fn resolve_refs_with_state(
    resources: &mut [Resource],
    current_states: &HashMap<ResourceId, State>,
) {
    let bindings = seed_bindings(resources, current_states);
    for resource in resources.iter_mut() {
        *resource = resolve_resource(resource, &bindings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(resource_type: &str, binding: &str) -> Resource {
        Resource::new(resource_type, binding).with_attribute("_binding", Value::from(binding))
    }

    fn reference(binding: &str, attr: &str) -> Value {
        Value::ResourceRef(binding.to_string(), attr.to_string())
    }

    #[test]
    fn dependencies_come_first() {
        let listener = bound("blb_listener", "http").with_attribute("blb_id", reference("lb", "id"));
        let backend = bound("blb_backend", "servers").with_attribute("blb_id", reference("lb", "id"));
        let lb = bound("blb", "lb");
        let cert = bound("cert", "tls");

        let sorted =
            sort_resources_by_dependencies(&[listener, cert, backend, lb]).unwrap();
        let names: Vec<&str> = sorted.iter().map(|r| r.id.name.as_str()).collect();
        assert_eq!(names, vec!["lb", "http", "tls", "servers"]);
    }

    #[test]
    fn cycles_are_reported() {
        let a = bound("cert", "a").with_attribute("x", reference("b", "id"));
        let b = bound("cert", "b").with_attribute("x", reference("a", "id"));

        let err = sort_resources_by_dependencies(&[a, b]).unwrap_err();
        let ResolveError::Cycle(path) = err;
        assert_eq!(path, vec!["a", "b", "a"]);
    }

    #[test]
    fn resolve_nested_references() {
        let mut bindings = Bindings::new();
        let mut lb = HashMap::new();
        lb.insert("id".to_string(), Value::from("lb-123"));
        bindings.insert("lb".to_string(), lb);

        let mut server = HashMap::new();
        server.insert("blb".to_string(), reference("lb", "id"));
        let value = Value::List(vec![Value::Map(server), reference("missing", "id")]);

        let resolved = resolve_ref_value(&value, &bindings);
        let Value::List(items) = resolved else {
            panic!("Expected list");
        };
        assert_eq!(
            items[0].as_map().and_then(|m| m.get("blb")),
            Some(&Value::from("lb-123"))
        );
        assert_eq!(items[1], reference("missing", "id"));
    }

    #[test]
    fn bind_state_exposes_identifier_as_id() {
        let resource = bound("blb", "lb").with_attribute("name", Value::from("web"));
        let mut attrs = HashMap::new();
        attrs.insert("address".to_string(), Value::from("192.168.0.4"));
        let state = State::existing(resource.id.clone(), attrs).with_identifier("lb-abc");

        let mut bindings = Bindings::new();
        bind_state(&mut bindings, &resource, &state);

        let lb = &bindings["lb"];
        assert_eq!(lb.get("id"), Some(&Value::from("lb-abc")));
        assert_eq!(lb.get("address"), Some(&Value::from("192.168.0.4")));
        assert_eq!(lb.get("name"), Some(&Value::from("web")));
    }

    #[test]
    fn resolve_refs_with_existing_state() {
        let lb = bound("blb", "lb");
        let listener = bound("blb_listener", "http").with_attribute("blb_id", reference("lb", "id"));
        let mut states = HashMap::new();
        states.insert(
            lb.id.clone(),
            State::existing(lb.id.clone(), HashMap::new()).with_identifier("lb-1"),
        );

        let mut resources = vec![lb, listener];
        resolve_refs_with_state(&mut resources, &states);
        assert_eq!(resources[1].get_str("blb_id"), Some("lb-1"));
    }
}
