//! Differ - Compare desired state with current state to generate a Plan
//!
//! Compares the "desired state" declared in DSL with the "current state" fetched
//! from the Provider, and generates a list of required Effects (Plan).

use std::collections::{HashMap, HashSet};

use crate::effect::Effect;
use crate::plan::Plan;
use crate::resolver::{ResolveError, resolve_resource, seed_bindings, sort_resources_by_dependencies};
use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::ResourceSchema;

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences -> needs update
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// A force-new attribute changed -> delete and recreate
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// Compare desired state with current state to compute a Diff
pub fn diff(desired: &Resource, current: &State, schema: Option<&ResourceSchema>) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let changed = find_changed_attributes(&desired.attributes, &current.attributes, schema);

    if changed.is_empty() {
        return Diff::NoChange(desired.id.clone());
    }

    let replace = schema.is_some_and(|s| changed.iter().any(|name| s.is_force_new(name)));
    if replace {
        Diff::Replace {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    } else {
        Diff::Update {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and current state, sorted by name
fn find_changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
    schema: Option<&ResourceSchema>,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired {
        // Skip internal attributes (starting with _)
        if key.starts_with('_') {
            continue;
        }
        if schema.is_some_and(|s| s.is_output_only(key)) {
            continue;
        }

        // Unresolved references are only known after apply
        if desired_value.contains_ref() {
            changed.push(key.clone());
            continue;
        }

        let same = current.get(key).is_some_and(|current_value| match schema {
            Some(s) => s.values_match(key, desired_value, current_value),
            None => current_value == desired_value,
        });
        if !same {
            changed.push(key.clone());
        }
    }

    changed.sort();
    changed
}

/// Compute Diff for multiple resources and generate a Plan
///
/// Resources are visited in dependency order. State entries that no longer
/// have a desired counterpart are deleted at the end, in reverse order.
pub fn create_plan(
    desired: &[Resource],
    current_states: &HashMap<ResourceId, State>,
    schemas: &HashMap<String, ResourceSchema>,
) -> Result<Plan, ResolveError> {
    let mut plan = Plan::new();
    let sorted = sort_resources_by_dependencies(desired)?;
    let bindings = seed_bindings(&sorted, current_states);

    for resource in &sorted {
        let schema = schemas.get(&resource.id.resource_type);
        let mut resource = resolve_resource(resource, &bindings);
        if let Some(schema) = schema {
            schema.apply_defaults(&mut resource.attributes);
        }

        if resource.is_data_source() {
            plan.add(Effect::Read(resource));
            continue;
        }

        let current = current_states
            .get(&resource.id)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.id.clone()));

        match diff(&resource, &current, schema) {
            Diff::Create(r) => plan.add(Effect::Create(r)),
            Diff::Update {
                id,
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Update {
                id,
                from,
                to,
                changed: changed_attributes,
            }),
            Diff::Replace {
                id,
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Replace {
                id,
                from,
                to,
                changed: changed_attributes,
            }),
            Diff::NoChange(_) => {}
        }
    }

    let desired_ids: HashSet<&ResourceId> = desired.iter().map(|r| &r.id).collect();
    let mut orphans: Vec<(&ResourceId, &str)> = current_states
        .iter()
        .filter(|(id, _)| !desired_ids.contains(id))
        .filter(|(_, state)| state.exists)
        .filter_map(|(id, state)| state.identifier.as_deref().map(|ident| (id, ident)))
        .collect();
    orphans.sort();
    for (id, identifier) in orphans.into_iter().rev() {
        plan.add(Effect::Delete {
            id: id.clone(),
            identifier: identifier.to_string(),
        });
    }

    Ok(plan)
}

/// Plan that deletes every managed resource, dependents first
pub fn create_destroy_plan(
    desired: &[Resource],
    current_states: &HashMap<ResourceId, State>,
) -> Result<Plan, ResolveError> {
    let mut plan = Plan::new();
    let sorted = sort_resources_by_dependencies(desired)?;

    for resource in sorted.iter().rev() {
        if resource.is_data_source() {
            continue;
        }
        if let Some(state) = current_states.get(&resource.id)
            && state.exists
            && let Some(identifier) = &state.identifier
        {
            plan.add(Effect::Delete {
                id: resource.id.clone(),
                identifier: identifier.clone(),
            });
        }
    }

    Ok(plan)
}
