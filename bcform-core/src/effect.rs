//! Effect - Side effects represented as values
//!
//! Nothing happens until an Effect is handed to the Interpreter.

use crate::resource::{Resource, ResourceId, State};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Query a data source
    Read(Resource),
    Create(Resource),
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed: Vec<String>,
    },
    /// Delete and recreate because a force-new attribute changed
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed: Vec<String>,
    },
    Delete {
        id: ResourceId,
        identifier: String,
    },
}

impl Effect {
    /// Whether this effect changes remote infrastructure
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Effect::Read(_))
    }

    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Effect::Read(r) | Effect::Create(r) => &r.id,
            Effect::Update { id, .. } | Effect::Replace { id, .. } | Effect::Delete { id, .. } => id,
        }
    }

    /// Desired resource for effects that carry one
    pub fn resource(&self) -> Option<&Resource> {
        match self {
            Effect::Read(r) | Effect::Create(r) => Some(r),
            Effect::Update { to, .. } | Effect::Replace { to, .. } => Some(to),
            Effect::Delete { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_is_not_mutating() {
        let read = Effect::Read(Resource::new("ccev2_instance_groups", "groups"));
        let delete = Effect::Delete {
            id: ResourceId::new("cert", "web"),
            identifier: "cert-123".to_string(),
        };
        assert!(!read.is_mutating());
        assert!(delete.is_mutating());
        assert_eq!(delete.resource_id().to_string(), "cert.web");
        assert!(delete.resource().is_none());
    }
}
