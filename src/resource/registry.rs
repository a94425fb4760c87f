//! Resource Registry - Load resource definitions from JSON
//!
//! Resource types, their REST collection paths and the lifecycle states that
//! mark each transition as pending or settled are embedded JSON, so a new
//! type's state machine is data rather than code.

use crate::engine::{Mutation, StateSet, SyncError, TimeoutOverrides, Transition, Transitions};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[include_str!("../resources/database.json")];

/// Pending and target state lists from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct TransitionDef {
    #[serde(default)]
    pub pending: StateSet,
    #[serde(default)]
    pub target: StateSet,
}

impl TransitionDef {
    fn build(&self) -> Result<Transition, SyncError> {
        Transition::new(self.pending.clone(), self.target.clone())
    }
}

/// Transitions for the three state-changing operations
#[derive(Debug, Clone, Deserialize)]
pub struct TransitionsDef {
    pub create: TransitionDef,
    pub update: TransitionDef,
    pub delete: TransitionDef,
}

/// Resource definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDef {
    pub display_name: String,
    pub service: String,
    /// REST collection path, relative to the endpoint
    pub collection_path: String,
    pub transitions: TransitionsDef,
    #[serde(default)]
    pub timeouts: Option<TimeoutOverrides>,
}

impl ResourceDef {
    /// Validated transitions; fails if a state is both pending and target
    pub fn transitions(&self) -> Result<Transitions, SyncError> {
        Ok(Transitions {
            create: self.transitions.create.build()?,
            update: self.transitions.update.build()?,
            delete: self.transitions.delete.build()?,
        })
    }

    pub fn transition_def(&self, mutation: Mutation) -> &TransitionDef {
        match mutation {
            Mutation::Create => &self.transitions.create,
            Mutation::Update => &self.transitions.update,
            Mutation::Delete => &self.transitions.delete,
        }
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub resources: HashMap<String, ResourceDef>,
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<ResourceConfig> = OnceLock::new();

/// Get the resource registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static ResourceConfig {
    REGISTRY.get_or_init(|| {
        let mut final_config = ResourceConfig {
            resources: HashMap::new(),
        };

        for content in RESOURCE_FILES {
            let partial: ResourceConfig = serde_json::from_str(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded resource JSON: {}", e));
            final_config.resources.extend(partial.resources);
        }

        final_config
    })
}

/// Get a resource definition by key
pub fn get_resource(key: &str) -> Option<&'static ResourceDef> {
    get_registry().resources.get(key)
}

/// Get a resource definition by key, or fail with `UnknownResourceType`
pub fn require_resource(key: &str) -> Result<&'static ResourceDef, SyncError> {
    get_resource(key).ok_or_else(|| SyncError::UnknownResourceType(key.to_string()))
}

/// Get all resource keys, sorted
pub fn get_all_resource_keys() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = get_registry().resources.keys().map(|s| s.as_str()).collect();
    keys.sort_unstable();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LifecycleState;

    #[test]
    fn test_registry_loads_successfully() {
        let registry = get_registry();
        assert!(!registry.resources.is_empty(), "Registry should have resources");
    }

    #[test]
    fn test_every_definition_has_valid_transitions() {
        for key in get_all_resource_keys() {
            let def = get_resource(key).unwrap();
            assert!(def.transitions().is_ok(), "{key} has overlapping pending/target states");
            assert!(
                !def.transition_def(Mutation::Create).target.is_empty(),
                "{key} create must have a target state"
            );
        }
    }

    #[test]
    fn test_autonomous_data_warehouse_states() {
        let def = get_resource("autonomous-data-warehouse").expect("ADW should exist");
        assert_eq!(def.display_name, "Autonomous Data Warehouse");
        assert_eq!(def.service, "database");

        let transitions = def.transitions().unwrap();
        assert!(transitions.create.pending().contains(&LifecycleState::new("STARTING")));
        assert!(transitions.update.pending().contains(&LifecycleState::new("SCALE_IN_PROGRESS")));
        assert!(transitions.delete.target().contains(&LifecycleState::new("TERMINATED")));
    }

    #[test]
    fn test_unknown_resource_is_an_error() {
        assert!(matches!(
            require_resource("no-such-thing"),
            Err(SyncError::UnknownResourceType(_))
        ));
    }
}
