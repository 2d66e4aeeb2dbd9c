//! Per-zone set of model adapters.

use crate::adapter::{topological_order, ModelAdapter};
use crate::error::{SyncError, SyncResult};
use crate::tracker::PendingChangeSet;
use std::collections::HashMap;
use std::sync::Arc;
use zonesync_protocol::{SyncRecord, ZoneId};

/// Adapters registered for one zone, ordered parent types first.
#[derive(Clone)]
pub struct AdapterRegistry {
    ordered: Vec<Arc<dyn ModelAdapter>>,
    by_type: HashMap<String, usize>,
}

impl AdapterRegistry {
    /// Validates and orders a set of adapters.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if two adapters share a type id, a declared
    /// parent type is not registered, or parent types form a cycle other
    /// than a type referencing itself.
    pub fn new(adapters: Vec<Arc<dyn ModelAdapter>>) -> SyncResult<Self> {
        let mut by_id: HashMap<String, Arc<dyn ModelAdapter>> = HashMap::new();
        for adapter in adapters {
            let type_id = adapter.descriptor().type_id.clone();
            if by_id.insert(type_id.clone(), adapter).is_some() {
                return Err(SyncError::Configuration(format!(
                    "type {type_id} registered twice"
                )));
            }
        }

        for adapter in by_id.values() {
            let descriptor = adapter.descriptor();
            if let Some(parent) = descriptor.parent_type() {
                if !by_id.contains_key(parent) {
                    return Err(SyncError::Configuration(format!(
                        "type {} declares unregistered parent type {parent}",
                        descriptor.type_id
                    )));
                }
            }
        }

        let mut type_ids: Vec<String> = by_id.keys().cloned().collect();
        type_ids.sort();
        let ordered_ids = topological_order(&type_ids, |t| {
            by_id
                .get(t)
                .and_then(|a| a.descriptor().parent_type())
                .filter(|parent| *parent != t.as_str())
                .map(str::to_string)
        })
        .map_err(|t| SyncError::Configuration(format!("parent type cycle through {t}")))?;

        let mut ordered = Vec::with_capacity(ordered_ids.len());
        let mut by_type = HashMap::new();
        for id in ordered_ids {
            if let Some(adapter) = by_id.remove(&id) {
                by_type.insert(id, ordered.len());
                ordered.push(adapter);
            }
        }

        Ok(Self { ordered, by_type })
    }

    /// Returns the adapter of a type.
    pub fn adapter(&self, type_id: &str) -> Option<&Arc<dyn ModelAdapter>> {
        self.by_type.get(type_id).map(|i| &self.ordered[*i])
    }

    /// Returns adapters ordered parent types first.
    pub fn ordered(&self) -> &[Arc<dyn ModelAdapter>] {
        &self.ordered
    }

    /// Returns the position of a type in dependency order.
    pub fn rank(&self, type_id: &str) -> usize {
        self.by_type.get(type_id).copied().unwrap_or(usize::MAX)
    }

    /// Returns true if the type is registered.
    pub fn contains(&self, type_id: &str) -> bool {
        self.by_type.contains_key(type_id)
    }

    /// Returns adapters whose parent type is `type_id`.
    pub fn child_adapters(&self, type_id: &str) -> Vec<&Arc<dyn ModelAdapter>> {
        self.ordered
            .iter()
            .filter(|a| a.descriptor().parent_type() == Some(type_id))
            .collect()
    }

    /// Collects upload records for all pending entities, parents first.
    pub fn records_to_upload(
        &self,
        zone: &ZoneId,
        pending: &PendingChangeSet,
    ) -> SyncResult<Vec<SyncRecord>> {
        let mut records = Vec::with_capacity(pending.len());
        for adapter in &self.ordered {
            records.extend(adapter.records_to_upload(zone, pending)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StoreAdapter;
    use crate::descriptor::EntityDescriptor;
    use crate::store::{LocalStore, MemoryStore};

    fn adapter(descriptor: EntityDescriptor) -> Arc<dyn ModelAdapter> {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        Arc::new(StoreAdapter::new(descriptor, store))
    }

    #[test]
    fn orders_parent_types_first() {
        let registry = AdapterRegistry::new(vec![
            adapter(EntityDescriptor::new("Employee", "id").with_parent("company", "Company")),
            adapter(EntityDescriptor::new("Company", "id")),
            adapter(EntityDescriptor::new("Badge", "id").with_parent("owner", "Employee")),
        ])
        .unwrap();

        let order: Vec<&str> = registry
            .ordered()
            .iter()
            .map(|a| a.descriptor().type_id.as_str())
            .collect();
        assert_eq!(order, vec!["Company", "Employee", "Badge"]);
        assert_eq!(registry.child_adapters("Company").len(), 1);
        assert!(registry.rank("Company") < registry.rank("Badge"));
    }

    #[test]
    fn self_reference_is_allowed() {
        let registry = AdapterRegistry::new(vec![adapter(
            EntityDescriptor::new("Folder", "id").with_parent("parent", "Folder"),
        )]);
        assert!(registry.is_ok());
    }

    #[test]
    fn unregistered_parent_is_rejected() {
        let result = AdapterRegistry::new(vec![adapter(
            EntityDescriptor::new("Employee", "id").with_parent("company", "Company"),
        )]);
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[test]
    fn type_cycle_is_rejected() {
        let result = AdapterRegistry::new(vec![
            adapter(EntityDescriptor::new("A", "id").with_parent("b", "B")),
            adapter(EntityDescriptor::new("B", "id").with_parent("a", "A")),
        ]);
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[test]
    fn duplicate_type_is_rejected() {
        let result = AdapterRegistry::new(vec![
            adapter(EntityDescriptor::new("A", "id")),
            adapter(EntityDescriptor::new("A", "id")),
        ]);
        assert!(result.is_err());
    }
}
