use std::collections::HashMap;

use crate::{CoreError, LocalId, TransportId};

/// Bidirectional map between local identities and the transport id of their current attempt.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    by_transport: HashMap<TransportId, LocalId>,
    by_local: HashMap<LocalId, TransportId>,
}

impl IdentityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or overwrites the mapping for `local_id`.
    ///
    /// Any previous attempt of `local_id` stops resolving, and a transport id that was bound to a
    /// different item is taken over.
    pub fn register(&mut self, local_id: LocalId, transport_id: TransportId) {
        if let Some(previous) = self.by_local.remove(&local_id) {
            self.by_transport.remove(&previous);
        }
        if let Some(other) = self.by_transport.remove(&transport_id) {
            self.by_local.remove(&other);
        }
        self.by_transport.insert(transport_id.clone(), local_id);
        self.by_local.insert(local_id, transport_id);
    }

    pub fn resolve_local(&self, transport_id: &str) -> Result<LocalId, CoreError> {
        self.by_transport
            .get(transport_id)
            .copied()
            .ok_or_else(|| CoreError::IdentityInconsistency {
                transport_id: transport_id.to_string(),
            })
    }

    pub fn current(&self, local_id: LocalId) -> Option<&str> {
        self.by_local.get(&local_id).map(String::as_str)
    }

    pub fn unregister(&mut self, local_id: LocalId) -> Option<TransportId> {
        let transport_id = self.by_local.remove(&local_id)?;
        self.by_transport.remove(&transport_id);
        Some(transport_id)
    }

    pub fn clear(&mut self) {
        self.by_transport.clear();
        self.by_local.clear();
    }

    pub fn len(&self) -> usize {
        self.by_local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_local.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reregistering_drops_the_stale_attempt() {
        let mut registry = IdentityRegistry::new();
        let id = LocalId::new(1);
        registry.register(id, "tus-a".to_string());
        registry.register(id, "tus-b".to_string());

        assert_eq!(registry.resolve_local("tus-b").unwrap(), id);
        assert!(matches!(
            registry.resolve_local("tus-a"),
            Err(CoreError::IdentityInconsistency { .. })
        ));
        assert_eq!(registry.current(id), Some("tus-b"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_clears_both_directions() {
        let mut registry = IdentityRegistry::new();
        let id = LocalId::new(3);
        registry.register(id, "tus-x".to_string());

        assert_eq!(registry.unregister(id).as_deref(), Some("tus-x"));
        assert!(registry.resolve_local("tus-x").is_err());
        assert!(registry.current(id).is_none());
        assert!(registry.unregister(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn transport_id_taken_over_by_another_item() {
        let mut registry = IdentityRegistry::new();
        registry.register(LocalId::new(1), "tus-shared".to_string());
        registry.register(LocalId::new(2), "tus-shared".to_string());

        assert_eq!(registry.resolve_local("tus-shared").unwrap(), LocalId::new(2));
        assert!(registry.current(LocalId::new(1)).is_none());
    }
}
