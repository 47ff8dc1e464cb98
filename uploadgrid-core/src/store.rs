use std::sync::Arc;

use crate::{
    CoreError, LocalId,
    item::{ItemPatch, UploadItem, UploadStatus},
    order::{OrderDelta, reconcile},
};

/// Ordered item collection. Every mutation builds a complete new sequence and swaps it in, so a
/// snapshot taken before or after a mutation is always internally consistent.
#[derive(Debug, Default)]
pub struct ItemStore {
    items: Arc<Vec<UploadItem>>,
}

impl ItemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, item: UploadItem) {
        self.add_all(vec![item]);
    }

    pub fn add_all(&mut self, items: Vec<UploadItem>) {
        // Appending cannot fail.
        if let Ok(Some(next)) = reconcile(&self.items, OrderDelta::Append(items)) {
            self.items = Arc::new(next);
        }
    }

    /// Sets `status` and applies `patch` to one item. Returns the updated record.
    pub fn update_status(
        &mut self,
        local_id: LocalId,
        status: UploadStatus,
        patch: ItemPatch,
    ) -> Result<&UploadItem, CoreError> {
        let position = self
            .position(local_id)
            .ok_or(CoreError::UnknownItem(local_id))?;
        let mut next = self.items.as_ref().clone();
        let item = &mut next[position];
        item.status = status;
        patch.apply(item);
        self.items = Arc::new(next);
        Ok(&self.items[position])
    }

    pub fn remove(&mut self, local_id: LocalId) -> Option<UploadItem> {
        let removed = self.get(local_id).cloned()?;
        if let Ok(Some(next)) = reconcile(&self.items, OrderDelta::Remove(local_id)) {
            self.items = Arc::new(next);
        }
        Some(removed)
    }

    /// Moves the item at `source` to `destination`. Returns whether the sequence changed.
    pub fn reorder(&mut self, source: usize, destination: Option<usize>) -> Result<bool, CoreError> {
        match reconcile(
            &self.items,
            OrderDelta::Move {
                source,
                destination,
            },
        )? {
            Some(next) => {
                self.items = Arc::new(next);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn clear(&mut self) -> Vec<UploadItem> {
        let previous = std::mem::take(&mut self.items);
        Arc::unwrap_or_clone(previous)
    }

    /// Shared handle on the current sequence, ordered by `order_index`.
    pub fn snapshot(&self) -> Arc<Vec<UploadItem>> {
        Arc::clone(&self.items)
    }

    pub fn get(&self, local_id: LocalId) -> Option<&UploadItem> {
        self.items.iter().find(|item| item.local_id == local_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UploadItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn position(&self, local_id: LocalId) -> Option<usize> {
        self.items.iter().position(|item| item.local_id == local_id)
    }
}
