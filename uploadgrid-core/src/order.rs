//! Dense ordering over the merged pending + completed item sequence.

use crate::{CoreError, LocalId, item::UploadItem};

/// Structural change applied to the ordered sequence.
#[derive(Debug)]
pub enum OrderDelta {
    /// New items, appended in the order supplied.
    Append(Vec<UploadItem>),
    /// Drag gesture. A missing destination means the item was dropped outside the list.
    Move {
        source: usize,
        destination: Option<usize>,
    },
    Remove(LocalId),
}

/// Applies `delta` to `current` and returns the reindexed sequence, or `None` when the delta
/// leaves the sequence unchanged.
pub fn reconcile(
    current: &[UploadItem],
    delta: OrderDelta,
) -> Result<Option<Vec<UploadItem>>, CoreError> {
    let mut next = match delta {
        OrderDelta::Append(items) => {
            if items.is_empty() {
                return Ok(None);
            }
            let mut next = Vec::with_capacity(current.len() + items.len());
            next.extend_from_slice(current);
            next.extend(items);
            next
        }
        OrderDelta::Move {
            source,
            destination,
        } => {
            let len = current.len();
            if source >= len {
                return Err(CoreError::IndexOutOfRange { index: source, len });
            }
            let Some(destination) = destination else {
                return Ok(None);
            };
            if destination >= len {
                return Err(CoreError::IndexOutOfRange {
                    index: destination,
                    len,
                });
            }
            if source == destination {
                return Ok(None);
            }
            let mut next = current.to_vec();
            let moved = next.remove(source);
            next.insert(destination, moved);
            next
        }
        OrderDelta::Remove(local_id) => {
            if !current.iter().any(|item| item.local_id == local_id) {
                return Ok(None);
            }
            current
                .iter()
                .filter(|item| item.local_id != local_id)
                .cloned()
                .collect()
        }
    };

    reindex(&mut next);
    Ok(Some(next))
}

pub fn reindex(items: &mut [UploadItem]) {
    for (position, item) in items.iter_mut().enumerate() {
        item.order_index = position;
    }
}

/// True when `order_index` values are exactly `0..len` in sequence order.
pub fn is_dense(items: &[UploadItem]) -> bool {
    items
        .iter()
        .enumerate()
        .all(|(position, item)| item.order_index == position)
}
