use std::time::{Duration, Instant};

use crate::{
    CoreError, LocalId, META_ATTEMPT, META_CONTENT_TYPE, META_LOCAL_ID, META_NAME,
    item::{UploadItem, UploadStatus},
    transport::SubmitRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueuedRetry {
    due: Instant,
    local_id: LocalId,
}

/// Plans resubmissions of failed items and staggers bulk retries.
#[derive(Debug)]
pub struct RetryCoordinator {
    stagger: Duration,
    queue: Vec<QueuedRetry>,
}

impl RetryCoordinator {
    #[must_use]
    pub fn new(stagger: Duration) -> Self {
        Self {
            stagger,
            queue: Vec::new(),
        }
    }

    /// Checks that `item` may be retried now.
    pub fn ensure_retryable(item: &UploadItem) -> Result<(), CoreError> {
        match item.status {
            UploadStatus::Failed | UploadStatus::Retrying if item.source.is_some() => Ok(()),
            status => Err(CoreError::NotRetryable {
                local_id: item.local_id,
                status,
            }),
        }
    }

    /// Builds the submission for attempt `attempt` of `item`. The transport sees a new entity
    /// name; the item keeps its display name.
    pub fn resubmission(item: &UploadItem, attempt: u32) -> Result<SubmitRequest, CoreError> {
        let bytes = item.source.clone().ok_or(CoreError::NotRetryable {
            local_id: item.local_id,
            status: item.status,
        })?;
        Ok(submission(item, bytes, attempt))
    }

    /// Queues every id with a linearly increasing delay, starting at `now`. Ids already queued
    /// keep their slot.
    pub fn schedule_bulk(&mut self, failed: impl IntoIterator<Item = LocalId>, now: Instant) -> Vec<LocalId> {
        let mut scheduled = Vec::new();
        for local_id in failed {
            if self.is_queued(local_id) {
                continue;
            }
            let slot = u32::try_from(scheduled.len()).unwrap_or(u32::MAX);
            self.queue.push(QueuedRetry {
                due: now + self.stagger.saturating_mul(slot),
                local_id,
            });
            scheduled.push(local_id);
        }
        scheduled
    }

    pub fn is_queued(&self, local_id: LocalId) -> bool {
        self.queue.iter().any(|queued| queued.local_id == local_id)
    }

    /// Removes and returns the ids whose slot has come, in slot order.
    pub fn take_due(&mut self, now: Instant) -> Vec<LocalId> {
        let mut due: Vec<QueuedRetry> = Vec::new();
        self.queue.retain(|queued| {
            if queued.due <= now {
                due.push(*queued);
                false
            } else {
                true
            }
        });
        due.sort_by_key(|queued| queued.due);
        due.into_iter().map(|queued| queued.local_id).collect()
    }

    pub fn cancel(&mut self, local_id: LocalId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|queued| queued.local_id != local_id);
        self.queue.len() != before
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.iter().map(|queued| queued.due).min()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Submission request for `item`. Attempt 0 is sent under the display name.
pub(crate) fn submission(item: &UploadItem, bytes: bytes::Bytes, attempt: u32) -> SubmitRequest {
    let mut metadata = item.metadata.clone();
    metadata.insert(META_NAME.to_string(), item.display_name.clone());
    metadata.insert(META_CONTENT_TYPE.to_string(), item.mime_type.clone());
    metadata.insert(META_LOCAL_ID.to_string(), item.local_id.get().to_string());
    metadata.insert(META_ATTEMPT.to_string(), attempt.to_string());

    let name = if attempt == 0 {
        item.display_name.clone()
    } else {
        retry_name(&item.display_name, attempt)
    };

    SubmitRequest {
        name,
        mime_type: item.mime_type.clone(),
        bytes,
        metadata,
    }
}

fn retry_name(display_name: &str, attempt: u32) -> String {
    match display_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-retry{attempt}.{ext}"),
        _ => format!("{display_name}-retry{attempt}"),
    }
}
