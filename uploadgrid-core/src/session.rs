//! Top-level orchestration of one upload batch.
//!
//! An [`UploadSession`] owns its transport, preview provider, store and registry. Every public
//! method is one atomic step of the session: callers on a single-threaded loop (or a single
//! owning task) can interleave user commands, transport events and timer polls freely.

use std::{sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    CoreError, LocalId, PLACEHOLDER_PREVIEW_URL,
    config::SessionConfig,
    intake::{PreviewKind, RawFile},
    item::{FinalizedItem, ItemPatch, ItemView, UploadItem, UploadStatus},
    preview::PreviewProvider,
    registry::IdentityRegistry,
    retry::{RetryCoordinator, submission},
    smoother::{ProgressSmoother, SuccessDecision},
    store::ItemStore,
    transport::{Transport, TransportEvent},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeReport {
    pub accepted: Vec<LocalId>,
    pub rejected: Vec<CoreError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// No unresolved items.
    Idle,
    Active,
}

pub struct UploadSession<T: Transport, P: PreviewProvider> {
    config: SessionConfig,
    transport: T,
    previews: P,
    store: ItemStore,
    registry: IdentityRegistry,
    smoother: ProgressSmoother,
    retries: RetryCoordinator,
    next_local_id: u64,
    banner: Option<String>,
    last_batch: Option<BatchSummary>,
}

impl<T: Transport, P: PreviewProvider> UploadSession<T, P> {
    pub fn new(config: SessionConfig, transport: T, previews: P) -> Self {
        let smoother = ProgressSmoother::new(config.min_display());
        let retries = RetryCoordinator::new(config.retry_stagger());
        Self {
            config,
            transport,
            previews,
            store: ItemStore::new(),
            registry: IdentityRegistry::new(),
            smoother,
            retries,
            next_local_id: 0,
            banner: None,
            last_batch: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn previews(&self) -> &P {
        &self.previews
    }

    /// Validates, appends and submits `files`. Rejected files never reach the store.
    pub fn add_files(&mut self, files: impl IntoIterator<Item = RawFile>) -> IntakeReport {
        let mut report = IntakeReport::default();
        let mut items = Vec::new();

        for file in files {
            let kind = match self.config.intake.check(&file) {
                Ok(kind) => kind,
                Err(err) => {
                    warn!(name = %file.name, "intake rejected: {err}");
                    report.rejected.push(err);
                    continue;
                }
            };

            let (preview_url, is_preview_only) = match kind {
                PreviewKind::Inline => (
                    self.previews.create(&file.name, &file.mime_type, &file.bytes),
                    false,
                ),
                PreviewKind::Placeholder => (PLACEHOLDER_PREVIEW_URL.to_string(), true),
            };

            self.next_local_id += 1;
            let local_id = LocalId::new(self.next_local_id);
            items.push(UploadItem {
                local_id,
                transport_id: None,
                display_name: file.name,
                mime_type: file.mime_type,
                size_bytes: file.bytes.len() as u64,
                source: Some(file.bytes),
                preview_url,
                is_preview_only,
                storage_url: None,
                status: UploadStatus::Pending,
                progress_percent: 0,
                order_index: 0,
                attempt: 0,
                last_error: None,
                metadata: Default::default(),
            });
            report.accepted.push(local_id);
        }

        self.store.add_all(items);
        for local_id in &report.accepted {
            self.submit_initial(*local_id);
        }

        info!(
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            total = self.store.len(),
            "files added"
        );
        report
    }

    /// Moves the item at `source` to `destination`. `None` is a drop outside the list.
    pub fn reorder(&mut self, source: usize, destination: Option<usize>) -> Result<bool, CoreError> {
        let changed = self.store.reorder(source, destination)?;
        if changed {
            debug!(source, ?destination, "items reordered");
        }
        Ok(changed)
    }

    pub fn retry(&mut self, local_id: LocalId, now: Instant) -> Result<(), CoreError> {
        let item = self
            .store
            .get(local_id)
            .ok_or(CoreError::UnknownItem(local_id))?;
        RetryCoordinator::ensure_retryable(item)?;

        self.retries.cancel(local_id);
        self.banner = None;
        self.resubmit(local_id, now);
        Ok(())
    }

    /// Queues every failed item for resubmission in order, staggered. Returns how many were
    /// queued.
    pub fn retry_all(&mut self, now: Instant) -> usize {
        let failed: Vec<LocalId> = self
            .store
            .iter()
            .filter(|item| RetryCoordinator::ensure_retryable(item).is_ok())
            .filter(|item| item.status == UploadStatus::Failed)
            .map(|item| item.local_id)
            .collect();
        if failed.is_empty() {
            return 0;
        }

        self.banner = None;
        let scheduled = self.retries.schedule_bulk(failed, now);
        for local_id in &scheduled {
            self.release_attempt(*local_id);
            self.set_status(
                *local_id,
                UploadStatus::Retrying,
                ItemPatch {
                    last_error: Some(None),
                    ..ItemPatch::default()
                },
            );
        }
        info!(count = scheduled.len(), "bulk retry scheduled");

        self.poll_timers(now);
        scheduled.len()
    }

    pub fn remove_item(&mut self, local_id: LocalId) -> Result<(), CoreError> {
        let item = self
            .store
            .remove(local_id)
            .ok_or(CoreError::UnknownItem(local_id))?;

        let discarded_finalize = self.smoother.cancel(local_id);
        self.retries.cancel(local_id);
        if let Some(transport_id) = self.registry.unregister(local_id)
            && item.status != UploadStatus::Success
        {
            self.transport.cancel(&transport_id);
        }
        if !item.is_preview_only {
            self.previews.release(&item.preview_url);
        }

        info!(
            %local_id,
            status = ?item.status,
            discarded_finalize,
            "item removed"
        );
        Ok(())
    }

    pub fn set_item_metadata(
        &mut self,
        local_id: LocalId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), CoreError> {
        let status = self
            .store
            .get(local_id)
            .map(|item| item.status)
            .ok_or(CoreError::UnknownItem(local_id))?;
        self.store.update_status(
            local_id,
            status,
            ItemPatch {
                metadata: vec![(key.into(), value.into())],
                ..ItemPatch::default()
            },
        )?;
        Ok(())
    }

    /// Applies one transport callback. Failures land on the item; nothing is returned.
    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        if let TransportEvent::BatchComplete { succeeded, failed } = event {
            info!(succeeded, failed, "transport batch complete");
            self.last_batch = Some(BatchSummary { succeeded, failed });
            return;
        }
        let Some(transport_id) = event.transport_id().map(str::to_owned) else {
            return;
        };

        let local_id = match self.registry.resolve_local(&transport_id) {
            Ok(local_id) => local_id,
            Err(err) => {
                warn!("dropping transport event: {err}");
                return;
            }
        };

        let Some(status) = self.store.get(local_id).map(|item| item.status) else {
            warn!(%local_id, %transport_id, "dropping event for item missing from store");
            self.registry.unregister(local_id);
            return;
        };
        if !status.is_in_flight() {
            debug!(%local_id, ?status, "ignoring late transport event");
            return;
        }

        match event {
            TransportEvent::Accepted { size_bytes, .. } => {
                debug!(%local_id, %transport_id, size_bytes, "upload accepted");
                self.smoother.start(local_id, now);
                self.set_status(local_id, UploadStatus::Uploading, ItemPatch::default());
            }
            TransportEvent::Progress {
                bytes_sent,
                bytes_total,
                ..
            } => self.on_progress(local_id, bytes_sent, bytes_total, now),
            TransportEvent::Success { remote_url, .. } => self.on_success(local_id, &remote_url, now),
            TransportEvent::Error { reason, .. } => self.on_transfer_error(local_id, reason),
            TransportEvent::BatchComplete { .. } => {}
        }
    }

    /// Fires due finalizes and staggered retries.
    pub fn poll_timers(&mut self, now: Instant) {
        for (local_id, remote_url) in self.smoother.take_due(now) {
            match self.store.get(local_id).map(|item| item.status) {
                Some(status) if status.is_in_flight() => self.finalize_item(local_id, remote_url),
                _ => debug!(%local_id, "discarding finalize for settled item"),
            }
        }

        for local_id in self.retries.take_due(now) {
            match self.store.get(local_id).map(|item| item.status) {
                Some(UploadStatus::Retrying) => self.resubmit(local_id, now),
                _ => debug!(%local_id, "discarding queued retry"),
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.smoother.next_deadline(), self.retries.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Ordered view models for the UI.
    pub fn snapshot(&self) -> Vec<ItemView> {
        self.store.iter().map(UploadItem::view).collect()
    }

    pub fn items(&self) -> Arc<Vec<UploadItem>> {
        self.store.snapshot()
    }

    pub fn item(&self, local_id: LocalId) -> Option<&UploadItem> {
        self.store.get(local_id)
    }

    /// True when there is at least one item and every item has succeeded. Pending items have
    /// been submitted but not yet accepted, so they count as unresolved.
    pub fn can_create(&self) -> bool {
        !self.store.is_empty()
            && self
                .store
                .iter()
                .all(|item| item.status == UploadStatus::Success)
    }

    pub fn phase(&self) -> SessionPhase {
        if self
            .store
            .iter()
            .any(|item| item.status != UploadStatus::Success)
        {
            SessionPhase::Active
        } else {
            SessionPhase::Idle
        }
    }

    pub fn finalize(&self) -> Result<Vec<FinalizedItem>, CoreError> {
        if !self.can_create() {
            return Err(CoreError::NotReady);
        }
        Ok(self
            .store
            .iter()
            .filter_map(|item| {
                item.storage_url.clone().map(|storage_url| FinalizedItem {
                    order_index: item.order_index,
                    display_name: item.display_name.clone(),
                    storage_url,
                })
            })
            .collect())
    }

    /// Most recent item failure, cleared by a retry.
    pub fn last_error(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn last_batch(&self) -> Option<BatchSummary> {
        self.last_batch
    }

    /// Ends the session: cancels in-flight attempts, drops timers and releases previews.
    pub fn close(&mut self) {
        let items = self.store.clear();
        if items.is_empty() {
            return;
        }
        for item in &items {
            if let Some(transport_id) = self.registry.current(item.local_id)
                && item.status != UploadStatus::Success
            {
                self.transport.cancel(transport_id);
            }
            if !item.is_preview_only {
                self.previews.release(&item.preview_url);
            }
        }
        self.registry.clear();
        self.smoother.clear();
        self.retries.clear();
        info!(items = items.len(), "session closed");
    }

    fn submit_initial(&mut self, local_id: LocalId) {
        let Some(request) = self
            .store
            .get(local_id)
            .and_then(|item| item.source.clone().map(|bytes| submission(item, bytes, 0)))
        else {
            return;
        };

        match self.transport.submit(request) {
            Ok(transport_id) => {
                debug!(%local_id, %transport_id, "submitted");
                self.registry.register(local_id, transport_id.clone());
                self.set_status(
                    local_id,
                    UploadStatus::Pending,
                    ItemPatch {
                        transport_id: Some(Some(transport_id)),
                        ..ItemPatch::default()
                    },
                );
            }
            Err(err) => self.fail(
                local_id,
                CoreError::TransportSubmissionFailed {
                    local_id,
                    name: self.display_name(local_id),
                    reason: err.to_string(),
                },
            ),
        }
    }

    /// Runs one retry attempt: drop the stale identity, reset, submit anew, re-register and
    /// restart the display timer.
    fn resubmit(&mut self, local_id: LocalId, now: Instant) {
        self.release_attempt(local_id);

        let Some(item) = self.store.get(local_id) else {
            return;
        };
        let attempt = item.attempt + 1;
        let request = match RetryCoordinator::resubmission(item, attempt) {
            Ok(request) => request,
            Err(err) => {
                warn!(%local_id, "cannot resubmit: {err}");
                return;
            }
        };

        self.set_status(
            local_id,
            UploadStatus::Uploading,
            ItemPatch {
                progress_percent: Some(0),
                transport_id: Some(None),
                last_error: Some(None),
                attempt: Some(attempt),
                ..ItemPatch::default()
            },
        );

        match self.transport.submit(request) {
            Ok(transport_id) => {
                info!(%local_id, %transport_id, attempt, "resubmitted");
                self.registry.register(local_id, transport_id.clone());
                self.set_status(
                    local_id,
                    UploadStatus::Uploading,
                    ItemPatch {
                        transport_id: Some(Some(transport_id)),
                        ..ItemPatch::default()
                    },
                );
                self.smoother.start(local_id, now);
            }
            Err(err) => self.fail(
                local_id,
                CoreError::RetrySubmissionFailed {
                    local_id,
                    name: self.display_name(local_id),
                    reason: err.to_string(),
                },
            ),
        }
    }

    /// Unregisters the current attempt of `local_id` and tells the transport to drop it.
    fn release_attempt(&mut self, local_id: LocalId) {
        if let Some(stale) = self.registry.unregister(local_id) {
            debug!(%local_id, transport_id = %stale, "releasing stale attempt");
            self.transport.cancel(&stale);
        }
    }

    fn on_progress(&mut self, local_id: LocalId, bytes_sent: u64, bytes_total: u64, now: Instant) {
        if self.smoother.is_pending(local_id) || bytes_total == 0 {
            return;
        }
        if !self.smoother.is_started(local_id) {
            self.smoother.start(local_id, now);
        }
        let percent = (u128::from(bytes_sent.min(bytes_total)) * 100 / u128::from(bytes_total)) as u8;
        self.set_status(local_id, UploadStatus::Uploading, ItemPatch::progress(percent));
    }

    fn on_success(&mut self, local_id: LocalId, remote_url: &str, now: Instant) {
        let remote_url = match Url::parse(remote_url) {
            Ok(url) => url,
            Err(err) => {
                self.on_transfer_error(local_id, format!("invalid remote url {remote_url:?}: {err}"));
                return;
            }
        };

        match self.smoother.on_success(local_id, remote_url, now) {
            SuccessDecision::FinalizeNow(url) => self.finalize_item(local_id, url),
            SuccessDecision::Deferred { due } => {
                debug!(
                    %local_id,
                    hold_ms = due.saturating_duration_since(now).as_millis() as u64,
                    "holding success for minimum display time"
                );
                self.set_status(local_id, UploadStatus::Uploading, ItemPatch::progress(100));
            }
        }
    }

    fn on_transfer_error(&mut self, local_id: LocalId, reason: String) {
        let name = self.display_name(local_id);
        self.fail(local_id, CoreError::TransportTransferFailed { name, reason });
    }

    fn display_name(&self, local_id: LocalId) -> String {
        self.store
            .get(local_id)
            .map(|item| item.display_name.clone())
            .unwrap_or_default()
    }

    fn finalize_item(&mut self, local_id: LocalId, storage_url: Url) {
        info!(%local_id, %storage_url, "upload succeeded");
        self.set_status(
            local_id,
            UploadStatus::Success,
            ItemPatch {
                progress_percent: Some(100),
                storage_url: Some(storage_url),
                last_error: Some(None),
                release_source: true,
                ..ItemPatch::default()
            },
        );
    }

    fn fail(&mut self, local_id: LocalId, err: CoreError) {
        warn!(%local_id, "upload failed: {err}");
        self.smoother.cancel(local_id);
        let message = err.to_string();
        self.set_status(
            local_id,
            UploadStatus::Failed,
            ItemPatch {
                last_error: Some(Some(message.clone())),
                ..ItemPatch::default()
            },
        );
        self.banner = Some(message);
    }

    fn set_status(&mut self, local_id: LocalId, status: UploadStatus, patch: ItemPatch) {
        if let Err(err) = self.store.update_status(local_id, status, patch) {
            debug!(%local_id, ?status, "status update skipped: {err}");
        }
    }
}

impl<T: Transport, P: PreviewProvider> Drop for UploadSession<T, P> {
    fn drop(&mut self) {
        self.close();
    }
}
