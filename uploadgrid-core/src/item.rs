use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{LocalId, TransportId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Success,
    Failed,
    Retrying,
}

impl UploadStatus {
    /// Pending, Uploading and Retrying items still expect transport activity.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            UploadStatus::Pending | UploadStatus::Uploading | UploadStatus::Retrying
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub local_id: LocalId,
    pub transport_id: Option<TransportId>,
    pub display_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Raw payload. Dropped once the item reaches Success.
    pub source: Option<Bytes>,
    pub preview_url: String,
    pub is_preview_only: bool,
    pub storage_url: Option<Url>,
    pub status: UploadStatus,
    pub progress_percent: u8,
    pub order_index: usize,
    /// Number of resubmissions issued so far.
    pub attempt: u32,
    pub last_error: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl UploadItem {
    pub fn view(&self) -> ItemView {
        ItemView {
            local_id: self.local_id,
            display_name: self.display_name.clone(),
            preview_url: self.preview_url.clone(),
            is_preview_only: self.is_preview_only,
            status: self.status,
            progress_percent: self.progress_percent,
            order_index: self.order_index,
            error: self.last_error.clone(),
        }
    }
}

/// Read-only projection handed to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemView {
    pub local_id: LocalId,
    pub display_name: String,
    pub preview_url: String,
    pub is_preview_only: bool,
    pub status: UploadStatus,
    pub progress_percent: u8,
    pub order_index: usize,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedItem {
    pub order_index: usize,
    pub display_name: String,
    pub storage_url: Url,
}

/// Field updates applied together with a status change. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub progress_percent: Option<u8>,
    pub transport_id: Option<Option<TransportId>>,
    pub storage_url: Option<Url>,
    pub last_error: Option<Option<String>>,
    pub attempt: Option<u32>,
    pub metadata: Vec<(String, String)>,
    pub release_source: bool,
}

impl ItemPatch {
    pub fn progress(percent: u8) -> Self {
        Self {
            progress_percent: Some(percent),
            ..Self::default()
        }
    }

    pub(crate) fn apply(self, item: &mut UploadItem) {
        if let Some(percent) = self.progress_percent {
            item.progress_percent = percent.min(100);
        }
        if let Some(transport_id) = self.transport_id {
            item.transport_id = transport_id;
        }
        if let Some(url) = self.storage_url {
            item.storage_url = Some(url);
        }
        if let Some(last_error) = self.last_error {
            item.last_error = last_error;
        }
        if let Some(attempt) = self.attempt {
            item.attempt = attempt;
        }
        item.metadata.extend(self.metadata);
        if self.release_source {
            item.source = None;
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_item(raw_id: u64, name: &str) -> UploadItem {
    UploadItem {
        local_id: LocalId::new(raw_id),
        transport_id: None,
        display_name: name.to_string(),
        mime_type: "image/png".to_string(),
        size_bytes: 4,
        source: Some(Bytes::from_static(b"\x89PNG")),
        preview_url: format!("blob:test/{raw_id}"),
        is_preview_only: false,
        storage_url: None,
        status: UploadStatus::Pending,
        progress_percent: 0,
        order_index: 0,
        attempt: 0,
        last_error: None,
        metadata: BTreeMap::new(),
    }
}
