use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{TransportError, TransportId};

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
    pub metadata: BTreeMap<String, String>,
}

/// Chunked, resumable upload backend. Lifecycle is reported back as [`TransportEvent`]s.
pub trait Transport {
    /// Starts a new upload entity. A synchronous error means nothing was sent.
    fn submit(&mut self, request: SubmitRequest) -> Result<TransportId, TransportError>;

    fn cancel(&mut self, transport_id: &str);

    /// Resumes a failed attempt under its own identity.
    fn retry(&mut self, _transport_id: &str) -> Result<(), TransportError> {
        Err(TransportError::ResumeUnsupported)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransportEvent {
    Accepted {
        transport_id: TransportId,
        size_bytes: u64,
    },
    Progress {
        transport_id: TransportId,
        bytes_sent: u64,
        bytes_total: u64,
    },
    Success {
        transport_id: TransportId,
        remote_url: String,
    },
    Error {
        transport_id: TransportId,
        reason: String,
    },
    BatchComplete {
        succeeded: usize,
        failed: usize,
    },
}

impl TransportEvent {
    pub fn transport_id(&self) -> Option<&str> {
        match self {
            TransportEvent::Accepted { transport_id, .. }
            | TransportEvent::Progress { transport_id, .. }
            | TransportEvent::Success { transport_id, .. }
            | TransportEvent::Error { transport_id, .. } => Some(transport_id),
            TransportEvent::BatchComplete { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json_is_tagged() {
        let event = TransportEvent::Error {
            transport_id: "tus-1".to_string(),
            reason: "503".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Error");
        assert_eq!(json["data"]["transport_id"], "tus-1");
        let back: TransportEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.transport_id(), Some("tus-1"));
    }
}
