use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
pub mod intake;
pub mod item;
pub mod order;
pub mod preview;
pub mod registry;
pub mod retry;
pub mod session;
pub mod smoother;
pub mod store;
pub mod transport;

pub use config::SessionConfig;
pub use intake::{IntakePolicy, RawFile};
pub use item::{FinalizedItem, ItemPatch, ItemView, UploadItem, UploadStatus};
pub use preview::{ObjectUrlPreviews, PreviewProvider};
pub use registry::IdentityRegistry;
pub use retry::RetryCoordinator;
pub use session::{BatchSummary, IntakeReport, SessionPhase, UploadSession};
pub use smoother::{ProgressSmoother, SuccessDecision};
pub use store::ItemStore;
pub use transport::{SubmitRequest, Transport, TransportEvent};

pub const DEFAULT_MIN_DISPLAY_MS: u64 = 1000;
pub const DEFAULT_RETRY_STAGGER_MS: u64 = 300;
pub const DEFAULT_MAX_FILE_BYTES: u64 = 100 * 1024 * 1024;
pub const PLACEHOLDER_PREVIEW_URL: &str = "static:placeholder/tiff";

pub const META_NAME: &str = "name";
pub const META_CONTENT_TYPE: &str = "contentType";
pub const META_LOCAL_ID: &str = "localId";
pub const META_ATTEMPT: &str = "attempt";

pub type TransportId = String;

/// Session-local identity of an upload item. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(u64);

impl LocalId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("type {mime:?} is not an accepted image type")]
    UnsupportedType { mime: String },
    #[error("file too large ({size} bytes); limit is {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("file is empty")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport rejected submission: {0}")]
    Rejected(String),
    #[error("transport cannot resume a failed attempt")]
    ResumeUnsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("file {name} rejected: {reason}")]
    IntakeRejected { name: String, reason: RejectReason },
    #[error("upload of {name} failed: {reason}")]
    TransportSubmissionFailed {
        local_id: LocalId,
        name: String,
        reason: String,
    },
    #[error("upload of {name} failed: {reason}")]
    TransportTransferFailed { name: String, reason: String },
    #[error("no item is registered for transport id {transport_id}")]
    IdentityInconsistency { transport_id: TransportId },
    #[error("upload of {name} failed: resubmission rejected: {reason}")]
    RetrySubmissionFailed {
        local_id: LocalId,
        name: String,
        reason: String,
    },
    #[error("index {index} out of range for {len} items")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("unknown item {0}")]
    UnknownItem(LocalId),
    #[error("item {local_id} is {status:?} and cannot be retried")]
    NotRetryable {
        local_id: LocalId,
        status: UploadStatus,
    },
    #[error("batch is not ready to finalize")]
    NotReady,
    #[error("config error: {0}")]
    Config(String),
}
