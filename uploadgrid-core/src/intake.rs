use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{CoreError, DEFAULT_MAX_FILE_BYTES, RejectReason};

/// A user-selected file before it becomes an upload item.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl RawFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKind {
    Inline,
    /// Accepted, but shown with a static placeholder.
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakePolicy {
    /// Exact MIME types or `type/*` patterns.
    pub allowed_mime_types: Vec<String>,
    /// Extensions accepted regardless of MIME type, previewed with a placeholder.
    pub preview_only_extensions: Vec<String>,
    pub max_file_bytes: u64,
}

impl Default for IntakePolicy {
    fn default() -> Self {
        Self {
            allowed_mime_types: vec!["image/*".to_string()],
            preview_only_extensions: vec!["tif".to_string(), "tiff".to_string()],
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl IntakePolicy {
    pub fn check(&self, file: &RawFile) -> Result<PreviewKind, CoreError> {
        let reject = |reason| CoreError::IntakeRejected {
            name: file.name.clone(),
            reason,
        };

        let size = file.bytes.len() as u64;
        if size == 0 {
            return Err(reject(RejectReason::Empty));
        }
        if size > self.max_file_bytes {
            return Err(reject(RejectReason::TooLarge {
                size,
                max: self.max_file_bytes,
            }));
        }

        let preview_only = self.has_preview_only_extension(&file.name);
        let mime = file.mime_type.trim().to_ascii_lowercase();
        let allowed = self
            .allowed_mime_types
            .iter()
            .any(|pattern| mime_matches(pattern, &mime));
        if !allowed && !preview_only {
            return Err(reject(RejectReason::UnsupportedType {
                mime: file.mime_type.clone(),
            }));
        }

        // TIFF has no inline preview even when its MIME type is allowed.
        if preview_only || is_tiff(&mime) {
            Ok(PreviewKind::Placeholder)
        } else {
            Ok(PreviewKind::Inline)
        }
    }

    fn has_preview_only_extension(&self, name: &str) -> bool {
        let Some((_, ext)) = name.rsplit_once('.') else {
            return false;
        };
        self.preview_only_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }
}

fn is_tiff(mime: &str) -> bool {
    mime == "image/tiff"
}

fn mime_matches(pattern: &str, mime: &str) -> bool {
    let pattern = pattern.trim().to_ascii_lowercase();
    match pattern.strip_suffix("/*") {
        Some(top_level) => mime
            .split_once('/')
            .is_some_and(|(kind, subtype)| kind == top_level && !subtype.is_empty()),
        None => pattern == mime,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, mime: &str, len: usize) -> RawFile {
        RawFile::new(name, mime, vec![1_u8; len])
    }

    #[test]
    fn accepts_images_inline() {
        let policy = IntakePolicy::default();
        assert_eq!(
            policy.check(&file("a.jpg", "image/jpeg", 8)).unwrap(),
            PreviewKind::Inline
        );
        assert_eq!(
            policy.check(&file("a.webp", "IMAGE/WEBP", 8)).unwrap(),
            PreviewKind::Inline
        );
    }

    #[test]
    fn tiff_is_accepted_with_placeholder() {
        let policy = IntakePolicy::default();
        assert_eq!(
            policy.check(&file("scan.TIF", "", 8)).unwrap(),
            PreviewKind::Placeholder
        );
        assert_eq!(
            policy.check(&file("scan", "image/tiff", 8)).unwrap(),
            PreviewKind::Placeholder
        );
    }

    #[test]
    fn rejects_non_images_and_bad_sizes() {
        let policy = IntakePolicy {
            max_file_bytes: 16,
            ..IntakePolicy::default()
        };
        assert!(matches!(
            policy.check(&file("notes.txt", "text/plain", 8)),
            Err(CoreError::IntakeRejected {
                reason: RejectReason::UnsupportedType { .. },
                ..
            })
        ));
        assert!(matches!(
            policy.check(&file("big.png", "image/png", 17)),
            Err(CoreError::IntakeRejected {
                reason: RejectReason::TooLarge { size: 17, max: 16 },
                ..
            })
        ));
        assert!(matches!(
            policy.check(&file("empty.png", "image/png", 0)),
            Err(CoreError::IntakeRejected {
                reason: RejectReason::Empty,
                ..
            })
        ));
    }

    #[test]
    fn exact_mime_patterns_do_not_match_siblings() {
        let policy = IntakePolicy {
            allowed_mime_types: vec!["image/png".to_string()],
            ..IntakePolicy::default()
        };
        assert!(policy.check(&file("a.png", "image/png", 1)).is_ok());
        assert!(policy.check(&file("a.gif", "image/gif", 1)).is_err());
    }

    #[test]
    fn narrowed_policy_rejects_tiff_mime() {
        let policy = IntakePolicy {
            allowed_mime_types: vec!["image/png".to_string()],
            preview_only_extensions: Vec::new(),
            ..IntakePolicy::default()
        };
        assert!(matches!(
            policy.check(&file("scan.bin", "image/tiff", 8)),
            Err(CoreError::IntakeRejected {
                reason: RejectReason::UnsupportedType { .. },
                ..
            })
        ));
        assert!(policy.check(&file("scan.tif", "", 8)).is_err());
    }
}
