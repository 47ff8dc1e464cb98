use std::collections::HashSet;

use bytes::Bytes;

/// Mints and releases display resources for item previews.
pub trait PreviewProvider {
    fn create(&mut self, name: &str, mime_type: &str, bytes: &Bytes) -> String;
    fn release(&mut self, preview_url: &str);
}

/// In-memory object-URL registry. Tracks which previews are still live.
#[derive(Debug, Default)]
pub struct ObjectUrlPreviews {
    next: u64,
    live: HashSet<String>,
}

impl ObjectUrlPreviews {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, preview_url: &str) -> bool {
        self.live.contains(preview_url)
    }
}

impl PreviewProvider for ObjectUrlPreviews {
    fn create(&mut self, _name: &str, _mime_type: &str, _bytes: &Bytes) -> String {
        self.next += 1;
        let url = format!("blob:uploadgrid/{}", self.next);
        self.live.insert(url.clone());
        url
    }

    fn release(&mut self, preview_url: &str) {
        self.live.remove(preview_url);
    }
}
