use crate::domain::model::PageCursor;
use serde_json::Value;

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Offset pagination driven by the envelope's `has_more` flag.
#[derive(Debug, Clone)]
pub struct OffsetPaginator {
    page_size: u32,
    offset: u64,
    finished: bool,
}

impl OffsetPaginator {
    pub fn new(configured_limit: Option<u32>) -> Self {
        let page_size = configured_limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        Self {
            page_size,
            offset: 0,
            finished: false,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn cursor(&self) -> PageCursor {
        PageCursor {
            offset: self.offset,
            limit: self.page_size,
        }
    }

    /// Advances past the page just consumed. `None` once the server stops reporting `has_more`.
    pub fn next_cursor(&mut self, response_body: &Value) -> Option<PageCursor> {
        if self.finished {
            return None;
        }

        let has_more = response_body
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if !has_more {
            self.finished = true;
            return None;
        }

        self.offset += u64::from(self.page_size);
        Some(self.cursor())
    }

    /// Marks the stream exhausted regardless of the last envelope (e.g. an empty page).
    pub fn finish(&mut self) {
        self.finished = true;
    }
}
