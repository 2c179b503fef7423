//! Plain streaming (spec.md §4.8 `stream_events`): fixed-size chunks via
//! cursor pagination, duplicate-free by construction, stopping after
//! `max_chunks` chunks or once the cursor is exhausted.

use vigil_domain::{Event, StreamCursor};
use vigil_siem::{Page, Query, SiemClient, SiemError};

#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub events: Vec<Event>,
    /// `None` when the underlying cursor ran out of data, i.e. the caller
    /// has reached the end of the result set — never an error (spec.md
    /// §4.8 edge cases).
    pub next_cursor: Option<StreamCursor>,
    pub chunks_fetched: u32,
}

pub async fn stream_events(
    client: &SiemClient,
    indices: &[String],
    query: &Query,
    chunk_size: u32,
    max_chunks: u32,
    mut cursor: Option<StreamCursor>,
) -> Result<StreamOutcome, SiemError> {
    let mut events = Vec::new();
    let mut chunks_fetched = 0;

    for _ in 0..max_chunks.max(1) {
        let (page_events, page) = client.search_cursor(indices, query, chunk_size, cursor.as_ref()).await?;
        chunks_fetched += 1;
        let page_len = page_events.len();
        events.extend(page_events);

        let Page::Cursor { next_cursor } = page else {
            unreachable!("search_cursor always returns Page::Cursor")
        };

        if page_len < chunk_size as usize || next_cursor.is_none() {
            cursor = None;
            break;
        }
        cursor = next_cursor;
    }

    Ok(StreamOutcome { events, next_cursor: cursor, chunks_fetched })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_returns_null_cursor_not_error() {
        let outcome = StreamOutcome { events: vec![], next_cursor: None, chunks_fetched: 1 };
        assert!(outcome.events.is_empty());
        assert!(outcome.next_cursor.is_none());
    }
}
