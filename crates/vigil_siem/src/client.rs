//! SIEM store client (spec.md §4.7), grounded on the `elasticsearch` crate
//! connection setup used for the vector store client in the example pack:
//! a `SingleNodeConnectionPool` + `TransportBuilder` feeding one shared
//! `Elasticsearch` handle, with every store call going through `send()`/
//! `status_code()`/`.json()` and mapping transport/non-2xx failures into
//! our own error type rather than leaking `elasticsearch::Error`.

use crate::error::SiemError;
use crate::pagination::{OffsetPage, Page, PageMeta};
use crate::query::{AggSpec, Query};
use elasticsearch::auth::Credentials;
use elasticsearch::http::transport::{SingleNodeConnectionPool, Transport, TransportBuilder};
use elasticsearch::indices::IndicesGetParts;
use elasticsearch::{Elasticsearch, IndexParts, SearchParts};
use serde_json::{json, Value};
use vigil_domain::{Event, EventId, StreamCursor};

pub struct SiemClient {
    client: Elasticsearch,
}

impl SiemClient {
    pub fn new(url: &str) -> Result<Self, SiemError> {
        Self::with_credentials(url, None)
    }

    /// Same as `new`, with HTTP basic auth set on the transport when
    /// `credentials` is `Some((username, password))` (spec.md §4.7
    /// `SiemStoreConfig`).
    pub fn with_credentials(url: &str, credentials: Option<(String, String)>) -> Result<Self, SiemError> {
        let parsed = url.parse().map_err(|e| SiemError::Transport(format!("invalid store URL '{url}': {e}")))?;
        let pool = SingleNodeConnectionPool::new(parsed);
        let mut builder = TransportBuilder::new(pool);
        if let Some((username, password)) = credentials {
            builder = builder.auth(Credentials::Basic(username, password));
        }
        let transport: Transport = builder.build().map_err(|e| SiemError::Transport(e.to_string()))?;
        Ok(Self { client: Elasticsearch::new(transport) })
    }

    /// `list_indices(pattern)` (spec.md §4.7): concrete index names matching
    /// a glob pattern, used by index-pattern discovery.
    pub async fn list_indices(&self, pattern: &str) -> Result<Vec<String>, SiemError> {
        let response = self
            .client
            .indices()
            .get(IndicesGetParts::Index(&[pattern]))
            .send()
            .await
            .map_err(|e| SiemError::Transport(e.to_string()))?;

        if !response.status_code().is_success() {
            if response.status_code().as_u16() == 404 {
                return Ok(vec![]);
            }
            return Err(store_error(response.status_code().as_u16(), "list_indices"));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SiemError::Deserialize(e.to_string()))?;
        let names = body
            .as_object()
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default();
        Ok(names)
    }

    /// `mapping(index)` (spec.md §4.7): the field mapping for a concrete
    /// index, used by tools surfacing the data dictionary.
    pub async fn mapping(&self, index: &str) -> Result<Value, SiemError> {
        let response = self
            .client
            .indices()
            .get_mapping(elasticsearch::indices::IndicesGetMappingParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| SiemError::Transport(e.to_string()))?;

        if !response.status_code().is_success() {
            return Err(store_error(response.status_code().as_u16(), "mapping"));
        }

        response.json().await.map_err(|e| SiemError::Deserialize(e.to_string()))
    }

    /// Offset-paginated `search` (spec.md §4.7: `from`+`size`, default
    /// size=100, max size=1000).
    pub async fn search_offset(
        &self,
        indices: &[String],
        query: &Query,
        page: OffsetPage,
    ) -> Result<(Vec<Event>, Page), SiemError> {
        let index_refs: Vec<&str> = indices.iter().map(String::as_str).collect();
        let body = json!({
            "query": query.to_json(),
            "from": page.from,
            "size": page.size,
            "sort": [{ "@timestamp": "desc" }, { "_id": "desc" }],
        });

        let response = self
            .client
            .search(SearchParts::Index(&index_refs))
            .body(body)
            .send()
            .await
            .map_err(|e| SiemError::Transport(e.to_string()))?;

        if !response.status_code().is_success() {
            return Err(store_error(response.status_code().as_u16(), "search"));
        }

        let raw: Value = response.json().await.map_err(|e| SiemError::Deserialize(e.to_string()))?;
        let total = raw["hits"]["total"]["value"].as_u64().unwrap_or(0);
        let hits = parse_hits(&raw)?;
        let returned = hits.len();
        Ok((hits, Page::Offset(PageMeta { total, returned })))
    }

    /// Cursor-paginated `search` (spec.md §4.7: composite sort
    /// timestamp desc + document id desc, sort-after semantics).
    pub async fn search_cursor(
        &self,
        indices: &[String],
        query: &Query,
        size: u32,
        after: Option<&StreamCursor>,
    ) -> Result<(Vec<Event>, Page), SiemError> {
        self.search_cursor_sorted(indices, query, size, after, SortDirection::Desc).await
    }

    /// Same cursor pagination, but ordered (timestamp asc, id asc) — the
    /// sort the query engine's session-context streaming reads in (spec.md
    /// §4.8 step 1), distinct from the descending order normal cursor
    /// pagination uses.
    pub async fn search_cursor_ascending(
        &self,
        indices: &[String],
        query: &Query,
        size: u32,
        after: Option<&StreamCursor>,
    ) -> Result<(Vec<Event>, Page), SiemError> {
        self.search_cursor_sorted(indices, query, size, after, SortDirection::Asc).await
    }

    async fn search_cursor_sorted(
        &self,
        indices: &[String],
        query: &Query,
        size: u32,
        after: Option<&StreamCursor>,
        direction: SortDirection,
    ) -> Result<(Vec<Event>, Page), SiemError> {
        let index_refs: Vec<&str> = indices.iter().map(String::as_str).collect();
        let order = direction.as_str();
        let mut body = json!({
            "query": query.to_json(),
            "size": size.clamp(1, crate::pagination::MAX_PAGE_SIZE),
            "sort": [{ "@timestamp": order }, { "_id": order }],
        });
        if let Some(cursor) = after {
            body["search_after"] = json!([cursor.last_timestamp_ms, cursor.last_document_id]);
        }

        let response = self
            .client
            .search(SearchParts::Index(&index_refs))
            .body(body)
            .send()
            .await
            .map_err(|e| SiemError::Transport(e.to_string()))?;

        if !response.status_code().is_success() {
            return Err(store_error(response.status_code().as_u16(), "search"));
        }

        let raw: Value = response.json().await.map_err(|e| SiemError::Deserialize(e.to_string()))?;
        let hits = parse_hits(&raw)?;
        let next_cursor = hits.last().map(|e| StreamCursor::new(e.timestamp.timestamp_millis(), e.id.document_id.clone()));
        Ok((hits, Page::Cursor { next_cursor }))
    }

    /// Index a single document into `index`, auto-generating its id. Used
    /// by the threat-intel orchestrator's enrichment write-back (spec.md
    /// §4.10) and by the correlator's timeline persistence.
    pub async fn index_document(&self, index: &str, document: &Value) -> Result<(), SiemError> {
        let response = self
            .client
            .index(IndexParts::Index(index))
            .body(document)
            .send()
            .await
            .map_err(|e| SiemError::Transport(e.to_string()))?;

        if !response.status_code().is_success() {
            return Err(store_error(response.status_code().as_u16(), "index_document"));
        }
        Ok(())
    }

    /// `aggregate(indices, agg_spec)` (spec.md §4.7).
    pub async fn aggregate(&self, indices: &[String], query: &Query, agg: &AggSpec) -> Result<Value, SiemError> {
        let index_refs: Vec<&str> = indices.iter().map(String::as_str).collect();
        let body = json!({
            "query": query.to_json(),
            "size": 0,
            "aggs": agg.to_json(),
        });

        let response = self
            .client
            .search(SearchParts::Index(&index_refs))
            .body(body)
            .send()
            .await
            .map_err(|e| SiemError::Transport(e.to_string()))?;

        if !response.status_code().is_success() {
            return Err(store_error(response.status_code().as_u16(), "aggregate"));
        }

        let raw: Value = response.json().await.map_err(|e| SiemError::Deserialize(e.to_string()))?;
        Ok(raw["aggregations"].clone())
    }
}

#[derive(Debug, Clone, Copy)]
enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

fn store_error(status: u16, op: &str) -> SiemError {
    SiemError::StoreResponse(format!("{op} failed with status {status}"))
}

fn parse_hits(raw: &Value) -> Result<Vec<Event>, SiemError> {
    let hits = raw["hits"]["hits"].as_array().cloned().unwrap_or_default();
    hits.iter()
        .map(|hit| {
            let index = hit["_index"].as_str().unwrap_or_default().to_string();
            let document_id = hit["_id"].as_str().unwrap_or_default().to_string();
            let mut source = hit["_source"].clone();
            let source_obj = source.as_object_mut().ok_or_else(|| {
                SiemError::Deserialize(format!("document {document_id} has non-object _source"))
            })?;

            let timestamp = source_obj
                .remove("@timestamp")
                .and_then(|v| v.as_str().map(str::to_string))
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(chrono::Utc::now);
            let source_ip = source_obj.remove("source_ip").and_then(|v| v.as_str().and_then(|s| s.parse().ok()));
            let destination_ip =
                source_obj.remove("destination_ip").and_then(|v| v.as_str().and_then(|s| s.parse().ok()));
            let destination_port =
                source_obj.remove("destination_port").and_then(|v| v.as_u64()).map(|p| p as u16);
            let category = source_obj.remove("category").and_then(|v| v.as_str().map(str::to_string));
            let technique = source_obj.remove("technique").and_then(|v| v.as_str().map(str::to_string));
            let tactic = source_obj.remove("tactic").and_then(|v| v.as_str().map(str::to_string));

            Ok(Event {
                id: EventId { index, document_id },
                timestamp,
                source_ip,
                destination_ip,
                destination_port,
                category,
                technique,
                tactic,
                fields: source_obj.clone(),
            })
        })
        .collect()
}
