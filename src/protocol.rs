//! Serde models for the engine's REST response envelopes.
//!
//! The client defines no wire format of its own; these structs mirror the
//! engine's schema for get/index/delete/bulk/search/scroll responses and
//! its structured error body.

use serde::Deserialize;
use serde_json::Value;

use crate::error::CallunaError;

#[derive(Debug, Deserialize)]
pub(crate) struct GetDocResponse {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub found: bool,
    #[serde(rename = "_seq_no", default)]
    pub seq_no: Option<u64>,
    #[serde(rename = "_primary_term", default)]
    pub primary_term: Option<u64>,
    #[serde(rename = "_source", default)]
    pub source: Option<Value>,
}

/// Envelope shared by index and delete acknowledgements.
#[derive(Debug, Deserialize)]
pub(crate) struct WriteResponse {
    #[serde(rename = "_id")]
    pub id: String,
    pub result: String,
    #[serde(rename = "_seq_no")]
    pub seq_no: u64,
    #[serde(rename = "_primary_term")]
    pub primary_term: u64,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct ErrorCause {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<ErrorCause>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BulkResponse {
    #[serde(default)]
    pub errors: bool,
    pub items: Vec<BulkItemEnvelope>,
}

/// Each bulk item is keyed by the action that produced it.
#[derive(Debug, Deserialize)]
pub(crate) struct BulkItemEnvelope {
    #[serde(default)]
    index: Option<BulkItemResponse>,
    #[serde(default)]
    create: Option<BulkItemResponse>,
    #[serde(default)]
    update: Option<BulkItemResponse>,
    #[serde(default)]
    delete: Option<BulkItemResponse>,
}

impl BulkItemEnvelope {
    pub fn into_inner(self) -> Option<BulkItemResponse> {
        self.index.or(self.create).or(self.update).or(self.delete)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct BulkItemResponse {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub error: Option<ErrorCause>,
    #[serde(rename = "_seq_no", default)]
    pub seq_no: Option<u64>,
    #[serde(rename = "_primary_term", default)]
    pub primary_term: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(rename = "_scroll_id", default)]
    pub scroll_id: Option<String>,
    pub hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HitsEnvelope {
    #[serde(default)]
    pub total: Option<TotalHits>,
    #[serde(default)]
    pub hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TotalHits {
    pub value: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Hit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_seq_no", default)]
    pub seq_no: Option<u64>,
    #[serde(rename = "_primary_term", default)]
    pub primary_term: Option<u64>,
    #[serde(rename = "_source", default)]
    pub source: Option<Value>,
}

/// Map a non-success engine response to a typed error.
///
/// `id` names the document the request addressed, when it addressed one;
/// 404/409 only translate to the recoverable variants for document-level
/// requests.
pub(crate) fn decode_error(status: u16, body: &[u8], id: Option<&str>) -> CallunaError {
    let cause = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_default();
    let reason = if cause.reason.is_empty() {
        String::from_utf8_lossy(body).into_owned()
    } else {
        cause.reason
    };

    match (status, id) {
        (404, Some(id)) => CallunaError::not_found(id),
        (409, Some(id)) => CallunaError::version_conflict(id, reason),
        _ if cause.kind == "version_conflict_engine_exception" => {
            CallunaError::version_conflict(id.unwrap_or_default(), reason)
        }
        _ => CallunaError::engine(status, cause.kind, reason),
    }
}
