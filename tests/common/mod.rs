//! In-memory engine used by the integration tests.
//!
//! Implements the transport seam closely enough to exercise version
//! conflicts, bulk semantics and scroll pagination without a live
//! server: realtime gets, refresh-gated search visibility, conditional
//! writes on (seq_no, primary_term), NDJSON bulk requests, and scroll
//! cursors with explicit release.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use calluna::{EngineRequest, EngineResponse, Method, Result, Transport};

/// The document shape most tests store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestModel {
    pub message: String,
    #[serde(default)]
    pub amount: i64,
}

impl TestModel {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            amount: 42,
        }
    }
}

const DEFAULT_SIZE: usize = 10;

#[derive(Debug, Clone)]
struct StoredDoc {
    source: Value,
    seq_no: u64,
    primary_term: u64,
    /// Search visibility; flipped by `_refresh`. Gets are realtime.
    visible: bool,
}

#[derive(Debug)]
struct ScrollState {
    hits: Vec<Value>,
    cursor: usize,
    page_size: usize,
}

#[derive(Debug, Default)]
struct EngineState {
    indices: HashMap<String, BTreeMap<String, StoredDoc>>,
    scrolls: HashMap<String, ScrollState>,
    next_seq_no: u64,
    next_scroll: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryEngine {
    state: Mutex<EngineState>,
}

impl InMemoryEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of scroll cursors the engine currently keeps alive.
    pub fn live_scrolls(&self) -> usize {
        self.state.lock().scrolls.len()
    }

    /// Number of stored documents, visible or not.
    pub fn doc_count(&self, index: &str) -> usize {
        self.state
            .lock()
            .indices
            .get(index)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Transport for InMemoryEngine {
    async fn execute(&self, request: EngineRequest) -> Result<EngineResponse> {
        // Yield once per request so concurrent callers interleave the way
        // they would across a real network hop.
        tokio::task::yield_now().await;

        let path = request.path.trim_start_matches('/').to_string();
        let segments: Vec<&str> = path.split('/').collect();
        let mut state = self.state.lock();

        let response = match (request.method, segments.as_slice()) {
            (Method::Get, [index, "_doc", id]) => get_doc(&state, index, id),
            (Method::Put, [index, "_doc", id]) => put_doc(&mut state, index, id, false, &request),
            (Method::Put, [index, "_create", id]) => put_doc(&mut state, index, id, true, &request),
            (Method::Delete, [index, "_doc", id]) => delete_doc(&mut state, index, id),
            (Method::Post, [index, "_bulk"]) => bulk(&mut state, index, &request),
            (Method::Post, ["_search", "scroll"]) => scroll_continue(&mut state, &request),
            (Method::Delete, ["_search", "scroll"]) => scroll_release(&mut state, &request),
            (Method::Post, [index, "_search"]) => search(&mut state, index, &request),
            (Method::Post, [index, "_refresh"]) => refresh(&mut state, index),
            (Method::Put, [index]) => create_index(&mut state, index),
            (Method::Delete, [index]) => drop_index(&mut state, index),
            _ => EngineResponse::new(
                400,
                error_body(
                    "unsupported_operation_exception",
                    &format!("no route for {:?} /{path}", request.method),
                ),
            ),
        };
        Ok(response)
    }
}

fn body_json(body: &Value) -> Vec<u8> {
    serde_json::to_vec(body).unwrap()
}

fn error_body(kind: &str, reason: &str) -> Vec<u8> {
    body_json(&json!({"error": {"type": kind, "reason": reason}}))
}

fn get_doc(state: &EngineState, index: &str, id: &str) -> EngineResponse {
    match state.indices.get(index).and_then(|docs| docs.get(id)) {
        Some(doc) => EngineResponse::new(
            200,
            body_json(&json!({
                "_index": index,
                "_id": id,
                "found": true,
                "_seq_no": doc.seq_no,
                "_primary_term": doc.primary_term,
                "_source": doc.source,
            })),
        ),
        None => EngineResponse::new(
            404,
            body_json(&json!({"_index": index, "_id": id, "found": false})),
        ),
    }
}

fn put_doc(
    state: &mut EngineState,
    index: &str,
    id: &str,
    create: bool,
    request: &EngineRequest,
) -> EngineResponse {
    let source: Value = match request.body.as_deref().map(serde_json::from_slice) {
        Some(Ok(value)) => value,
        _ => {
            return EngineResponse::new(
                400,
                error_body("mapper_parsing_exception", "request body is not JSON"),
            );
        }
    };
    let expected = match (request.param("if_seq_no"), request.param("if_primary_term")) {
        (Some(seq_no), Some(primary_term)) => Some((
            seq_no.parse::<u64>().unwrap(),
            primary_term.parse::<u64>().unwrap(),
        )),
        _ => None,
    };

    match write_doc(state, index, id, source, create, expected) {
        Ok((result, seq_no, primary_term)) => {
            let status = if result == "created" { 201 } else { 200 };
            EngineResponse::new(
                status,
                body_json(&json!({
                    "_index": index,
                    "_id": id,
                    "result": result,
                    "_seq_no": seq_no,
                    "_primary_term": primary_term,
                })),
            )
        }
        Err(reason) => EngineResponse::new(
            409,
            error_body("version_conflict_engine_exception", &reason),
        ),
    }
}

fn write_doc(
    state: &mut EngineState,
    index: &str,
    id: &str,
    source: Value,
    create: bool,
    expected: Option<(u64, u64)>,
) -> std::result::Result<(&'static str, u64, u64), String> {
    let seq_no = state.next_seq_no;
    let docs = state.indices.entry(index.to_string()).or_default();
    let existing = docs.get(id);

    if create && existing.is_some() {
        return Err(format!("[{id}]: version conflict, document already exists"));
    }
    if let Some((expected_seq_no, expected_primary_term)) = expected {
        match existing {
            Some(doc) if doc.seq_no == expected_seq_no && doc.primary_term == expected_primary_term => {}
            Some(doc) => {
                return Err(format!(
                    "[{id}]: version conflict, required seqNo [{expected_seq_no}], current [{}]",
                    doc.seq_no
                ));
            }
            None => return Err(format!("[{id}]: version conflict, document does not exist")),
        }
    }

    let result = if existing.is_some() { "updated" } else { "created" };
    docs.insert(
        id.to_string(),
        StoredDoc {
            source,
            seq_no,
            primary_term: 1,
            visible: false,
        },
    );
    state.next_seq_no += 1;
    Ok((result, seq_no, 1))
}

fn delete_doc(state: &mut EngineState, index: &str, id: &str) -> EngineResponse {
    let seq_no = state.next_seq_no;
    let removed = state
        .indices
        .get_mut(index)
        .and_then(|docs| docs.remove(id))
        .is_some();
    if !removed {
        return EngineResponse::new(
            404,
            body_json(&json!({
                "_index": index,
                "_id": id,
                "result": "not_found",
                "_seq_no": seq_no,
                "_primary_term": 1,
            })),
        );
    }
    state.next_seq_no += 1;
    EngineResponse::new(
        200,
        body_json(&json!({
            "_index": index,
            "_id": id,
            "result": "deleted",
            "_seq_no": seq_no,
            "_primary_term": 1,
        })),
    )
}

fn bulk(state: &mut EngineState, index: &str, request: &EngineRequest) -> EngineResponse {
    let body = match request.body.as_deref() {
        Some(body) => body,
        None => return EngineResponse::new(400, error_body("parse_exception", "empty bulk body")),
    };
    let mut lines = body
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_slice::<Value>(line));

    let mut items = Vec::new();
    let mut errors = false;
    while let Some(action) = lines.next() {
        let Ok(action) = action else {
            return EngineResponse::new(400, error_body("parse_exception", "malformed bulk line"));
        };
        let Some((verb, meta)) = action.as_object().and_then(|a| a.iter().next()) else {
            return EngineResponse::new(400, error_body("parse_exception", "malformed bulk action"));
        };
        let verb = verb.clone();
        let id = meta["_id"].as_str().unwrap_or_default().to_string();
        let expected = match (meta.get("if_seq_no"), meta.get("if_primary_term")) {
            (Some(seq_no), Some(primary_term)) => {
                Some((seq_no.as_u64().unwrap(), primary_term.as_u64().unwrap()))
            }
            _ => None,
        };

        let item = match verb.as_str() {
            "index" | "create" => {
                let Some(Ok(source)) = lines.next() else {
                    return EngineResponse::new(
                        400,
                        error_body("parse_exception", "bulk action is missing its document"),
                    );
                };
                match write_doc(state, index, &id, source, verb == "create", expected) {
                    Ok((result, seq_no, primary_term)) => json!({
                        "_id": id,
                        "status": if result == "created" { 201 } else { 200 },
                        "result": result,
                        "_seq_no": seq_no,
                        "_primary_term": primary_term,
                    }),
                    Err(reason) => {
                        errors = true;
                        json!({
                            "_id": id,
                            "status": 409,
                            "error": {"type": "version_conflict_engine_exception", "reason": reason},
                        })
                    }
                }
            }
            "delete" => {
                let removed = state
                    .indices
                    .get_mut(index)
                    .and_then(|docs| docs.remove(&id))
                    .is_some();
                if removed {
                    let seq_no = state.next_seq_no;
                    state.next_seq_no += 1;
                    json!({
                        "_id": id,
                        "status": 200,
                        "result": "deleted",
                        "_seq_no": seq_no,
                        "_primary_term": 1,
                    })
                } else {
                    errors = true;
                    json!({
                        "_id": id,
                        "status": 404,
                        "result": "not_found",
                    })
                }
            }
            other => {
                return EngineResponse::new(
                    400,
                    error_body("parse_exception", &format!("unknown bulk action '{other}'")),
                );
            }
        };
        let mut envelope = serde_json::Map::new();
        envelope.insert(verb, item);
        items.push(Value::Object(envelope));
    }

    EngineResponse::new(200, body_json(&json!({"errors": errors, "items": items})))
}

fn search(state: &mut EngineState, index: &str, request: &EngineRequest) -> EngineResponse {
    if !state.indices.contains_key(index) {
        return EngineResponse::new(
            404,
            error_body("index_not_found_exception", &format!("no such index [{index}]")),
        );
    }
    let body: Value = match request.body.as_deref() {
        Some(body) => match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(_) => {
                return EngineResponse::new(
                    400,
                    error_body("parse_exception", "search body is not JSON"),
                );
            }
        },
        None => json!({}),
    };
    let size = body["size"].as_u64().unwrap_or(DEFAULT_SIZE as u64) as usize;
    let want_version = body["seq_no_primary_term"].as_bool().unwrap_or(false);
    let query = body.get("query").cloned().unwrap_or(Value::Null);

    let rendered: Vec<Value> = {
        let docs = state.indices.get(index).unwrap();
        docs.iter()
            .filter(|(_, doc)| doc.visible && query_matches(&query, &doc.source))
            .map(|(id, doc)| render_hit(index, id, doc, want_version))
            .collect()
    };
    let total = rendered.len();

    if request.param("scroll").is_some() {
        state.next_scroll += 1;
        let scroll_id = format!("scroll-{}", state.next_scroll);
        let first: Vec<Value> = rendered.iter().take(size).cloned().collect();
        state.scrolls.insert(
            scroll_id.clone(),
            ScrollState {
                cursor: first.len(),
                page_size: size,
                hits: rendered,
            },
        );
        EngineResponse::new(
            200,
            body_json(&json!({
                "_scroll_id": scroll_id,
                "hits": {"total": {"value": total, "relation": "eq"}, "hits": first},
            })),
        )
    } else {
        let page: Vec<Value> = rendered.into_iter().take(size).collect();
        EngineResponse::new(
            200,
            body_json(&json!({
                "hits": {"total": {"value": total, "relation": "eq"}, "hits": page},
            })),
        )
    }
}

fn render_hit(index: &str, id: &str, doc: &StoredDoc, want_version: bool) -> Value {
    let mut hit = json!({
        "_index": index,
        "_id": id,
        "_score": 1.0,
        "_source": doc.source,
    });
    if want_version {
        hit["_seq_no"] = json!(doc.seq_no);
        hit["_primary_term"] = json!(doc.primary_term);
    }
    hit
}

/// Match-all plus a naive single-field match query; enough for the
/// query shapes the tests issue.
fn query_matches(query: &Value, source: &Value) -> bool {
    if query.is_null() || query.get("match_all").is_some() {
        return true;
    }
    if let Some(clauses) = query.get("match").and_then(|m| m.as_object()) {
        return clauses.iter().all(|(field, needle)| {
            let haystack = source
                .get(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_lowercase();
            needle
                .as_str()
                .map(|needle| {
                    needle
                        .to_lowercase()
                        .split_whitespace()
                        .all(|token| haystack.contains(token))
                })
                .unwrap_or(false)
        });
    }
    false
}

fn scroll_continue(state: &mut EngineState, request: &EngineRequest) -> EngineResponse {
    let body: Value = match request.body.as_deref().map(serde_json::from_slice) {
        Some(Ok(value)) => value,
        _ => {
            return EngineResponse::new(
                400,
                error_body("parse_exception", "scroll body is not JSON"),
            );
        }
    };
    let Some(scroll_id) = body["scroll_id"].as_str() else {
        return EngineResponse::new(400, error_body("parse_exception", "scroll_id missing"));
    };
    let Some(scroll) = state.scrolls.get_mut(scroll_id) else {
        return EngineResponse::new(
            404,
            error_body("search_context_missing_exception", "no search context"),
        );
    };

    let end = (scroll.cursor + scroll.page_size).min(scroll.hits.len());
    let page: Vec<Value> = scroll.hits[scroll.cursor..end].to_vec();
    scroll.cursor = end;
    EngineResponse::new(
        200,
        body_json(&json!({
            "_scroll_id": scroll_id,
            "hits": {"total": {"value": scroll.hits.len(), "relation": "eq"}, "hits": page},
        })),
    )
}

fn scroll_release(state: &mut EngineState, request: &EngineRequest) -> EngineResponse {
    let body: Value = match request.body.as_deref().map(serde_json::from_slice) {
        Some(Ok(value)) => value,
        _ => {
            return EngineResponse::new(
                400,
                error_body("parse_exception", "scroll body is not JSON"),
            );
        }
    };
    let ids: Vec<String> = match &body["scroll_id"] {
        Value::String(id) => vec![id.clone()],
        Value::Array(ids) => ids
            .iter()
            .filter_map(|id| id.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    };
    let mut freed = 0;
    for id in ids {
        if state.scrolls.remove(&id).is_some() {
            freed += 1;
        }
    }
    EngineResponse::new(
        200,
        body_json(&json!({"succeeded": true, "num_freed": freed})),
    )
}

fn refresh(state: &mut EngineState, index: &str) -> EngineResponse {
    if let Some(docs) = state.indices.get_mut(index) {
        for doc in docs.values_mut() {
            doc.visible = true;
        }
    }
    EngineResponse::new(
        200,
        body_json(&json!({"_shards": {"total": 1, "successful": 1, "failed": 0}})),
    )
}

fn create_index(state: &mut EngineState, index: &str) -> EngineResponse {
    if state.indices.contains_key(index) {
        return EngineResponse::new(
            400,
            error_body(
                "resource_already_exists_exception",
                &format!("index [{index}] already exists"),
            ),
        );
    }
    state.indices.insert(index.to_string(), BTreeMap::new());
    EngineResponse::new(
        200,
        body_json(&json!({"acknowledged": true, "index": index})),
    )
}

fn drop_index(state: &mut EngineState, index: &str) -> EngineResponse {
    if state.indices.remove(index).is_none() {
        return EngineResponse::new(
            404,
            error_body("index_not_found_exception", &format!("no such index [{index}]")),
        );
    }
    EngineResponse::new(200, body_json(&json!({"acknowledged": true})))
}
