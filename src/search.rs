//! Search execution and scroll-driven result streaming.
//!
//! A search issues one initial request and exposes the engine's paginated
//! result set as a single lazy pass of typed hits. With scrolling enabled
//! the cursor fetches continuation pages transparently as the consumer
//! advances, and releases the server-side cursor on exhaustion, explicit
//! close, or drop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde_json::{Value, json};

use crate::codec::ModelCodec;
use crate::data::{DocumentVersion, TypedHit};
use crate::error::{CallunaError, Result};
use crate::protocol::{self, Hit, SearchResponse};
use crate::transport::{EngineRequest, Transport};

/// The query payload sent to the engine, passed through verbatim.
#[derive(Debug, Clone)]
pub enum QueryBody {
    /// A structured body the client may still merge options into.
    Structured(Value),
    /// A raw JSON string, e.g. pasted from a dev console. Sent as-is;
    /// size and version reporting must be part of the string itself.
    Raw(String),
}

/// Per-call search configuration.
#[derive(Debug, Clone)]
pub struct SearchSpec {
    pub body: QueryBody,
    pub size: Option<u64>,
    /// Keep-alive for the server-side cursor; enables scrolling.
    pub scroll: Option<Duration>,
    /// Ask the engine to report a version token with every hit.
    pub seq_no_primary_term: bool,
}

impl Default for SearchSpec {
    fn default() -> Self {
        Self {
            body: QueryBody::Structured(json!({})),
            size: None,
            scroll: None,
            seq_no_primary_term: false,
        }
    }
}

impl SearchSpec {
    pub fn builder() -> SearchSpecBuilder {
        SearchSpecBuilder::new()
    }

    /// An empty body; the engine treats it as match-all.
    pub fn match_all() -> Self {
        Self::default()
    }
}

pub struct SearchSpecBuilder {
    spec: SearchSpec,
}

impl Default for SearchSpecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchSpecBuilder {
    pub fn new() -> Self {
        Self {
            spec: SearchSpec::default(),
        }
    }

    /// Set a structured query body.
    pub fn body(mut self, body: Value) -> Self {
        self.spec.body = QueryBody::Structured(body);
        self
    }

    /// Set a raw JSON query body, sent verbatim.
    pub fn raw_body(mut self, body: impl Into<String>) -> Self {
        self.spec.body = QueryBody::Raw(body.into());
        self
    }

    /// Maximum hits per page (scrolling) or in total (no scrolling).
    pub fn size(mut self, size: u64) -> Self {
        self.spec.size = Some(size);
        self
    }

    /// Enable scrolling with the given cursor keep-alive.
    pub fn scroll(mut self, keep_alive: Duration) -> Self {
        self.spec.scroll = Some(keep_alive);
        self
    }

    /// Report a version token with every hit, so hits can seed
    /// conditional bulk updates.
    pub fn seq_no_primary_term(mut self, enabled: bool) -> Self {
        self.spec.seq_no_primary_term = enabled;
        self
    }

    pub fn build(self) -> SearchSpec {
        self.spec
    }
}

/// Render the request body, folding client-side options into structured
/// payloads. Raw payloads must already contain them.
fn render_body(spec: &SearchSpec) -> Result<Vec<u8>> {
    match &spec.body {
        QueryBody::Structured(value) => {
            let mut value = value.clone();
            let object = value.as_object_mut().ok_or_else(|| {
                CallunaError::invalid_argument("structured search body must be a JSON object")
            })?;
            if let Some(size) = spec.size {
                object.insert("size".to_string(), json!(size));
            }
            if spec.seq_no_primary_term {
                object.insert("seq_no_primary_term".to_string(), json!(true));
            }
            Ok(serde_json::to_vec(&value)?)
        }
        QueryBody::Raw(raw) => {
            if spec.size.is_some() {
                return Err(CallunaError::invalid_argument(
                    "size must be part of a raw search body",
                ));
            }
            if spec.seq_no_primary_term {
                return Err(CallunaError::invalid_argument(
                    "seq_no_primary_term must be part of a raw search body",
                ));
            }
            Ok(raw.clone().into_bytes())
        }
    }
}

/// Engine time-value for a cursor keep-alive, rounded up to whole seconds.
fn scroll_time(keep_alive: Duration) -> String {
    let mut secs = keep_alive.as_secs();
    if keep_alive.subsec_nanos() > 0 {
        secs += 1;
    }
    format!("{}s", secs.max(1))
}

/// A lazily traversed search result set.
///
/// `total_hits` reflects the match count of the initial request and stays
/// stable for the life of the cursor. Hits are decoded on demand; the
/// remote cursor is walked in a single logical pass.
pub struct SearchResults<T> {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn ModelCodec<T>>,
    total_hits: u64,
    scroll: Option<Duration>,
    scroll_id: Option<String>,
    page: VecDeque<Hit>,
    done: bool,
}

impl<T> SearchResults<T> {
    pub(crate) async fn open(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn ModelCodec<T>>,
        index: &str,
        spec: SearchSpec,
    ) -> Result<Self> {
        let body = render_body(&spec)?;
        let mut request = EngineRequest::post(format!("/{index}/_search")).with_body(body);
        if let Some(keep_alive) = spec.scroll {
            request = request.with_param("scroll", scroll_time(keep_alive));
        }

        let response = transport.execute(request).await?;
        if !response.is_success() {
            return Err(protocol::decode_error(response.status, &response.body, None));
        }
        let envelope: SearchResponse = response.json()?;

        Ok(Self {
            transport,
            codec,
            total_hits: envelope.hits.total.map(|t| t.value).unwrap_or(0),
            scroll: spec.scroll,
            scroll_id: if spec.scroll.is_some() {
                envelope.scroll_id
            } else {
                None
            },
            page: envelope.hits.hits.into(),
            done: false,
        })
    }

    /// Total match count reported for the initial request.
    pub fn total_hits(&self) -> u64 {
        self.total_hits
    }

    /// Advance to the next hit, fetching the next page when the current
    /// one is drained. Returns `Ok(None)` once the result set is
    /// exhausted; the server-side cursor is released at that point.
    pub async fn next(&mut self) -> Result<Option<TypedHit<T>>> {
        loop {
            if let Some(hit) = self.page.pop_front() {
                return self.decode(hit).map(Some);
            }
            if self.done {
                return Ok(None);
            }
            match (self.scroll, self.scroll_id.clone()) {
                (Some(keep_alive), Some(scroll_id)) => {
                    self.fetch_next_page(keep_alive, scroll_id).await?;
                }
                _ => {
                    self.done = true;
                    self.release().await;
                }
            }
        }
    }

    /// Drain the remaining hits into a vector and release the cursor.
    /// The returned collection can be walked any number of times.
    pub async fn collect_hits(mut self) -> Result<Vec<TypedHit<T>>> {
        let mut hits = Vec::new();
        while let Some(hit) = self.next().await? {
            hits.push(hit);
        }
        Ok(hits)
    }

    /// Adapt the cursor into a pull-based stream of hits.
    pub fn into_stream(self) -> impl Stream<Item = Result<TypedHit<T>>> + Send
    where
        T: Send,
    {
        futures::stream::try_unfold(self, |mut results| async move {
            match results.next().await? {
                Some(hit) => Ok(Some((hit, results))),
                None => Ok(None),
            }
        })
    }

    /// Abandon the remaining result set and release the server-side
    /// cursor. Release failures are logged and swallowed.
    pub async fn close(&mut self) {
        self.done = true;
        self.page.clear();
        self.release().await;
    }

    async fn fetch_next_page(&mut self, keep_alive: Duration, scroll_id: String) -> Result<()> {
        let body = json!({
            "scroll": scroll_time(keep_alive),
            "scroll_id": scroll_id,
        });
        let request =
            EngineRequest::post("/_search/scroll").with_body(serde_json::to_vec(&body)?);
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(protocol::decode_error(response.status, &response.body, None));
        }
        let envelope: SearchResponse = response.json()?;

        if let Some(id) = envelope.scroll_id {
            self.scroll_id = Some(id);
        }
        if envelope.hits.hits.is_empty() {
            self.done = true;
            self.release().await;
        } else {
            self.page.extend(envelope.hits.hits);
        }
        Ok(())
    }

    async fn release(&mut self) {
        if let Some(scroll_id) = self.scroll_id.take() {
            release_scroll(self.transport.clone(), scroll_id).await;
        }
    }

    /// Hand the live cursor token to a caller that will release it
    /// elsewhere; afterwards this result set owns no remote state.
    pub(crate) fn detach_scroll(&mut self) -> Option<(Arc<dyn Transport>, String)> {
        self.scroll_id.take().map(|id| (self.transport.clone(), id))
    }

    fn decode(&self, hit: Hit) -> Result<TypedHit<T>> {
        let source = hit
            .source
            .ok_or_else(|| CallunaError::codec("search hit carried no document source"))?;
        let value = self.codec.decode(&serde_json::to_vec(&source)?)?;
        let version = match (hit.seq_no, hit.primary_term) {
            (Some(seq_no), Some(primary_term)) => {
                Some(DocumentVersion::new(seq_no, primary_term))
            }
            _ => None,
        };
        Ok(TypedHit {
            id: hit.id,
            version,
            value,
        })
    }
}

impl<T> Drop for SearchResults<T> {
    fn drop(&mut self) {
        if let Some(scroll_id) = self.scroll_id.take() {
            let transport = self.transport.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(release_scroll(transport, scroll_id));
                }
                Err(_) => log::warn!(
                    "scroll cursor dropped outside a runtime; the engine will expire it after its keep-alive"
                ),
            }
        }
    }
}

impl<T> std::fmt::Debug for SearchResults<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchResults")
            .field("total_hits", &self.total_hits)
            .field("buffered", &self.page.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// Best-effort release of a server-side cursor.
pub(crate) async fn release_scroll(transport: Arc<dyn Transport>, scroll_id: String) {
    let body = json!({"scroll_id": [scroll_id]});
    let Ok(body) = serde_json::to_vec(&body) else {
        return;
    };
    let request = EngineRequest::delete("/_search/scroll").with_body(body);
    match transport.execute(request).await {
        Ok(response) if !response.is_success() => {
            log::debug!("scroll release answered status {}", response.status);
        }
        Err(err) => log::debug!("failed to release scroll cursor: {err}"),
        Ok(_) => {}
    }
}
