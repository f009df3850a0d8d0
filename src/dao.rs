//! The index-scoped data access object.
//!
//! An [`IndexDao`] scopes every operation to one named index and hides
//! the engine's request/response protocol, version bookkeeping, bulk
//! batching and scroll pagination behind a typed interface.

pub mod bulk;
mod update;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::{JsonCodec, ModelCodec};
use crate::data::{DocumentVersion, TypedRecord};
use crate::error::{CallunaError, Result};
use crate::protocol::{self, GetDocResponse, WriteResponse};
use crate::search::{SearchResults, SearchSpec};
use crate::transport::{EngineRequest, Transport};

use self::bulk::{BulkBuffer, BulkOutcome};

/// Per-call options for [`IndexDao::index`].
///
/// `create` rejects the write when the id already exists; it defaults to
/// on, so plain inserts cannot silently overwrite. `expected` arms the
/// conditional write with a previously read version token.
#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    pub create: bool,
    pub expected: Option<DocumentVersion>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexOptions {
    pub fn new() -> Self {
        Self {
            create: true,
            expected: None,
        }
    }

    /// Allow overwriting an existing document.
    pub fn overwrite() -> Self {
        Self {
            create: false,
            expected: None,
        }
    }

    /// Condition the write on a version read earlier.
    pub fn with_expected(mut self, version: DocumentVersion) -> Self {
        self.expected = Some(version);
        self
    }
}

/// Typed access object for one named index.
///
/// Stateless across calls: operations issue their round-trips and hold no
/// shared mutable fields, so a DAO (and its clones) can be used from any
/// number of concurrent tasks.
pub struct IndexDao<T> {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) codec: Arc<dyn ModelCodec<T>>,
    pub(crate) index: String,
}

impl<T> Clone for IndexDao<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            codec: self.codec.clone(),
            index: self.index.clone(),
        }
    }
}

impl<T> std::fmt::Debug for IndexDao<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDao")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl<T> IndexDao<T>
where
    T: Send + Sync + 'static,
{
    /// Create a DAO with an explicit codec.
    pub fn new(
        transport: Arc<dyn Transport>,
        index: impl Into<String>,
        codec: Arc<dyn ModelCodec<T>>,
    ) -> Self {
        Self {
            transport,
            codec,
            index: index.into(),
        }
    }

    /// Create a DAO with the default serde_json codec.
    pub fn json(transport: Arc<dyn Transport>, index: impl Into<String>) -> Self
    where
        T: Serialize + DeserializeOwned,
    {
        Self::new(transport, index, Arc::new(JsonCodec::new()))
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    /// Fetch a document by id.
    ///
    /// Returns `Ok(None)` when the document does not exist; reads are
    /// realtime and do not require a refresh.
    pub async fn get(&self, id: &str) -> Result<Option<TypedRecord<T>>> {
        let request = EngineRequest::get(format!("/{}/_doc/{}", self.index, id));
        let response = self.transport.execute(request).await?;
        if response.status == 404 {
            return Ok(None);
        }
        if !response.is_success() {
            return Err(protocol::decode_error(
                response.status,
                &response.body,
                Some(id),
            ));
        }

        let envelope: GetDocResponse = response.json()?;
        if !envelope.found {
            return Ok(None);
        }
        let source = envelope.source.ok_or_else(|| {
            CallunaError::codec("get response carried no document source")
        })?;
        let (seq_no, primary_term) = match (envelope.seq_no, envelope.primary_term) {
            (Some(s), Some(p)) => (s, p),
            _ => {
                return Err(CallunaError::codec(
                    "get response carried no version token",
                ));
            }
        };

        let value = self.codec.decode(&serde_json::to_vec(&source)?)?;
        Ok(Some(TypedRecord {
            id: envelope.id,
            version: DocumentVersion::new(seq_no, primary_term),
            value,
        }))
    }

    /// Store a document under `id`, returning the resulting version.
    ///
    /// Fails with [`CallunaError::VersionConflict`] when `create` is set
    /// and the id already exists, or when `expected` no longer matches
    /// the stored version.
    pub async fn index(&self, id: &str, value: &T, options: IndexOptions) -> Result<DocumentVersion> {
        let body = self.codec.encode(value)?;
        self.index_raw(id, body, options).await
    }

    /// Store an already encoded payload.
    pub(crate) async fn index_raw(
        &self,
        id: &str,
        body: Vec<u8>,
        options: IndexOptions,
    ) -> Result<DocumentVersion> {
        let path = if options.create {
            format!("/{}/_create/{}", self.index, id)
        } else {
            format!("/{}/_doc/{}", self.index, id)
        };
        let mut request = EngineRequest::put(path).with_body(body);
        if let Some(expected) = options.expected {
            request = request
                .with_param("if_seq_no", expected.seq_no.to_string())
                .with_param("if_primary_term", expected.primary_term.to_string());
        }

        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(protocol::decode_error(
                response.status,
                &response.body,
                Some(id),
            ));
        }
        let envelope: WriteResponse = response.json()?;
        Ok(DocumentVersion::new(envelope.seq_no, envelope.primary_term))
    }

    /// Delete a document by id. Returns `false` when it was absent.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let request = EngineRequest::delete(format!("/{}/_doc/{}", self.index, id));
        let response = self.transport.execute(request).await?;
        if response.status == 404 {
            return Ok(false);
        }
        if !response.is_success() {
            return Err(protocol::decode_error(
                response.status,
                &response.body,
                Some(id),
            ));
        }
        let envelope: WriteResponse = response.json()?;
        Ok(envelope.result == "deleted")
    }

    /// Read-modify-write a document with bounded conflict retry.
    ///
    /// Reads the current record, applies `transform` and writes the result
    /// back conditioned on the version read. A losing conditional write
    /// re-reads and retries the whole cycle, up to `max_retries` extra
    /// attempts; `max_retries = 0` means exactly one attempt. `transform`
    /// may run several times against different base states and must be
    /// safe to re-invoke.
    pub async fn update<F>(&self, id: &str, max_retries: u32, transform: F) -> Result<TypedRecord<T>>
    where
        F: Fn(T) -> T + Send + Sync,
    {
        update::execute(self, id, max_retries, transform).await
    }

    /// [`update`](Self::update) with the default retry budget.
    pub async fn update_default<F>(&self, id: &str, transform: F) -> Result<TypedRecord<T>>
    where
        F: Fn(T) -> T + Send + Sync,
    {
        update::execute(self, id, update::DEFAULT_RETRIES, transform).await
    }

    /// Accumulate write operations in a scoped buffer and submit them as
    /// one batch. Outcomes are ordered like the submitted operations, one
    /// entry per item, success or failure recorded individually.
    pub async fn bulk<F>(&self, build: F) -> Result<Vec<BulkOutcome>>
    where
        F: FnOnce(&mut BulkBuffer<T>),
    {
        let mut buffer = BulkBuffer::new();
        build(&mut buffer);
        self.submit_bulk(buffer).await
    }

    /// Submit an already built bulk buffer.
    pub(crate) async fn submit_bulk(&self, buffer: BulkBuffer<T>) -> Result<Vec<BulkOutcome>> {
        bulk::submit(self, buffer).await
    }

    /// Run a search and expose its results as a lazy cursor.
    pub async fn search(&self, spec: SearchSpec) -> Result<SearchResults<T>> {
        SearchResults::open(
            self.transport.clone(),
            self.codec.clone(),
            &self.index,
            spec,
        )
        .await
    }

    /// Make recent writes visible to search.
    pub async fn refresh(&self) -> Result<()> {
        let request = EngineRequest::post(format!("/{}/_refresh", self.index));
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(protocol::decode_error(response.status, &response.body, None));
        }
        Ok(())
    }

    /// Create the backing index, passing `settings` through verbatim.
    pub async fn create_index(&self, settings: &str) -> Result<()> {
        let request = EngineRequest::put(format!("/{}", self.index))
            .with_body(settings.as_bytes().to_vec());
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(protocol::decode_error(response.status, &response.body, None));
        }
        Ok(())
    }

    /// Drop the backing index. Absence is not an error.
    pub async fn delete_index(&self) -> Result<()> {
        let request = EngineRequest::delete(format!("/{}", self.index));
        let response = self.transport.execute(request).await?;
        if response.status == 404 || response.is_success() {
            return Ok(());
        }
        Err(protocol::decode_error(response.status, &response.body, None))
    }
}
