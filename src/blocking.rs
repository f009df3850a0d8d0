//! Blocking facade over the async client.
//!
//! An [`IndexDao`] here owns a small tokio runtime and runs each async
//! operation to completion from synchronous code, with identical
//! semantics and error taxonomy. Clones share the runtime.

use std::future::Future;
use std::sync::{Arc, mpsc};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::runtime::Builder as TokioRuntimeBuilder;

use crate::codec::ModelCodec;
use crate::dao;
use crate::dao::IndexOptions;
use crate::dao::bulk::{BulkBuffer, BulkOutcome};
use crate::data::{DocumentVersion, TypedHit, TypedRecord};
use crate::error::{CallunaError, Result};
use crate::search::{self, SearchSpec};
use crate::transport::Transport;

/// Executor for running async DAO operations from blocking code.
#[derive(Clone)]
struct OpExecutor {
    runtime: Arc<tokio::runtime::Runtime>,
}

impl OpExecutor {
    fn new() -> Result<Self> {
        let runtime = TokioRuntimeBuilder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|err| {
                CallunaError::internal(format!("failed to initialize blocking runtime: {err}"))
            })?;
        Ok(Self {
            runtime: Arc::new(runtime),
        })
    }

    /// Run an async future and wait for its result.
    fn run<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let handle = self.runtime.handle().clone();
        handle.spawn(async move {
            let _ = tx.send(future.await);
        });
        rx.recv()
            .map_err(|err| CallunaError::internal(format!("blocking task channel closed: {err}")))?
    }

    /// Fire-and-forget a future on the runtime.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.handle().spawn(future);
    }
}

/// Blocking twin of [`crate::IndexDao`].
pub struct IndexDao<T> {
    inner: dao::IndexDao<T>,
    executor: OpExecutor,
}

impl<T> Clone for IndexDao<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl<T> std::fmt::Debug for IndexDao<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("blocking::IndexDao")
            .field("index", &self.inner.index)
            .finish_non_exhaustive()
    }
}

impl<T> IndexDao<T>
where
    T: Send + Sync + 'static,
{
    /// Create a blocking DAO with an explicit codec.
    pub fn new(
        transport: Arc<dyn Transport>,
        index: impl Into<String>,
        codec: Arc<dyn ModelCodec<T>>,
    ) -> Result<Self> {
        Self::from_async(dao::IndexDao::new(transport, index, codec))
    }

    /// Create a blocking DAO with the default serde_json codec.
    pub fn json(transport: Arc<dyn Transport>, index: impl Into<String>) -> Result<Self>
    where
        T: Serialize + DeserializeOwned,
    {
        Self::from_async(dao::IndexDao::json(transport, index))
    }

    /// Wrap an async DAO, giving it a private runtime.
    pub fn from_async(inner: dao::IndexDao<T>) -> Result<Self> {
        Ok(Self {
            inner,
            executor: OpExecutor::new()?,
        })
    }

    pub fn index_name(&self) -> &str {
        self.inner.index_name()
    }

    /// See [`crate::IndexDao::get`].
    pub fn get(&self, id: &str) -> Result<Option<TypedRecord<T>>> {
        let dao = self.inner.clone();
        let id = id.to_string();
        self.executor.run(async move { dao.get(&id).await })
    }

    /// See [`crate::IndexDao::index`].
    pub fn index(&self, id: &str, value: &T, options: IndexOptions) -> Result<DocumentVersion> {
        // Encode on the calling thread so `value` does not need to move.
        let body = self.inner.codec.encode(value)?;
        let dao = self.inner.clone();
        let id = id.to_string();
        self.executor
            .run(async move { dao.index_raw(&id, body, options).await })
    }

    /// See [`crate::IndexDao::delete`].
    pub fn delete(&self, id: &str) -> Result<bool> {
        let dao = self.inner.clone();
        let id = id.to_string();
        self.executor.run(async move { dao.delete(&id).await })
    }

    /// See [`crate::IndexDao::update`].
    pub fn update<F>(&self, id: &str, max_retries: u32, transform: F) -> Result<TypedRecord<T>>
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        let dao = self.inner.clone();
        let id = id.to_string();
        self.executor
            .run(async move { dao.update(&id, max_retries, transform).await })
    }

    /// See [`crate::IndexDao::update_default`].
    pub fn update_default<F>(&self, id: &str, transform: F) -> Result<TypedRecord<T>>
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        let dao = self.inner.clone();
        let id = id.to_string();
        self.executor
            .run(async move { dao.update_default(&id, transform).await })
    }

    /// See [`crate::IndexDao::bulk`]. The buffer is built on the calling
    /// thread; only the submission runs on the runtime.
    pub fn bulk<F>(&self, build: F) -> Result<Vec<BulkOutcome>>
    where
        F: FnOnce(&mut BulkBuffer<T>),
    {
        let mut buffer = BulkBuffer::new();
        build(&mut buffer);
        let dao = self.inner.clone();
        self.executor
            .run(async move { dao.submit_bulk(buffer).await })
    }

    /// See [`crate::IndexDao::search`]. Hits are consumed through the
    /// returned iterator, which fetches continuation pages on demand.
    pub fn search(&self, spec: SearchSpec) -> Result<SearchResults<T>> {
        let dao = self.inner.clone();
        let results = self.executor.run(async move { dao.search(spec).await })?;
        Ok(SearchResults {
            total_hits: results.total_hits(),
            inner: Some(results),
            executor: self.executor.clone(),
        })
    }

    /// See [`crate::IndexDao::refresh`].
    pub fn refresh(&self) -> Result<()> {
        let dao = self.inner.clone();
        self.executor.run(async move { dao.refresh().await })
    }

    /// See [`crate::IndexDao::create_index`].
    pub fn create_index(&self, settings: &str) -> Result<()> {
        let dao = self.inner.clone();
        let settings = settings.to_string();
        self.executor
            .run(async move { dao.create_index(&settings).await })
    }

    /// See [`crate::IndexDao::delete_index`].
    pub fn delete_index(&self) -> Result<()> {
        let dao = self.inner.clone();
        self.executor.run(async move { dao.delete_index().await })
    }
}

/// Blocking search results: the lazy hit sequence as a plain iterator.
///
/// Dropping an unexhausted scrolling result set releases the server-side
/// cursor best-effort without blocking the dropping thread.
pub struct SearchResults<T> {
    total_hits: u64,
    inner: Option<search::SearchResults<T>>,
    executor: OpExecutor,
}

impl<T> SearchResults<T>
where
    T: Send + Sync + 'static,
{
    /// Total match count reported for the initial request.
    pub fn total_hits(&self) -> u64 {
        self.total_hits
    }

    /// Abandon the remaining result set and release the cursor.
    pub fn close(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            let _ = self.executor.run(async move {
                inner.close().await;
                Ok(())
            });
        }
    }
}

impl<T> Iterator for SearchResults<T>
where
    T: Send + Sync + 'static,
{
    type Item = Result<TypedHit<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut inner = self.inner.take()?;
        let result = self.executor.run(async move {
            let hit = inner.next().await?;
            Ok((hit, inner))
        });
        match result {
            Ok((Some(hit), inner)) => {
                self.inner = Some(inner);
                Some(Ok(hit))
            }
            Ok((None, inner)) => {
                self.inner = Some(inner);
                None
            }
            Err(err) => Some(Err(err)),
        }
    }
}

impl<T> Drop for SearchResults<T> {
    fn drop(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            if let Some((transport, scroll_id)) = inner.detach_scroll() {
                self.executor.spawn(search::release_scroll(transport, scroll_id));
            }
        }
    }
}

impl<T> std::fmt::Debug for SearchResults<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("blocking::SearchResults")
            .field("total_hits", &self.total_hits)
            .finish_non_exhaustive()
    }
}
