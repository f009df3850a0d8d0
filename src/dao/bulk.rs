//! Bulk write batching with per-item outcome correlation.
//!
//! A [`BulkBuffer`] accumulates operations in the calling task and is
//! submitted as one NDJSON batch request. Items succeed or fail
//! independently; outcomes are ordered exactly like the submitted
//! operations so callers can zip requests to outcomes positionally.

use serde_json::json;

use crate::data::DocumentVersion;
use crate::error::{CallunaError, Result};
use crate::protocol::{self, BulkResponse};
use crate::transport::EngineRequest;

use super::IndexDao;

/// The kind of one queued bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOpKind {
    Index,
    Create,
    Update,
    Delete,
}

type Transform<T> = Box<dyn Fn(T) -> T + Send + Sync>;

enum BulkOp<T> {
    Index {
        id: String,
        value: T,
    },
    Create {
        id: String,
        value: T,
    },
    Update {
        id: String,
        version: DocumentVersion,
        value: T,
        transform: Transform<T>,
    },
    /// Update without a payload; the current document is read at
    /// submission time.
    UpdateFn {
        id: String,
        transform: Transform<T>,
    },
    Delete {
        id: String,
    },
}

impl<T> BulkOp<T> {
    fn kind(&self) -> BulkOpKind {
        match self {
            Self::Index { .. } => BulkOpKind::Index,
            Self::Create { .. } => BulkOpKind::Create,
            Self::Update { .. } | Self::UpdateFn { .. } => BulkOpKind::Update,
            Self::Delete { .. } => BulkOpKind::Delete,
        }
    }

    fn id(&self) -> &str {
        match self {
            Self::Index { id, .. }
            | Self::Create { id, .. }
            | Self::Update { id, .. }
            | Self::UpdateFn { id, .. }
            | Self::Delete { id } => id,
        }
    }
}

/// Scoped builder for one bulk batch. Operations are consumed exactly
/// once when the batch is submitted.
pub struct BulkBuffer<T> {
    ops: Vec<BulkOp<T>>,
}

impl<T> BulkBuffer<T> {
    pub(crate) fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Queue a store that overwrites any existing document.
    pub fn index(&mut self, id: impl Into<String>, value: T) {
        self.ops.push(BulkOp::Index {
            id: id.into(),
            value,
        });
    }

    /// Queue a store that fails its slot when the id already exists.
    pub fn create(&mut self, id: impl Into<String>, value: T) {
        self.ops.push(BulkOp::Create {
            id: id.into(),
            value,
        });
    }

    /// Queue a conditional update of a document read earlier: `transform`
    /// is applied to `value` and the result written back conditioned on
    /// `version`. A conflicting item reports failure in its outcome slot;
    /// the buffer never retries.
    pub fn update<F>(
        &mut self,
        id: impl Into<String>,
        version: DocumentVersion,
        value: T,
        transform: F,
    ) where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        self.ops.push(BulkOp::Update {
            id: id.into(),
            version,
            value,
            transform: Box::new(transform),
        });
    }

    /// Queue an update that reads the current document at submission time
    /// and writes `transform` of it, conditioned on the version read.
    pub fn update_fn<F>(&mut self, id: impl Into<String>, transform: F)
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        self.ops.push(BulkOp::UpdateFn {
            id: id.into(),
            transform: Box::new(transform),
        });
    }

    /// Queue a delete.
    pub fn delete(&mut self, id: impl Into<String>) {
        self.ops.push(BulkOp::Delete { id: id.into() });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Per-item result of a submitted batch, positionally matching the
/// submitted operations.
#[derive(Debug, Clone)]
pub struct BulkOutcome {
    pub kind: BulkOpKind,
    pub id: String,
    pub status: BulkStatus,
}

/// Success or failure of a single bulk item.
#[derive(Debug, Clone)]
pub enum BulkStatus {
    Ok(DocumentVersion),
    Failed { status: u16, reason: String },
}

impl BulkOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self.status, BulkStatus::Ok(_))
    }

    /// The resulting version, when the item succeeded.
    pub fn version(&self) -> Option<DocumentVersion> {
        match self.status {
            BulkStatus::Ok(version) => Some(version),
            BulkStatus::Failed { .. } => None,
        }
    }
}

/// One operation prepared for the wire: its action line plus, for writes,
/// the encoded document line.
struct PreparedOp {
    action: serde_json::Value,
    doc: Option<Vec<u8>>,
}

/// An op either reaches the wire or already carries its outcome
/// (e.g. an update-by-function whose target is missing).
enum Slot {
    Send(PreparedOp),
    Resolved(BulkStatus),
}

pub(crate) async fn submit<T>(dao: &IndexDao<T>, buffer: BulkBuffer<T>) -> Result<Vec<BulkOutcome>>
where
    T: Send + Sync + 'static,
{
    if buffer.is_empty() {
        return Ok(Vec::new());
    }

    let mut kinds = Vec::with_capacity(buffer.ops.len());
    let mut slots = Vec::with_capacity(buffer.ops.len());

    for op in buffer.ops {
        kinds.push((op.kind(), op.id().to_string()));
        slots.push(prepare(dao, op).await?);
    }

    let mut body = Vec::new();
    let mut sent = 0usize;
    for slot in &slots {
        if let Slot::Send(prepared) = slot {
            body.extend_from_slice(&serde_json::to_vec(&prepared.action)?);
            body.push(b'\n');
            if let Some(doc) = &prepared.doc {
                body.extend_from_slice(doc);
                body.push(b'\n');
            }
            sent += 1;
        }
    }

    let mut items = if sent > 0 {
        let request = EngineRequest::post(format!("/{}/_bulk", dao.index))
            .with_content_type("application/x-ndjson")
            .with_body(body);
        let response = dao.transport.execute(request).await?;
        if !response.is_success() {
            return Err(protocol::decode_error(response.status, &response.body, None));
        }
        let envelope: BulkResponse = response.json()?;
        if envelope.items.len() != sent {
            return Err(CallunaError::engine(
                response.status,
                "bulk_response_mismatch",
                format!(
                    "submitted {} operations but the engine answered {}",
                    sent,
                    envelope.items.len()
                ),
            ));
        }
        envelope.items.into_iter()
    } else {
        Vec::new().into_iter()
    };

    let mut outcomes = Vec::with_capacity(kinds.len());
    for ((kind, id), slot) in kinds.into_iter().zip(slots) {
        let status = match slot {
            Slot::Resolved(status) => status,
            Slot::Send(_) => {
                let item = items
                    .next()
                    .and_then(|envelope| envelope.into_inner())
                    .ok_or_else(|| {
                        CallunaError::engine(200, "bulk_response_mismatch", "missing bulk item")
                    })?;
                if (200..300).contains(&item.status) && item.error.is_none() {
                    match (item.seq_no, item.primary_term) {
                        (Some(seq_no), Some(primary_term)) => {
                            BulkStatus::Ok(DocumentVersion::new(seq_no, primary_term))
                        }
                        _ => BulkStatus::Failed {
                            status: item.status,
                            reason: "bulk item carried no version token".to_string(),
                        },
                    }
                } else {
                    let reason = item
                        .error
                        .map(|cause| {
                            if cause.reason.is_empty() {
                                cause.kind
                            } else {
                                cause.reason
                            }
                        })
                        .unwrap_or_else(|| format!("status {}", item.status));
                    BulkStatus::Failed {
                        status: item.status,
                        reason,
                    }
                }
            }
        };
        outcomes.push(BulkOutcome { kind, id, status });
    }
    Ok(outcomes)
}

async fn prepare<T>(dao: &IndexDao<T>, op: BulkOp<T>) -> Result<Slot>
where
    T: Send + Sync + 'static,
{
    let slot = match op {
        BulkOp::Index { id, value } => Slot::Send(PreparedOp {
            action: json!({"index": {"_id": id}}),
            doc: Some(dao.codec.encode(&value)?),
        }),
        BulkOp::Create { id, value } => Slot::Send(PreparedOp {
            action: json!({"create": {"_id": id}}),
            doc: Some(dao.codec.encode(&value)?),
        }),
        BulkOp::Update {
            id,
            version,
            value,
            transform,
        } => {
            let next = transform(value);
            Slot::Send(PreparedOp {
                action: json!({"index": {
                    "_id": id,
                    "if_seq_no": version.seq_no,
                    "if_primary_term": version.primary_term,
                }}),
                doc: Some(dao.codec.encode(&next)?),
            })
        }
        BulkOp::UpdateFn { id, transform } => match dao.get(&id).await? {
            Some(current) => {
                let next = transform(current.value);
                Slot::Send(PreparedOp {
                    action: json!({"index": {
                        "_id": id,
                        "if_seq_no": current.version.seq_no,
                        "if_primary_term": current.version.primary_term,
                    }}),
                    doc: Some(dao.codec.encode(&next)?),
                })
            }
            None => Slot::Resolved(BulkStatus::Failed {
                status: 404,
                reason: format!("document '{id}' not found"),
            }),
        },
        BulkOp::Delete { id } => Slot::Send(PreparedOp {
            action: json!({"delete": {"_id": id}}),
            doc: None,
        }),
    };
    Ok(slot)
}
