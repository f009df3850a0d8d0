//! Core data types shared across the client.

/// Optimistic concurrency token attached to every stored document.
///
/// The engine advances it on each successful write. The client only ever
/// compares tokens for equality and echoes them back as write
/// preconditions; a token read in one operation is a valid precondition
/// for exactly one subsequent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentVersion {
    pub seq_no: u64,
    pub primary_term: u64,
}

impl DocumentVersion {
    pub fn new(seq_no: u64, primary_term: u64) -> Self {
        Self {
            seq_no,
            primary_term,
        }
    }
}

/// A deserialized domain object together with its identity and version,
/// as returned by a read. Owned by the caller after return.
#[derive(Debug, Clone)]
pub struct TypedRecord<T> {
    pub id: String,
    pub version: DocumentVersion,
    pub value: T,
}

/// One decoded search hit.
///
/// The version is only present when the search asked the engine to
/// report sequence numbers and primary terms alongside each hit.
#[derive(Debug, Clone)]
pub struct TypedHit<T> {
    pub id: String,
    pub version: Option<DocumentVersion>,
    pub value: T,
}
