//! Pluggable serialization capability for domain objects.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CallunaError, Result};

/// Serializes a typed domain object to a byte payload and back.
///
/// Implementations hold no document state; the same codec instance is
/// shared by every operation of a DAO.
pub trait ModelCodec<T>: Send + Sync {
    /// Serialize a value to the payload stored by the engine.
    fn encode(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a stored payload back into a value.
    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// Default codec backed by serde_json.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ModelCodec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value)
            .map_err(|e| CallunaError::codec(format!("failed to serialize document: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| CallunaError::codec(format!("failed to deserialize document: {e}")))
    }
}
