//! Bounded-retry optimistic update execution.
//!
//! The loop is an explicit {read, apply, write, decide} cycle with an
//! attempt counter. Only version conflicts re-enter the loop; every other
//! failure propagates immediately.

use crate::data::TypedRecord;
use crate::error::{CallunaError, Result};

use super::{IndexDao, IndexOptions};

/// Extra attempts granted when the caller does not pick a budget.
pub(crate) const DEFAULT_RETRIES: u32 = 2;

pub(crate) async fn execute<T, F>(
    dao: &IndexDao<T>,
    id: &str,
    max_retries: u32,
    transform: F,
) -> Result<TypedRecord<T>>
where
    T: Send + Sync + 'static,
    F: Fn(T) -> T + Send + Sync,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;

        let current = dao
            .get(id)
            .await?
            .ok_or_else(|| CallunaError::not_found(id))?;
        let next = transform(current.value);
        let options = IndexOptions::overwrite().with_expected(current.version);

        match dao.index(id, &next, options).await {
            Ok(version) => {
                return Ok(TypedRecord {
                    id: id.to_string(),
                    version,
                    value: next,
                });
            }
            Err(err) if err.is_version_conflict() => {
                if attempts > max_retries {
                    return Err(CallunaError::ConcurrencyExhausted {
                        id: id.to_string(),
                        attempts,
                    });
                }
                log::debug!("version conflict updating '{id}', attempt {attempts}, retrying");
            }
            Err(err) => return Err(err),
        }
    }
}
