//! Document id generation.

use uuid::Uuid;

/// Generate a random document id.
///
/// Useful when the caller has no natural key and wants client-side ids,
/// e.g. when seeding an index in bulk.
pub fn random_id() -> String {
    Uuid::new_v4().to_string()
}
