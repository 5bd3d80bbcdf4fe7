//! Postgres-backed durable storage.
//!
//! - `PgSkillConversationStore`: skill conversation ids shared by every host instance
//! - `PgStateStorage`: host bot conversation state

pub mod skill_conversation;
pub mod state;

pub use skill_conversation::PgSkillConversationStore;
pub use state::PgStateStorage;

use skillgate_conversation::StoreError;

/// Maps a database error, telling undecodable rows apart from an unreachable database.
fn store_error(key: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => StoreError::Corrupt {
            key: key.to_string(),
            reason: err.to_string(),
        },
        other => StoreError::Unavailable {
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_failures_are_corrupt_records() {
        let err = sqlx::Error::Decode("bad json".into());
        assert!(matches!(
            store_error("skc_1", err),
            StoreError::Corrupt { key, .. } if key == "skc_1"
        ));
    }

    #[test]
    fn other_failures_are_unavailability() {
        assert!(matches!(
            store_error("skc_1", sqlx::Error::PoolTimedOut),
            StoreError::Unavailable { .. }
        ));
    }
}
