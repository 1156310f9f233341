//! Correlation id generation.

use uuid::Uuid;

/// Produces correlation ids for outbound requests.
///
/// Ids must be unique among the requests pending on one bus. A repeated id
/// is not overwritten; the new request fails with
/// [`RequestError::DuplicateId`](ipcbus_core::RequestError::DuplicateId).
pub trait IdSource: Send + Sync {
    /// Returns a fresh id.
    fn next_id(&self) -> String;
}

/// Random UUID v4 ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdSource;

impl IdSource for UuidIdSource {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

impl<F> IdSource for F
where
    F: Fn() -> String + Send + Sync,
{
    fn next_id(&self) -> String {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_ids_are_distinct() {
        let ids = UuidIdSource;
        assert_ne!(ids.next_id(), ids.next_id());
    }

    #[test]
    fn test_closure_source() {
        let ids = || "fixed".to_string();
        assert_eq!(IdSource::next_id(&ids), "fixed");
    }
}
