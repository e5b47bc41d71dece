//! Typed ID definitions for the scheduler's resources.
//!
//! Master-issued IDs are opaque strings. `TaskId` is the one ID this
//! scheduler mints itself, at launch time, as `{task-name}-{uuid}` so that
//! operators can read the owning task off a raw ID in master logs.

use crate::define_id;

// =============================================================================
// Master-issued identifiers
// =============================================================================

define_id!(FrameworkId);
define_id!(OfferId);
define_id!(AgentId);
define_id!(ExecutorId);

// =============================================================================
// Scheduler-issued identifiers
// =============================================================================

define_id!(TaskId);

impl TaskId {
    /// Mints a fresh task ID for the named task.
    ///
    /// Every launch from the staging queue gets a new ID; status updates
    /// for superseded IDs no longer resolve and are dropped by the caller.
    #[must_use]
    pub fn generate(task_name: &str) -> Self {
        Self(format!("{}-{}", task_name, uuid::Uuid::new_v4()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_id_roundtrip() {
        let id = OfferId::parse("offer-127").unwrap();
        let s = id.to_string();
        let parsed: OfferId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_empty_id_rejected() {
        let result: Result<AgentId, _> = "".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_separator_rejected() {
        let result: Result<TaskId, _> = "web/1".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidFormat { .. }
        ));
    }

    #[test]
    fn test_task_id_generate_carries_name() {
        let id = TaskId::generate("web-1");
        assert!(id.as_str().starts_with("web-1-"));
    }

    #[test]
    fn test_task_id_generate_unique() {
        let a = TaskId::generate("web");
        let b = TaskId::generate("web");
        assert_ne!(a, b);
    }

    #[test]
    fn test_framework_id_json_roundtrip() {
        let id = FrameworkId::parse("9aa4a9b2-0001").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"9aa4a9b2-0001\"");
        let parsed: FrameworkId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_deserialize_empty_fails() {
        let result: Result<OfferId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }
}
