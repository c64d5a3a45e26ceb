//! # Collaborators
//!
//! The ledger never reads the wall clock or generates ids on its own. Both
//! are injected so tests can pin time and ids.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Source of "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of unique ids (entity ids and correlation ids).
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// UUID v4 ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_generator_is_unique_and_valid() {
        let ids = UuidGenerator;
        let a = ids.next_id();
        let b = ids.next_id();
        assert_ne!(a, b);
        assert!(crate::validation::validate_uuid(&a).is_ok());
    }
}
