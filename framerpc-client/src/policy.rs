//! Pluggable policies of the pending request registry
//!
//! - [`IdGenerator`]: how fresh request ids are produced
//! - [`ErrorMapper`]: how a remote error object becomes a [`CallError`]

use crate::error::CallError;
use framerpc_core::{codes, ErrorPayload, Id};
use rand::Rng;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of request ids
///
/// The registry re-draws when a generated id is still pending, so
/// generators only need to be unlikely to collide, not guaranteed unique.
pub trait IdGenerator: Send + Sync + 'static {
    fn next_id(&self) -> Id;
}

/// Monotonic integer ids starting at 1
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicI64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> Id {
        Id::Number(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Random non-negative integer ids
#[derive(Debug, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> Id {
        Id::Number(rand::thread_rng().gen_range(0..i64::MAX))
    }
}

impl<F> IdGenerator for F
where
    F: Fn() -> Id + Send + Sync + 'static,
{
    fn next_id(&self) -> Id {
        self()
    }
}

/// Converts a remote error object into a typed failure
pub trait ErrorMapper: Send + Sync + 'static {
    fn map_error(&self, payload: ErrorPayload) -> CallError;
}

/// Maps the reserved JSON-RPC codes to their failure kinds
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardErrorMapper;

impl ErrorMapper for StandardErrorMapper {
    fn map_error(&self, payload: ErrorPayload) -> CallError {
        match payload.code {
            codes::PARSE_ERROR | codes::INVALID_REQUEST => CallError::MalformedRequest(payload),
            codes::METHOD_NOT_FOUND => CallError::MethodNotFound(payload),
            codes::INVALID_PARAMS => CallError::InvalidParams(payload),
            codes::INTERNAL_ERROR | codes::SERVER_NOT_INITIALIZED => CallError::ServerError(payload),
            _ => CallError::Remote(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIds::new();
        assert_eq!(ids.next_id(), Id::Number(1));
        assert_eq!(ids.next_id(), Id::Number(2));
    }

    #[test]
    fn test_random_ids_are_integers() {
        let ids = RandomIds;
        let drawn: HashSet<Id> = (0..100).map(|_| ids.next_id()).collect();
        assert!(drawn.len() > 90);
        assert!(drawn.iter().all(|id| matches!(id, Id::Number(n) if *n >= 0)));
    }

    #[test]
    fn test_closure_generator() {
        let ids = || Id::from("fixed");
        assert_eq!(IdGenerator::next_id(&ids), Id::from("fixed"));
    }

    #[test]
    fn test_standard_mapping() {
        let mapper = StandardErrorMapper;
        assert!(matches!(
            mapper.map_error(ErrorPayload::parse_error()),
            CallError::MalformedRequest(_)
        ));
        assert!(matches!(
            mapper.map_error(ErrorPayload::invalid_request("x")),
            CallError::MalformedRequest(_)
        ));
        assert!(matches!(
            mapper.map_error(ErrorPayload::method_not_found("x")),
            CallError::MethodNotFound(_)
        ));
        assert!(matches!(
            mapper.map_error(ErrorPayload::invalid_params("x")),
            CallError::InvalidParams(_)
        ));
        assert!(matches!(
            mapper.map_error(ErrorPayload::internal_error("x")),
            CallError::ServerError(_)
        ));
        assert!(matches!(
            mapper.map_error(ErrorPayload::server_not_initialized("x")),
            CallError::ServerError(_)
        ));
        let remote = mapper.map_error(ErrorPayload::new(-32001, "custom"));
        assert_eq!(remote, CallError::Remote(ErrorPayload::new(-32001, "custom")));
    }
}
