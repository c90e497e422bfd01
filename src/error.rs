use thiserror::Error;

use crate::feed::BuildError;

/// Classified engine failures. They travel inside `anyhow::Error`; callers that
/// need to tell them apart use `downcast_ref::<SyncError>()`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store {store_id} is not eligible for sync: {reason}")]
    StoreNotEligible { store_id: i64, reason: &'static str },
    #[error("aborting after {count} feed entry build failures (last: {last})")]
    TooManyBuildErrors { count: usize, last: BuildError },
    #[error("batch response has {got} items for {expected} requests")]
    ResponseMismatch { expected: usize, got: usize },
}
