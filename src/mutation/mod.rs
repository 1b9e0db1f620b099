//! Optimistic mutations against the query cache.
//!
//! A dispatched mutation edits the cache before any network traffic and
//! holds a typed inverse of that edit until the remote answers. Success
//! supersedes the optimistic edit with the server's entity; failure
//! replays the inverse. Exactly one of the two happens per mutation.

mod coordinator;
mod patch;

pub use coordinator::{
  MutationCoordinator, MutationHandle, MutationId, MutationKind, MutationOutcome, MutationRecord,
  MutationState,
};
pub use patch::{
  is_temp_id, temp_id, Field, InversePatch, IssueInverse, IssuePatch, ListSnapshot,
  TEMP_ID_PREFIX,
};
