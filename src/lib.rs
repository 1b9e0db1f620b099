//! trackstore — a client-side query cache with optimistic mutations for
//! issue trackers.
//!
//! The crate keeps overlapping read views (filtered listings, per-issue
//! details, the dashboard) consistent with a remote tracker while
//! create/update/delete mutations are in flight:
//!
//! - every mutation edits the cache before its network call is
//!   dispatched, so views reflect it immediately;
//! - a failed round trip replays a typed inverse, restoring exactly the
//!   state the mutation found;
//! - a successful round trip merges the server's authoritative entity
//!   into every cache entry that references it, and marks entries it
//!   cannot patch in place (the dashboard) for refetch.
//!
//! [`TrackerClient`] is the entry point: cache-first reads, mutation
//! dispatch and per-key change subscriptions over an explicitly owned
//! [`cache::CacheStore`]. The remote boundary is the [`remote::Remote`]
//! trait, with an HTTP implementation and an in-memory one for tests
//! and offline use.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod mutation;
pub mod remote;
pub mod types;

pub use client::TrackerClient;
pub use config::Config;
pub use error::RemoteError;
pub use mutation::{IssuePatch, MutationHandle, MutationOutcome};
pub use types::{Issue, IssueDraft, IssueFilter, IssuePage};
