//! # warden-auth
//!
//! Short-lived, single-use capability tokens ("grants") that authorize one
//! privileged action once.
//!
//! - [`GrantStore::issue`] mints a grant with a clamped TTL
//! - [`GrantStore::consume`] validates a token against the caller's
//!   requirements and marks it used on success
//!
//! Expired grants are pruned lazily on the next issue/consume call; there is
//! no background sweeper. Consumption failures are returned as a structured
//! [`ConsumeOutcome`], never as an error.

#![deny(unsafe_code)]

pub mod store;
pub mod token;
pub mod types;

pub use store::GrantStore;
pub use types::{
    AuthorizationGrant, ConsumeOutcome, ConsumeRequest, GrantAction, GrantStatus, IssueRequest,
    ProvenanceKind,
};
