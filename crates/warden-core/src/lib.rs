//! # warden-core
//!
//! Foundation types shared by every Warden crate.
//!
//! - **Session keys**: [`SessionKey`], the hierarchical run identifier whose
//!   structure encodes lineage
//! - **Branded IDs**: [`RunId`] as a newtype for type safety
//! - **Clocks**: [`Clock`] with [`SystemClock`] and [`ManualClock`]
//! - **Backoff**: exponential delay math used by the process limiter
//! - **Run events**: [`RunEvent`], the per-run event vocabulary

#![deny(unsafe_code)]

pub mod backoff;
pub mod clock;
pub mod events;
pub mod ids;
pub mod session_key;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::RunEvent;
pub use ids::RunId;
pub use session_key::{SessionKey, SessionKeyError};
