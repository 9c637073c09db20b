//! Credential pool for OANDA API key fail-over
//!
//! Holds an ordered set of API credentials and hands out the least-used one
//! for each request attempt. A call that gets rejected with an auth error
//! retries with a different key by excluding the rejected identity for the
//! rest of that logical call; the exclusion is never permanent, so a key that
//! was rate-capped for one call stays eligible for the next.
//!
//! Selection and counter updates happen under a single lock, so concurrent
//! callers never act on a stale counter snapshot. Releases are tied to the
//! lease's `Drop`, which keeps the counters correct even when a call is
//! cancelled mid-attempt.

pub mod error;
pub mod pool;

pub use error::{Error, Result};
pub use pool::{CredentialLease, CredentialPool};
