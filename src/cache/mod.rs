//! Named response caches for offline support.
//!
//! This module holds byte-exact network responses keyed by request identity,
//! organized into named tiers with independent lifecycles:
//! - a version-tagged static tier built at install time
//! - an unversioned dynamic tier populated opportunistically
//! - named third-party tiers populated by stale-while-revalidate

mod response;
mod tiers;

pub use response::{Request, Response, ResponseSource};
pub use tiers::{TierManager, CACHE_NAME};
