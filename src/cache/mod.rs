//! Client-side read cache and cache-invalidating writes.
//!
//! This module sits on top of any [`ResourceAccess`](crate::store::ResourceAccess)
//! implementation and:
//! - Caches list results per (resource, filters) with a staleness window
//! - Coalesces concurrent reads of the same key into one store call
//! - Serves stale data while a background refresh runs, until the
//!   eviction window passes
//! - Drops every entry of a resource after a successful write to it

mod key;
mod layer;
mod traits;

pub use key::QueryKey;
pub use layer::{FetchOptions, Records, ResourceClient};
pub use traits::{CacheResult, CacheSource, EntryState};
