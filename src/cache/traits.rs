//! Core types for the caching system.

use chrono::{DateTime, Utc};

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was fetched (if served from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from a fetch that just completed.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched through the store for this call (possibly shared with
  /// concurrent callers)
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache past its staleness window; a refresh is in flight
  CacheStale,
}

/// Lifecycle of one cache entry.
///
/// `Absent -> Loading -> Fresh -> Stale -> Refreshing -> Fresh`, with
/// eviction or invalidation returning any state to `Absent`. A failed load
/// goes back to `Absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
  Absent,
  Loading,
  Fresh,
  Stale,
  Refreshing,
}
