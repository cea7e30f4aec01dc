//! Canonical cache keys for (resource, filters) reads.

use sha2::{Digest, Sha256};
use std::fmt::Write;
use std::hash::{Hash, Hasher};

use crate::record::Filters;

/// Key for one cached read.
///
/// Built from the case-folded resource name and the filter entries in sorted
/// order, so structurally equal filter sets land on the same entry no matter
/// how they were constructed or how the resource was spelled.
#[derive(Clone, Debug)]
pub struct QueryKey {
  resource: String,
  canonical: String,
}

impl QueryKey {
  pub fn new(resource: &str, filters: &Filters) -> Self {
    let mut canonical = format!("{:?}", Self::group(resource));
    for (field, value) in filters.iter() {
      // Debug output quotes strings and tags the variant, so "1" and 1
      // stay distinct and no field name can forge a separator
      let _ = write!(canonical, "&{:?}={:?}", field, value);
    }
    Self {
      resource: resource.to_string(),
      canonical,
    }
  }

  /// Invalidation group of a resource name. Stores match resource names
  /// without regard to ASCII case, so the cache folds them the same way.
  pub fn group(resource: &str) -> String {
    resource.to_ascii_lowercase()
  }

  /// Resource name as given.
  pub fn resource(&self) -> &str {
    &self.resource
  }

  /// Stable textual form of the key.
  pub fn canonical(&self) -> &str {
    &self.canonical
  }

  /// SHA256 of the canonical form, for fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.canonical.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl PartialEq for QueryKey {
  fn eq(&self, other: &Self) -> bool {
    self.canonical == other.canonical
  }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.canonical.hash(state);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_construction_order_does_not_matter() {
    let a = Filters::new().with("status", "Available").with("city", "Austin");
    let b = Filters::new().with("city", "Austin").with("status", "Available");
    assert_eq!(
      QueryKey::new("Properties", &a).cache_hash(),
      QueryKey::new("Properties", &b).cache_hash()
    );
  }

  #[test]
  fn test_value_type_is_part_of_the_key() {
    let text = QueryKey::new("Properties", &Filters::new().with("price", "1"));
    let int = QueryKey::new("Properties", &Filters::new().with("price", 1));
    assert_ne!(text, int);
  }

  #[test]
  fn test_resource_is_part_of_the_key() {
    let filters = Filters::new();
    assert_ne!(
      QueryKey::new("Properties", &filters).cache_hash(),
      QueryKey::new("Clients", &filters).cache_hash()
    );
  }

  #[test]
  fn test_resource_spelling_does_not_matter() {
    let filters = Filters::new().with("status", "Sold");
    let upper = QueryKey::new("Properties", &filters);
    let lower = QueryKey::new("properties", &filters);
    assert_eq!(upper, lower);
    assert_eq!(upper.cache_hash(), lower.cache_hash());
    assert_eq!(lower.resource(), "properties");
  }

  #[test]
  fn test_field_names_cannot_forge_entries() {
    let forged = QueryKey::new("P", &Filters::new().with("a\"=Text(\"x\")&\"b", "y"));
    let real = QueryKey::new("P", &Filters::new().with("a", "x").with("b", "y"));
    assert_ne!(forged, real);
  }

  #[test]
  fn test_hash_is_hex_sha256() {
    let hash = QueryKey::new("Properties", &Filters::new()).cache_hash();
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
  }
}
