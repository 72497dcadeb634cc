//! Persistent cache key naming.
//!
//! Keys are `<feature>_<uid>` for the raw collection and `<feature>Cache_<uid>`
//! for derived aggregates. Every prefix the application writes must appear in
//! [`APP_KEY_PATTERNS`] so that logout can clear it.

pub const COLLECTION_PREFIX: &str = "collection_";
pub const STATS_PREFIX: &str = "statsCache_";
pub const LISTS_PREFIX: &str = "listsCache_";
pub const REVIEWS_PREFIX: &str = "reviewsCache_";

/// Substring patterns removed by `CacheManager::clear_all`.
pub const APP_KEY_PATTERNS: &[&str] = &[
    COLLECTION_PREFIX,
    STATS_PREFIX,
    LISTS_PREFIX,
    REVIEWS_PREFIX,
];

pub fn collection(uid: &str) -> String {
    format!("{COLLECTION_PREFIX}{uid}")
}

pub fn stats(uid: &str) -> String {
    format!("{STATS_PREFIX}{uid}")
}

pub fn lists(uid: &str) -> String {
    format!("{LISTS_PREFIX}{uid}")
}

pub fn reviews(uid: &str) -> String {
    format!("{REVIEWS_PREFIX}{uid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builder_is_covered_by_a_logout_pattern() {
        for key in [collection("u1"), stats("u1"), lists("u1"), reviews("u1")] {
            assert!(
                APP_KEY_PATTERNS.iter().any(|p| key.contains(p)),
                "{key} would survive logout"
            );
        }
        assert_eq!(reviews("u1"), "reviewsCache_u1");
    }
}
