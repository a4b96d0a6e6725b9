use newswire_common::types::{Priority, SavedSearch};

/// Classify a saved search's matches.
///
/// A keyword search is P0, an unqueried search on a priority category is P1,
/// everything else is P2. `priority_categories` must already be lowercased.
pub fn classify(search: &SavedSearch, priority_categories: &[String]) -> Priority {
    if !search.query.trim().is_empty() {
        return Priority::P0;
    }

    let category = search
        .category
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    if !category.is_empty() && priority_categories.iter().any(|c| *c == category) {
        Priority::P1
    } else {
        Priority::P2
    }
}
