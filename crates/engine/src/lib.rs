//! Matching and claiming side of the alert dispatcher.
//!
//! Per alert: resolve the owner's preferences, match the saved search against
//! the article catalog, derive dedupe keys, claim deliveries and advance the
//! alert's cursor.

pub mod alerts;
pub mod catalog;
pub mod claimer;
pub mod cursor;
pub mod dedupe;
pub mod matcher;
pub mod preferences;
pub mod priority;
