//! Shared configuration, storage handles and domain types for the alert dispatcher.

pub mod config;
pub mod db;
pub mod error;
pub mod text;
pub mod types;
