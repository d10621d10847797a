//! # sigil-common
//!
//! Shared types, configuration, error handling, and utilities used across all
//! Sigil crates. This is the foundation layer — no business logic, just
//! primitives and contracts.

pub mod config;
pub mod error;
pub mod models;
/// Manual `sqlx::FromRow<'_, AnyRow>` impls for all model types (AnyPool compat).
pub mod any_row;
