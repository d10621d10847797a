//! Repository catalogue — thin read/write functions over the logical tables.
//!
//! All functions work against the AnyPool via sqlx non-macro queries. The
//! activation repository additionally exposes executor-generic mutators so
//! the service layer can run its read-modify-write cycles inside one
//! transaction.

pub mod activations;
pub mod applications;
pub mod audit;
pub mod history;
