//! Route modules, one per operation family.

pub mod activation;
pub mod signature;
pub mod vault;
