//! Shared helpers.

pub mod bootstrap;
pub mod pool;
pub mod retry;
