//! Storage interface tests.
//!
//! Each submodule holds backend-agnostic tests plus a macro that runs all of
//! them against one `KeyedStore` implementation.

pub mod keyed_store_tests;
